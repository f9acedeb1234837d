use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use image::RgbaImage;

use crate::backend::{
    GpuContext, OffscreenSurface, Platform, PlatformCapabilities, SceneGraph, ShareGroup,
    SharedWindow, Size, SurfaceFormat, WindowId,
};

use super::context::HeadlessContext;
use super::scene::{HeadlessSceneGraph, SceneContent};
use super::window::HeadlessWindow;
use super::{Call, HeadlessJournal};

/// The simulated GPU every context and scene graph of one platform shares
#[derive(Default)]
pub(crate) struct HeadlessGpu {
    pub contexts_created: AtomicUsize,
    pub live_contexts: AtomicUsize,
    pub contexts_recreated: AtomicUsize,
    /// Contexts created before the current generation are lost until recreated
    pub loss_generation: AtomicU64,
    pub fail_recreate: AtomicBool,
    /// Last frame rendered per window
    pub framebuffers: DashMap<WindowId, RgbaImage>,
}

impl HeadlessGpu {
    pub(crate) fn store_frame(&self, window: WindowId, size: Size, color: [u8; 4]) {
        let frame = RgbaImage::from_pixel(
            size.width.max(0) as u32,
            size.height.max(0) as u32,
            image::Rgba(color),
        );
        self.framebuffers.insert(window, frame);
    }
}

pub struct HeadlessPlatform {
    capabilities: PlatformCapabilities,
    refresh_rate: Option<f64>,
    share_group: Option<ShareGroup>,
    journal: HeadlessJournal,
    gpu: Arc<HeadlessGpu>,
    contents: DashMap<WindowId, Arc<SceneContent>>,
    fail_context_creation: AtomicBool,
    next_surface: AtomicU64,
}

impl Default for HeadlessPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessPlatform {
    /// A platform whose contexts can be used from any thread
    pub fn new() -> Self {
        Self::with_capabilities(PlatformCapabilities {
            threaded_context: true,
            prefers_platform_loop: false,
        })
    }

    pub fn with_capabilities(capabilities: PlatformCapabilities) -> Self {
        Self {
            capabilities,
            refresh_rate: Some(60.0),
            share_group: None,
            journal: HeadlessJournal::new(),
            gpu: Arc::new(HeadlessGpu::default()),
            contents: DashMap::new(),
            fail_context_creation: AtomicBool::new(false),
            next_surface: AtomicU64::new(1),
        }
    }

    pub fn with_refresh_rate(mut self, refresh_rate: Option<f64>) -> Self {
        self.refresh_rate = refresh_rate;
        self
    }

    pub fn with_share_group(mut self, group: ShareGroup) -> Self {
        self.share_group = Some(group);
        self
    }

    pub fn journal(&self) -> &HeadlessJournal {
        &self.journal
    }

    /// Create a window whose scene graph this platform will build
    pub fn create_window(&self, id: WindowId, size: Size) -> Arc<HeadlessWindow> {
        let window = Arc::new(HeadlessWindow::new(id, size, self.journal.clone()));
        self.contents.insert(id, window.content());
        window
    }

    pub fn set_fail_context_creation(&self, fail: bool) {
        self.fail_context_creation.store(fail, Ordering::Release);
    }

    pub fn set_fail_context_recreation(&self, fail: bool) {
        self.gpu.fail_recreate.store(fail, Ordering::Release);
    }

    /// Every context created so far reports itself lost until it is recreated
    pub fn lose_contexts(&self) {
        self.gpu.loss_generation.fetch_add(1, Ordering::AcqRel);
        tracing::debug!("[HEADLESS] all contexts lost");
    }

    pub fn contexts_created(&self) -> usize {
        self.gpu.contexts_created.load(Ordering::Acquire)
    }

    pub fn live_contexts(&self) -> usize {
        self.gpu.live_contexts.load(Ordering::Acquire)
    }

    pub fn contexts_recreated(&self) -> usize {
        self.gpu.contexts_recreated.load(Ordering::Acquire)
    }

    /// Last frame rendered for the window, if its scene graph still holds one
    pub fn framebuffer(&self, window: WindowId) -> Option<RgbaImage> {
        self.gpu.framebuffers.get(&window).map(|frame| frame.value().clone())
    }
}

impl Platform for HeadlessPlatform {
    fn capabilities(&self) -> PlatformCapabilities {
        self.capabilities
    }

    fn global_share_context(&self) -> Option<ShareGroup> {
        self.share_group
    }

    fn create_context(
        &self,
        format: &SurfaceFormat,
        share: Option<ShareGroup>,
    ) -> std::result::Result<Box<dyn GpuContext>, String> {
        if self.fail_context_creation.load(Ordering::Acquire) {
            return Err("headless context creation disabled".to_string());
        }

        self.gpu.contexts_created.fetch_add(1, Ordering::AcqRel);
        self.gpu.live_contexts.fetch_add(1, Ordering::AcqRel);
        self.journal.record(None, Call::ContextCreated);
        tracing::trace!("[HEADLESS] context created ({}, shared: {:?})", format.api, share);

        Ok(Box::new(HeadlessContext::new(
            *format,
            self.gpu.clone(),
            self.journal.clone(),
        )))
    }

    fn create_offscreen_surface(&self, format: &SurfaceFormat) -> Option<OffscreenSurface> {
        Some(OffscreenSurface {
            id: self.next_surface.fetch_add(1, Ordering::Relaxed),
            format: *format,
        })
    }

    fn create_scene_graph(&self, window: &SharedWindow) -> Box<dyn SceneGraph> {
        let id = window.id();
        let content = self
            .contents
            .entry(id)
            .or_insert_with(|| Arc::new(SceneContent::default()))
            .value()
            .clone();
        Box::new(HeadlessSceneGraph::new(
            id,
            content,
            self.gpu.clone(),
            self.journal.clone(),
        ))
    }

    fn refresh_rate(&self) -> Option<f64> {
        self.refresh_rate
    }
}
