use std::sync::atomic::Ordering;
use std::sync::Arc;

use image::RgbaImage;

use crate::backend::{GpuContext, RenderWindow, Size, Surface, SurfaceFormat, WindowId};

use super::platform::HeadlessGpu;
use super::{Call, HeadlessJournal};

/// A context that "draws" by copying the frames its scene graphs store on the shared GPU
pub struct HeadlessContext {
    format: SurfaceFormat,
    gpu: Arc<HeadlessGpu>,
    journal: HeadlessJournal,
    generation: u64,
    current: Option<WindowId>,
}

impl HeadlessContext {
    pub(crate) fn new(format: SurfaceFormat, gpu: Arc<HeadlessGpu>, journal: HeadlessJournal) -> Self {
        let generation = gpu.loss_generation.load(Ordering::Acquire);
        Self {
            format,
            gpu,
            journal,
            generation,
            current: None,
        }
    }

    /// Window the context is current on, if any
    pub fn current_window(&self) -> Option<WindowId> {
        self.current
    }
}

impl GpuContext for HeadlessContext {
    fn format(&self) -> SurfaceFormat {
        self.format
    }

    fn make_current(&mut self, surface: Surface<'_>) -> bool {
        if !self.is_valid() {
            return false;
        }

        match surface {
            Surface::Window(window) => {
                // No native surface to bind to yet
                if !window.has_platform_handle() {
                    return false;
                }
                self.journal
                    .record(Some(window.id()), Call::MakeCurrent { offscreen: false });
                self.current = Some(window.id());
            }
            Surface::Offscreen(_) => {
                self.journal.record(None, Call::MakeCurrent { offscreen: true });
                self.current = None;
            }
        }
        true
    }

    fn done_current(&mut self) {
        self.journal.record(self.current.take(), Call::DoneCurrent);
    }

    fn swap_buffers(&mut self, window: &dyn RenderWindow) {
        self.journal.record(Some(window.id()), Call::Swap);
    }

    fn is_valid(&self) -> bool {
        self.generation == self.gpu.loss_generation.load(Ordering::Acquire)
    }

    fn recreate(&mut self) -> bool {
        if self.gpu.fail_recreate.load(Ordering::Acquire) {
            return false;
        }
        self.generation = self.gpu.loss_generation.load(Ordering::Acquire);
        self.current = None;
        self.gpu.contexts_recreated.fetch_add(1, Ordering::AcqRel);
        self.journal.record(None, Call::ContextRecreated);
        true
    }

    fn read_framebuffer(&mut self, size: Size, alpha: bool, premultiplied: bool) -> RgbaImage {
        self.journal.record(self.current, Call::ReadFramebuffer);

        let width = size.width.max(0) as u32;
        let height = size.height.max(0) as u32;
        let mut frame = self
            .current
            .and_then(|id| self.gpu.framebuffers.get(&id).map(|frame| frame.value().clone()))
            .filter(|frame| frame.dimensions() == (width, height))
            .unwrap_or_else(|| RgbaImage::new(width, height));

        for pixel in frame.pixels_mut() {
            if !alpha {
                pixel[3] = 255;
            } else if premultiplied {
                let a = u16::from(pixel[3]);
                for channel in 0..3 {
                    pixel[channel] = ((u16::from(pixel[channel]) * a) / 255) as u8;
                }
            }
        }
        frame
    }
}

impl Drop for HeadlessContext {
    fn drop(&mut self) {
        self.gpu.live_contexts.fetch_sub(1, Ordering::AcqRel);
        self.journal.record(None, Call::ContextDestroyed);
    }
}
