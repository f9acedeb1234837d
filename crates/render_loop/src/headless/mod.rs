//! CPU backend
//!
//! Implements every collaborator trait without a window system or GPU. Frames
//! are plain [`image::RgbaImage`] buffers, and every call the loops make into
//! the backend is appended to a shared [`HeadlessJournal`] so the order of
//! polish, sync, render and swap can be inspected afterwards.
//!
//! Failures can be injected at runtime: context creation
//! ([`HeadlessPlatform::set_fail_context_creation`]) and context loss
//! ([`HeadlessPlatform::lose_contexts`]).

mod context;
mod platform;
mod scene;
mod window;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{Size, WindowId};

pub use context::HeadlessContext;
pub use platform::HeadlessPlatform;
pub use scene::HeadlessSceneGraph;
pub use window::{HeadlessWindow, SyncHook};

/// A collaborator call made by a render loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    PlatformHandleCreated,
    ContextCreated,
    ContextRecreated,
    ContextDestroyed,
    MakeCurrent { offscreen: bool },
    DoneCurrent,
    Polish,
    AboutToAnimate,
    SceneInitialized,
    Sync,
    Render(Size),
    Invalidate,
    Swap,
    ReadFramebuffer,
    FrameSwapped,
    AboutToStop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// `None` for calls not tied to a window (context creation, offscreen work)
    pub window: Option<WindowId>,
    pub call: Call,
    pub thread: Option<String>,
}

/// Append-only log shared by everything a [`HeadlessPlatform`] creates
#[derive(Debug, Clone, Default)]
pub struct HeadlessJournal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl HeadlessJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, window: Option<WindowId>, call: Call) {
        let thread = std::thread::current().name().map(str::to_owned);
        self.entries.lock().push(JournalEntry { window, call, thread });
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().clone()
    }

    /// Calls made for one window, in order
    pub fn calls(&self, window: WindowId) -> Vec<Call> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.window == Some(window))
            .map(|entry| entry.call)
            .collect()
    }

    pub fn count(&self, window: WindowId, call: Call) -> usize {
        self.count_matching(window, |c| *c == call)
    }

    pub fn count_matching(&self, window: WindowId, predicate: impl Fn(&Call) -> bool) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.window == Some(window) && predicate(&entry.call))
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journal_filters_by_window() {
        let journal = HeadlessJournal::new();
        journal.record(Some(1), Call::Sync);
        journal.record(Some(2), Call::Sync);
        journal.record(Some(1), Call::Render(Size::new(10, 10)));
        journal.record(None, Call::ContextCreated);

        assert_eq!(journal.calls(1), vec![Call::Sync, Call::Render(Size::new(10, 10))]);
        assert_eq!(journal.count(2, Call::Sync), 1);
        assert_eq!(journal.count_matching(1, |c| matches!(c, Call::Render(_))), 1);
        assert_eq!(journal.len(), 4);

        journal.clear();
        assert!(journal.is_empty());
    }

    #[test]
    fn test_journal_records_thread_name() {
        let journal = HeadlessJournal::new();
        let worker = journal.clone();
        std::thread::Builder::new()
            .name("journal-writer".to_string())
            .spawn(move || worker.record(Some(3), Call::Swap))
            .unwrap()
            .join()
            .unwrap();

        let entries = journal.entries();
        assert_eq!(entries[0].thread.as_deref(), Some("journal-writer"));
    }
}
