//! Pending-update bits shared between a render thread and its control side.

use std::sync::atomic::{AtomicU32, Ordering};

bitflags::bitflags! {
    /// Work requested of a render thread for its next `sync_and_render` pass
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct UpdateRequest: u32 {
        const SYNC = 0x01;
        const REPAINT = 0x02;
        /// First frame after exposure; the control thread stays blocked until it is on screen
        const EXPOSE = 0x04 | Self::SYNC.bits() | Self::REPAINT.bits();
    }
}

/// Atomic cell for [`UpdateRequest`] bits.
///
/// Producers OR bits in; the render thread takes the whole set at the start of a pass.
#[derive(Debug, Default)]
pub struct PendingUpdates {
    bits: AtomicU32,
}

impl PendingUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, request: UpdateRequest) {
        self.bits.fetch_or(request.bits(), Ordering::AcqRel);
    }

    /// Take and clear every pending bit
    pub fn take(&self) -> UpdateRequest {
        UpdateRequest::from_bits_truncate(self.bits.swap(0, Ordering::AcqRel))
    }

    pub fn peek(&self) -> UpdateRequest {
        UpdateRequest::from_bits_truncate(self.bits.load(Ordering::Acquire))
    }

    pub fn is_empty(&self) -> bool {
        self.peek().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expose_implies_sync_and_repaint() {
        assert!(UpdateRequest::EXPOSE.contains(UpdateRequest::SYNC));
        assert!(UpdateRequest::EXPOSE.contains(UpdateRequest::REPAINT));
        assert!(!UpdateRequest::SYNC.contains(UpdateRequest::EXPOSE));
    }

    #[test]
    fn test_bits_accumulate_until_taken() {
        let pending = PendingUpdates::new();
        assert!(pending.is_empty());

        pending.insert(UpdateRequest::REPAINT);
        pending.insert(UpdateRequest::SYNC);
        assert_eq!(pending.peek(), UpdateRequest::SYNC | UpdateRequest::REPAINT);

        let taken = pending.take();
        assert!(taken.contains(UpdateRequest::SYNC | UpdateRequest::REPAINT));
        assert!(!taken.contains(UpdateRequest::EXPOSE));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_concurrent_inserts_are_not_lost() {
        let pending = std::sync::Arc::new(PendingUpdates::new());
        let handles: Vec<_> = [UpdateRequest::SYNC, UpdateRequest::REPAINT]
            .into_iter()
            .map(|request| {
                let pending = pending.clone();
                std::thread::spawn(move || pending.insert(request))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(pending.take(), UpdateRequest::SYNC | UpdateRequest::REPAINT);
    }
}
