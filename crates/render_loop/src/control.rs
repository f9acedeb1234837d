//! Control-thread event dispatch
//!
//! The control thread is whatever thread owns the render loop (the application's
//! UI thread). Render threads and timers talk back to it through a crossbeam
//! channel of [`ControlEvent`]s; the embedding application pumps them with
//! `RenderLoop::process_events`.
//!
//! Timers are kept in a small list checked on every pump. They never fire on
//! their own: a timer is due once its deadline passed and the queue is pumped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::backend::WindowId;

/// Events delivered to the control thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Run a polish + sync (threaded) or render pass (single-thread) for the window
    UpdateRequest(WindowId),
    /// Animation timer fired
    AnimationTick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug)]
struct Timer {
    id: TimerId,
    due: Instant,
    repeat: Option<Duration>,
    event: ControlEvent,
}

pub struct ControlQueue {
    sender: Sender<ControlEvent>,
    receiver: Receiver<ControlEvent>,
    timers: Mutex<Vec<Timer>>,
    next_timer_id: AtomicU64,
}

impl Default for ControlQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlQueue {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            sender,
            receiver,
            timers: Mutex::new(Vec::new()),
            next_timer_id: AtomicU64::new(1),
        }
    }

    pub fn post(&self, event: ControlEvent) {
        // The receiver lives as long as self, so this cannot fail
        let _ = self.sender.send(event);
    }

    /// Sender handed to render threads
    pub fn sender(&self) -> Sender<ControlEvent> {
        self.sender.clone()
    }

    pub fn start_timer(&self, delay: Duration, event: ControlEvent) -> TimerId {
        self.add_timer(delay, None, event)
    }

    pub fn start_repeating(&self, interval: Duration, event: ControlEvent) -> TimerId {
        self.add_timer(interval, Some(interval), event)
    }

    fn add_timer(&self, delay: Duration, repeat: Option<Duration>, event: ControlEvent) -> TimerId {
        let id = TimerId(self.next_timer_id.fetch_add(1, Ordering::Relaxed));
        self.timers.lock().push(Timer {
            id,
            due: Instant::now() + delay,
            repeat,
            event,
        });
        id
    }

    /// Returns `false` if the timer already fired (single-shot) or was never started.
    pub fn kill_timer(&self, id: TimerId) -> bool {
        let mut timers = self.timers.lock();
        let before = timers.len();
        timers.retain(|timer| timer.id != id);
        timers.len() != before
    }

    pub fn is_timer_active(&self, id: TimerId) -> bool {
        self.timers.lock().iter().any(|timer| timer.id == id)
    }

    pub fn active_timers(&self) -> usize {
        self.timers.lock().len()
    }

    pub fn pending_events(&self) -> usize {
        self.receiver.len()
    }

    /// Everything ready right now: expired timers first (in deadline order), then posted events.
    pub fn ready_events(&self) -> Vec<ControlEvent> {
        let mut ready = self.expire_timers(Instant::now());
        ready.extend(self.receiver.try_iter());
        ready
    }

    /// Block up to `max_wait` for at least one event, then return everything ready.
    pub fn wait_for_events(&self, max_wait: Duration) -> Vec<ControlEvent> {
        let ready = self.ready_events();
        if !ready.is_empty() || max_wait.is_zero() {
            return ready;
        }

        let mut deadline = Instant::now() + max_wait;
        if let Some(next_due) = self.next_due() {
            deadline = deadline.min(next_due);
        }

        let mut ready = Vec::new();
        let timeout = deadline.saturating_duration_since(Instant::now());
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => ready.push(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
        }

        let mut expired = self.expire_timers(Instant::now());
        expired.append(&mut ready);
        expired.extend(self.receiver.try_iter());
        expired
    }

    fn next_due(&self) -> Option<Instant> {
        self.timers.lock().iter().map(|timer| timer.due).min()
    }

    fn expire_timers(&self, now: Instant) -> Vec<ControlEvent> {
        let mut timers = self.timers.lock();
        let mut fired: Vec<(Instant, ControlEvent)> = Vec::new();

        timers.retain_mut(|timer| {
            if timer.due > now {
                return true;
            }
            fired.push((timer.due, timer.event));
            match timer.repeat {
                Some(interval) => {
                    // Skip missed ticks rather than bursting to catch up
                    while timer.due <= now {
                        timer.due += interval.max(Duration::from_millis(1));
                    }
                    true
                }
                None => false,
            }
        });

        fired.sort_by_key(|(due, _)| *due);
        fired.into_iter().map(|(_, event)| event).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_posted_events_are_delivered_in_order() {
        let queue = ControlQueue::new();
        queue.post(ControlEvent::UpdateRequest(1));
        queue.sender().send(ControlEvent::AnimationTick).unwrap();

        assert_eq!(
            queue.ready_events(),
            vec![ControlEvent::UpdateRequest(1), ControlEvent::AnimationTick]
        );
        assert!(queue.ready_events().is_empty());
    }

    #[test]
    fn test_single_shot_timer_fires_once() {
        let queue = ControlQueue::new();
        let id = queue.start_timer(Duration::from_millis(5), ControlEvent::UpdateRequest(9));
        assert!(queue.is_timer_active(id));
        assert!(queue.ready_events().is_empty());

        let events = queue.wait_for_events(Duration::from_millis(200));
        assert_eq!(events, vec![ControlEvent::UpdateRequest(9)]);
        assert!(!queue.is_timer_active(id));
        assert!(!queue.kill_timer(id));
    }

    #[test]
    fn test_killed_timer_never_fires() {
        let queue = ControlQueue::new();
        let id = queue.start_timer(Duration::from_millis(1), ControlEvent::UpdateRequest(2));
        assert!(queue.kill_timer(id));

        thread::sleep(Duration::from_millis(5));
        assert!(queue.ready_events().is_empty());
    }

    #[test]
    fn test_repeating_timer_rearms() {
        let queue = ControlQueue::new();
        let id = queue.start_repeating(Duration::from_millis(2), ControlEvent::AnimationTick);

        let mut ticks = 0;
        while ticks < 3 {
            ticks += queue
                .wait_for_events(Duration::from_millis(100))
                .into_iter()
                .filter(|event| *event == ControlEvent::AnimationTick)
                .count();
        }
        assert!(queue.is_timer_active(id));
        assert_eq!(queue.active_timers(), 1);
    }

    #[test]
    fn test_wait_returns_early_for_cross_thread_post() {
        let queue = ControlQueue::new();
        let sender = queue.sender();
        let poster = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            sender.send(ControlEvent::UpdateRequest(4)).unwrap();
        });

        let started = Instant::now();
        let events = queue.wait_for_events(Duration::from_secs(5));
        poster.join().unwrap();

        assert_eq!(events, vec![ControlEvent::UpdateRequest(4)]);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
