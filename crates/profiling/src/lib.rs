//! Instrumentation scopes and frame statistics for the render loops
//!
//! Scopes are explicit: a `profile_scope!` guard records its wall time when it
//! is dropped. Events travel through a lock-free channel and are only gathered
//! when someone asks for them, so the render threads never contend on a lock
//! while a frame is in flight.
//!
//! # Usage
//!
//! ```rust
//! profiling::enable_profiling();
//! profiling::set_thread_name("RenderThread-1");
//!
//! {
//!     profiling::profile_scope!("render");
//!     // draw calls
//! }
//! profiling::record_frame_time(16.6);
//!
//! let stats = profiling::frame_stats();
//! assert!(stats.frames >= 1);
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, Sender};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Name of the marker event written by [`record_frame_time`]
pub const FRAME_MARKER: &str = "__FRAME_MARKER__";

/// A closed scope or a frame marker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileEvent {
    pub name: String,
    pub thread_id: u64,
    pub thread_name: Option<String>,
    /// Enclosing scope on the same thread
    pub parent_name: Option<String>,
    /// Start time in nanoseconds since the profiler was first touched
    pub start_ns: u64,
    pub duration_ns: u64,
    pub depth: u32,
    pub location: Option<String>,
}

/// Average cost of one named scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseStats {
    pub name: String,
    pub calls: u64,
    pub total_ms: f64,
    pub avg_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameStats {
    pub frames: u64,
    pub avg_frame_ms: f64,
    /// Sorted by name
    pub phases: Vec<PhaseStats>,
}

impl FrameStats {
    pub fn phase(&self, name: &str) -> Option<&PhaseStats> {
        self.phases.iter().find(|phase| phase.name == name)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Default)]
struct ScopeStack {
    names: Vec<String>,
}

thread_local! {
    static SCOPES: RefCell<ScopeStack> = RefCell::new(ScopeStack::default());
    static THREAD_NAME: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PROFILER: Lazy<Profiler> = Lazy::new(Profiler::new);

struct Profiler {
    enabled: AtomicBool,
    epoch: Instant,
    sender: Sender<ProfileEvent>,
    receiver: Receiver<ProfileEvent>,
    events: RwLock<Vec<ProfileEvent>>,
}

impl Profiler {
    fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            enabled: AtomicBool::new(false),
            epoch: Instant::now(),
            sender,
            receiver,
            events: RwLock::new(Vec::new()),
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn submit(&self, event: ProfileEvent) {
        let _ = self.sender.send(event);
    }

    /// Move everything queued on the channel into the event store
    fn drain(&self) -> Vec<ProfileEvent> {
        let drained: Vec<ProfileEvent> = self.receiver.try_iter().collect();
        if !drained.is_empty() {
            self.events.write().extend(drained.iter().cloned());
        }
        drained
    }
}

/// Name the current thread in captured events
pub fn set_thread_name(name: impl Into<String>) {
    THREAD_NAME.with(|thread_name| *thread_name.borrow_mut() = Some(name.into()));
}

pub fn thread_name() -> Option<String> {
    THREAD_NAME.with(|thread_name| thread_name.borrow().clone())
}

pub fn enable_profiling() {
    PROFILER.enabled.store(true, Ordering::Relaxed);
}

pub fn disable_profiling() {
    PROFILER.enabled.store(false, Ordering::Relaxed);
}

pub fn is_profiling_enabled() -> bool {
    PROFILER.is_enabled()
}

/// Events captured since the last call
pub fn collect_events() -> Vec<ProfileEvent> {
    PROFILER.drain()
}

/// Every event captured since the last [`clear_events`]
pub fn all_events() -> Vec<ProfileEvent> {
    PROFILER.drain();
    PROFILER.events.read().clone()
}

pub fn clear_events() {
    PROFILER.drain();
    PROFILER.events.write().clear();
}

/// Mark the end of a frame that took `frame_time_ms`
pub fn record_frame_time(frame_time_ms: f32) {
    if !PROFILER.is_enabled() {
        return;
    }

    let duration_ns = (f64::from(frame_time_ms.max(0.0)) * 1_000_000.0) as u64;
    PROFILER.submit(ProfileEvent {
        name: FRAME_MARKER.to_string(),
        thread_id: current_thread_id(),
        thread_name: thread_name(),
        parent_name: None,
        start_ns: PROFILER.now_ns().saturating_sub(duration_ns),
        duration_ns,
        depth: 0,
        location: None,
    });
}

/// Summarise all captured events into frame and per-phase averages
pub fn frame_stats() -> FrameStats {
    summarize(&all_events())
}

pub fn summarize(events: &[ProfileEvent]) -> FrameStats {
    let mut frames = 0u64;
    let mut frame_ns = 0u128;
    let mut phases: BTreeMap<&str, (u64, u128, u64)> = BTreeMap::new();

    for event in events {
        if event.name == FRAME_MARKER {
            frames += 1;
            frame_ns += u128::from(event.duration_ns);
            continue;
        }
        let entry = phases.entry(event.name.as_str()).or_insert((0, 0, 0));
        entry.0 += 1;
        entry.1 += u128::from(event.duration_ns);
        entry.2 = entry.2.max(event.duration_ns);
    }

    let to_ms = |ns: u128| ns as f64 / 1_000_000.0;

    FrameStats {
        frames,
        avg_frame_ms: if frames == 0 {
            0.0
        } else {
            to_ms(frame_ns) / frames as f64
        },
        phases: phases
            .into_iter()
            .map(|(name, (calls, total_ns, max_ns))| PhaseStats {
                name: name.to_string(),
                calls,
                total_ms: to_ms(total_ns),
                avg_ms: to_ms(total_ns) / calls as f64,
                max_ms: to_ms(u128::from(max_ns)),
            })
            .collect(),
    }
}

/// RAII guard created by [`profile_scope!`]. Inert while profiling is disabled.
pub struct ProfileScope {
    active: Option<ActiveScope>,
}

struct ActiveScope {
    name: String,
    start: Instant,
    start_ns: u64,
    depth: u32,
    parent_name: Option<String>,
    location: Option<String>,
}

impl ProfileScope {
    pub fn new(name: impl Into<String>) -> Self {
        Self::new_with_location(name, None)
    }

    pub fn new_with_location(name: impl Into<String>, location: Option<String>) -> Self {
        if !PROFILER.is_enabled() {
            return Self { active: None };
        }

        let name = name.into();
        let (depth, parent_name) = SCOPES.with(|scopes| {
            let mut scopes = scopes.borrow_mut();
            let parent = scopes.names.last().cloned();
            scopes.names.push(name.clone());
            ((scopes.names.len() - 1) as u32, parent)
        });

        Self {
            active: Some(ActiveScope {
                name,
                start: Instant::now(),
                start_ns: PROFILER.now_ns(),
                depth,
                parent_name,
                location,
            }),
        }
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        let Some(scope) = self.active.take() else {
            return;
        };

        SCOPES.with(|scopes| {
            scopes.borrow_mut().names.pop();
        });

        PROFILER.submit(ProfileEvent {
            name: scope.name,
            thread_id: current_thread_id(),
            thread_name: thread_name(),
            parent_name: scope.parent_name,
            start_ns: scope.start_ns,
            duration_ns: scope.start.elapsed().as_nanos() as u64,
            depth: scope.depth,
            location: scope.location,
        });
    }
}

fn current_thread_id() -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish()
}

/// Profile the rest of the enclosing block
#[macro_export]
macro_rules! profile_scope {
    ($name:expr) => {
        let _profile_guard = $crate::ProfileScope::new($name);
    };
}

/// Same as [`profile_scope!`], tagged with `file:line`
#[macro_export]
macro_rules! profile_scope_loc {
    ($name:expr) => {
        let _profile_guard = $crate::ProfileScope::new_with_location(
            $name,
            Some(format!("{}:{}", file!(), line!())),
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str, duration_ms: u64) -> ProfileEvent {
        ProfileEvent {
            name: name.to_string(),
            thread_id: 1,
            thread_name: None,
            parent_name: None,
            start_ns: 0,
            duration_ns: duration_ms * 1_000_000,
            depth: 0,
            location: None,
        }
    }

    #[test]
    fn test_summarize_phases_and_frames() {
        let events = vec![
            event("sync", 2),
            event("render", 6),
            event("sync", 4),
            event(FRAME_MARKER, 10),
            event(FRAME_MARKER, 20),
        ];

        let stats = summarize(&events);
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.avg_frame_ms, 15.0);

        let sync = stats.phase("sync").unwrap();
        assert_eq!(sync.calls, 2);
        assert_eq!(sync.avg_ms, 3.0);
        assert_eq!(sync.max_ms, 4.0);
        assert_eq!(stats.phases[0].name, "render");
    }

    #[test]
    fn test_empty_summary() {
        let stats = summarize(&[]);
        assert_eq!(stats, FrameStats::default());
        assert!(stats.to_json().unwrap().contains("\"frames\": 0"));
    }

    #[test]
    fn test_nested_scopes_record_parent() {
        enable_profiling();
        {
            profile_scope!("nested_outer_scope_test");
            {
                profile_scope_loc!("nested_inner_scope_test");
            }
        }

        let events = all_events();
        let inner = events
            .iter()
            .find(|e| e.name == "nested_inner_scope_test")
            .expect("inner scope recorded");
        assert_eq!(inner.parent_name.as_deref(), Some("nested_outer_scope_test"));
        assert_eq!(inner.depth, 1);
        assert!(inner.location.is_some());
    }

    #[test]
    fn test_thread_name_is_per_thread() {
        set_thread_name("profiling-test-main");
        let other = std::thread::spawn(thread_name).join().unwrap();
        assert_eq!(other, None);
        assert_eq!(thread_name().as_deref(), Some("profiling-test-main"));
    }
}
