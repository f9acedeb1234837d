//! Messages posted from the control thread to a render thread.
//!
//! Every variant the control thread waits on carries the barrier `ticket` it
//! waits for; the render thread acknowledges exactly that ticket.

use std::fmt;

use crate::backend::{OffscreenSurface, SharedWindow, Size, WindowId};

pub(crate) type Ticket = u64;

pub(crate) enum RenderThreadEvent {
    /// The window is no longer exposed: stop rendering it and release currency.
    Obscure { window: WindowId, ticket: Ticket },
    /// Sync the window's scene graph; with `in_expose` the ack waits for the first frame.
    RequestSync {
        window: SharedWindow,
        size: Size,
        in_expose: bool,
        force_repaint: bool,
        ticket: Ticket,
    },
    /// Release GPU and scene graph resources unless the thread still renders a window.
    TryRelease {
        window: SharedWindow,
        in_destructor: bool,
        fallback_surface: Option<OffscreenSurface>,
        ticket: Ticket,
    },
    /// Synchronous sync + render + readback.
    Grab { window: SharedWindow, ticket: Ticket },
    /// Render the next pass even without scene changes.
    RequestRepaint,
}

impl fmt::Debug for RenderThreadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderThreadEvent::Obscure { window, ticket } => {
                write!(f, "Obscure(window={window}, ticket={ticket})")
            }
            RenderThreadEvent::RequestSync {
                window,
                size,
                in_expose,
                force_repaint,
                ticket,
            } => write!(
                f,
                "RequestSync(window={}, size={size}, in_expose={in_expose}, force_repaint={force_repaint}, ticket={ticket})",
                window.id()
            ),
            RenderThreadEvent::TryRelease {
                window,
                in_destructor,
                fallback_surface,
                ticket,
            } => write!(
                f,
                "TryRelease(window={}, in_destructor={in_destructor}, fallback={}, ticket={ticket})",
                window.id(),
                fallback_surface.is_some()
            ),
            RenderThreadEvent::Grab { window, ticket } => {
                write!(f, "Grab(window={}, ticket={ticket})", window.id())
            }
            RenderThreadEvent::RequestRepaint => write!(f, "RequestRepaint"),
        }
    }
}
