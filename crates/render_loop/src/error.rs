//! Errors raised by the render loops and the policy for reporting them.
//!
//! Only resource-creation failures and protocol misuse ever reach the caller.
//! Context loss, bad geometry and failed frames are absorbed by the loops and
//! retried on the next natural cycle.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::backend::{GraphicsApi, WindowId};

/// Errors that can occur while driving a render loop
#[derive(Debug, thiserror::Error)]
pub enum RenderLoopError {
    #[error("Failed to create {api} context for window {window}: {reason}")]
    ContextCreation {
        window: WindowId,
        api: GraphicsApi,
        reason: String,
    },

    #[error("Render thread for window {window} failed to start: {reason}")]
    ThreadStart { window: WindowId, reason: String },

    #[error("Window {0} is not managed by this render loop")]
    UnknownWindow(WindowId),

    #[error("{operation} may only be called from the control thread, or from the render thread while it is syncing")]
    WrongThread { operation: &'static str },

    #[error("A render loop is already installed for this process")]
    AlreadyInstalled,

    #[error("Invalid render loop configuration: {0}")]
    Config(String),
}

impl RenderLoopError {
    /// Whether the default policy for this error, when nobody handles it, is to terminate.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RenderLoopError::ContextCreation { .. } | RenderLoopError::ThreadStart { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RenderLoopError>;

/// Observer offered every fatal error first. Returns `true` when it handled the error.
pub type ErrorHandler = Arc<dyn Fn(&RenderLoopError) -> bool + Send + Sync>;

/// Runs when a fatal error was not handled by the [`ErrorHandler`].
pub type FatalHandler = Arc<dyn Fn(&RenderLoopError) + Send + Sync>;

/// The documented default: log and abort the process.
pub fn default_fatal_handler() -> FatalHandler {
    Arc::new(|error: &RenderLoopError| {
        tracing::error!("[RENDER-LOOP] ❌ FATAL: {}", error);
        std::process::abort();
    })
}

/// Routes fatal errors to the installed observer, falling back to the fatal handler.
pub(crate) struct ErrorSink {
    handler: RwLock<Option<ErrorHandler>>,
    fatal: RwLock<FatalHandler>,
}

impl ErrorSink {
    pub(crate) fn new() -> Self {
        Self {
            handler: RwLock::new(None),
            fatal: RwLock::new(default_fatal_handler()),
        }
    }

    pub(crate) fn set_handler(&self, handler: Option<ErrorHandler>) {
        *self.handler.write() = handler;
    }

    pub(crate) fn set_fatal_handler(&self, handler: FatalHandler) {
        *self.fatal.write() = handler;
    }

    pub(crate) fn report(&self, error: &RenderLoopError) {
        tracing::error!("[RENDER-LOOP] {}", error);

        let handler = self.handler.read().clone();
        if let Some(handler) = handler {
            if handler(error) {
                return;
            }
        }

        if error.is_fatal() {
            let fatal = self.fatal.read().clone();
            fatal(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context_error() -> RenderLoopError {
        RenderLoopError::ContextCreation {
            window: 7,
            api: GraphicsApi::OpenGl,
            reason: "no display".to_string(),
        }
    }

    #[test]
    fn test_unhandled_fatal_error_reaches_fatal_handler() {
        let sink = ErrorSink::new();
        let fatal_calls = Arc::new(AtomicUsize::new(0));
        let counter = fatal_calls.clone();
        sink.set_fatal_handler(Arc::new(move |_: &RenderLoopError| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        sink.report(&context_error());
        assert_eq!(fatal_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handled_error_skips_fatal_handler() {
        let sink = ErrorSink::new();
        let fatal_calls = Arc::new(AtomicUsize::new(0));
        let counter = fatal_calls.clone();
        sink.set_fatal_handler(Arc::new(move |_: &RenderLoopError| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        sink.set_handler(Some(Arc::new(|_: &RenderLoopError| true)));

        sink.report(&context_error());
        assert_eq!(fatal_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_non_fatal_errors_never_terminate() {
        let sink = ErrorSink::new();
        let fatal_calls = Arc::new(AtomicUsize::new(0));
        let counter = fatal_calls.clone();
        sink.set_fatal_handler(Arc::new(move |_: &RenderLoopError| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        sink.report(&RenderLoopError::UnknownWindow(3));
        assert_eq!(fatal_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_error_messages() {
        let message = context_error().to_string();
        assert!(message.contains("OpenGL"));
        assert!(message.contains("window 7"));
    }
}
