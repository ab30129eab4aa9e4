//! Cancellable scheduled task handle
//!
//! The engine never runs background work itself; schedulers hand it opaque
//! handles that the completion cascade cancels. Cancellation is advisory -
//! a callback that is already running completes.

/// Handle to a scheduled background task attached to a transaction.
pub trait ScheduledTask: Send + Sync {
    /// Request cancellation. Must be safe to call more than once.
    fn cancel(&self);
}

impl<T: ScheduledTask + ?Sized> ScheduledTask for std::sync::Arc<T> {
    fn cancel(&self) {
        (**self).cancel();
    }
}
