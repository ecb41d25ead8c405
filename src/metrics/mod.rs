//! Metrics and observability infrastructure for flurry.
//!
//! This module groups all observability-related components:
//! - `events`: Internal event types and the `InternalEvent` trait
//! - `server`: Prometheus HTTP server and initialization

pub mod events;
pub mod server;

pub use server::init;

/// Emit an internal event.
///
/// This macro calls the `InternalEvent::emit()` method on the given event,
/// which records the corresponding Prometheus metric.
///
/// # Example
///
/// ```ignore
/// use flurry::metrics::events::{EventsReceived, RowsDropped};
///
/// emit!(EventsReceived { count: 100 });
/// emit!(RowsDropped { count: 12 });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}
