#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Event system for fetchup
//!
//! This crate is the Event Sink through which progress, completion and
//! failure notifications flow outward to the boundary layer.
//!
//! ## Architecture
//!
//! - **Domain-driven events**: events grouped by functional domain (Download, Extract, Update)
//! - **Per-subscriber channels**: [`EventBus::subscribe`] hands out a typed
//!   channel; [`EventBus::unsubscribe`] or dropping the subscription detaches it
//! - **Tracing integration**: every published event is also logged

pub mod bus;
pub mod logging;
pub mod meta;

pub use bus::{EventBus, EventMessage, SubscriberId, Subscription};
pub use meta::{EventLevel, EventMeta, EventSource};

pub mod events;
pub use events::{
    AppEvent, DownloadEvent, ExtractEvent, FailureContext, UpdateEvent, UpdateStage,
};

/// The unified trait for emitting events throughout fetchup
///
/// Components holding an optional bus implement this to get the helper
/// methods; the bus itself implements it directly.
pub trait EventEmitter {
    /// Get the bus for this emitter
    fn event_bus(&self) -> Option<&EventBus>;

    /// Emit an event through this emitter
    fn emit(&self, event: AppEvent) {
        if let Some(bus) = self.event_bus() {
            bus.publish(event);
        }
    }

    fn emit_download(&self, event: DownloadEvent) {
        self.emit(AppEvent::Download(event));
    }

    fn emit_extract(&self, event: ExtractEvent) {
        self.emit(AppEvent::Extract(event));
    }

    fn emit_update(&self, event: UpdateEvent) {
        self.emit(AppEvent::Update(event));
    }
}

impl EventEmitter for EventBus {
    fn event_bus(&self) -> Option<&EventBus> {
        Some(self)
    }
}

impl EventEmitter for Option<EventBus> {
    fn event_bus(&self) -> Option<&EventBus> {
        self.as_ref()
    }
}
