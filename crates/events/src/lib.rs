//! Notification mechanics: events, envelopes, and a pub/sub bus.
//!
//! Nothing here knows about jobs beyond the topic identifier; the job domain
//! defines its own event payloads and publishes them through [`EventBus`].

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod topic;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use topic::TopicScoped;
