use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use forgejobs_core::JobId;

use crate::{Event, TopicScoped};

/// Envelope for a published event, carrying topic + ordering metadata.
///
/// Notes:
/// - The **topic** is the job the event describes; subscribers filter on it.
/// - `sequence_number` increases monotonically per topic, so observers can
///   detect gaps or reordering.
/// - `payload` is the domain event itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    topic: JobId,
    event_type: String,

    /// Monotonically increasing position in the topic stream.
    sequence_number: u64,

    occurred_at: DateTime<Utc>,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        topic: JobId,
        event_type: impl Into<String>,
        sequence_number: u64,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            topic,
            event_type: event_type.into(),
            sequence_number,
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn topic(&self) -> JobId {
        self.topic
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl<E: Event> EventEnvelope<E> {
    /// Wrap a typed event, copying its topic, type name and timestamp.
    pub fn wrap(sequence_number: u64, event: E) -> Self {
        Self::new(
            Uuid::now_v7(),
            event.topic(),
            event.event_type(),
            sequence_number,
            event.occurred_at(),
            event,
        )
    }
}
