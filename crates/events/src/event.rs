use chrono::{DateTime, Utc};

use crate::TopicScoped;

/// A notification about one topic.
///
/// Notifications record something that already happened. They are published
/// one way and never acknowledged, so a payload must make sense to an
/// observer that joins late or misses earlier messages.
pub trait Event: TopicScoped + Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable dotted name (e.g. "job.item.completed"); also used as the SSE
    /// event name.
    fn event_type(&self) -> &'static str;

    fn occurred_at(&self) -> DateTime<Utc>;
}
