use forgejobs_core::JobId;

use crate::EventEnvelope;

/// Messages that belong to a single topic (the job they describe).
///
/// Subscription loops use this to forward only the messages an observer asked
/// for, e.g. a progress stream opened for one job.
pub trait TopicScoped {
    fn topic(&self) -> JobId;
}

impl<E> TopicScoped for EventEnvelope<E> {
    fn topic(&self) -> JobId {
        self.topic()
    }
}
