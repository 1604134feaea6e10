//! Publishing job lifecycle notifications.

use std::collections::HashMap;
use std::sync::Mutex;

use forgejobs_core::JobId;
use forgejobs_events::{EventBus, EventEnvelope};
use forgejobs_jobs::JobEvent;
use tracing::warn;

/// One-way notification sink. Publishing never fails from the caller's view;
/// delivery problems are logged and swallowed.
pub trait JobEventSink: Send + Sync {
    fn publish(&self, event: JobEvent);
}

/// Jobs whose sequence counters a [`BusJobEventSink`] keeps by default.
pub const DEFAULT_TRACKED_JOBS: usize = 10_000;

/// Wraps events in envelopes with a per-job sequence number and puts them on
/// a bus.
///
/// Counters are kept for at most `capacity` jobs; past that the job that
/// published least recently is forgotten. A forgotten job that publishes
/// again (e.g. after a retry) restarts its sequence at 1.
pub struct BusJobEventSink<B> {
    bus: B,
    sequences: Mutex<Sequences>,
}

#[derive(Debug)]
struct Sequences {
    counters: HashMap<JobId, Counter>,
    capacity: usize,
    clock: u64,
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    last: u64,
    touched: u64,
}

impl Sequences {
    fn new(capacity: usize) -> Self {
        Self {
            counters: HashMap::new(),
            capacity: capacity.max(1),
            clock: 0,
        }
    }

    fn next(&mut self, job_id: JobId) -> u64 {
        self.clock += 1;
        if !self.counters.contains_key(&job_id) && self.counters.len() >= self.capacity {
            self.evict_stalest();
        }
        let counter = self.counters.entry(job_id).or_insert(Counter {
            last: 0,
            touched: 0,
        });
        counter.last += 1;
        counter.touched = self.clock;
        counter.last
    }

    fn evict_stalest(&mut self) {
        let stalest = self
            .counters
            .iter()
            .min_by_key(|(_, c)| c.touched)
            .map(|(id, _)| *id);
        if let Some(id) = stalest {
            self.counters.remove(&id);
        }
    }
}

impl<B> BusJobEventSink<B>
where
    B: EventBus<EventEnvelope<JobEvent>>,
{
    pub fn new(bus: B) -> Self {
        Self::with_capacity(bus, DEFAULT_TRACKED_JOBS)
    }

    pub fn with_capacity(bus: B, capacity: usize) -> Self {
        Self {
            bus,
            sequences: Mutex::new(Sequences::new(capacity)),
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Jobs currently holding a sequence counter.
    pub fn tracked_jobs(&self) -> usize {
        self.sequences.lock().map(|s| s.counters.len()).unwrap_or(0)
    }
}

impl<B> JobEventSink for BusJobEventSink<B>
where
    B: EventBus<EventEnvelope<JobEvent>>,
{
    fn publish(&self, event: JobEvent) {
        let job_id = event.job_id();

        // Held across publish so sequence order matches delivery order.
        let Ok(mut sequences) = self.sequences.lock() else {
            warn!(job_id = %job_id, "event sequence lock poisoned; dropping event");
            return;
        };
        let seq = sequences.next(job_id);

        let envelope = EventEnvelope::wrap(seq, event);
        if let Err(e) = self.bus.publish(envelope) {
            warn!(job_id = %job_id, error = ?e, "failed to publish job event");
        }
    }
}

/// Keeps every event in memory, for tests.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<JobEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<JobEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Events for one job, in publish order.
    pub fn events_for(&self, job_id: JobId) -> Vec<JobEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.job_id() == job_id)
            .collect()
    }
}

impl JobEventSink for RecordingEventSink {
    fn publish(&self, event: JobEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use forgejobs_events::{InMemoryEventBus, TopicScoped};
    use std::sync::Arc;

    fn started(job_id: JobId, item_index: u32) -> JobEvent {
        JobEvent::ItemStarted {
            job_id,
            item_index,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn sequences_are_per_job_and_start_at_one() {
        let bus: Arc<InMemoryEventBus<EventEnvelope<JobEvent>>> = Arc::new(InMemoryEventBus::new());
        let sub = bus.subscribe();
        let sink = BusJobEventSink::new(bus.clone());
        let a = JobId::new();
        let b = JobId::new();

        sink.publish(started(a, 0));
        sink.publish(started(b, 0));
        sink.publish(started(a, 1));

        let got: Vec<_> = sub
            .drain()
            .into_iter()
            .map(|env| (env.topic(), env.sequence_number(), env.event_type().to_string()))
            .collect();
        assert_eq!(
            got,
            vec![
                (a, 1, "job.item.started".to_string()),
                (b, 1, "job.item.started".to_string()),
                (a, 2, "job.item.started".to_string()),
            ]
        );
    }

    #[test]
    fn counters_are_bounded_and_evict_the_least_recent_job() {
        let bus: Arc<InMemoryEventBus<EventEnvelope<JobEvent>>> = Arc::new(InMemoryEventBus::new());
        let sub = bus.subscribe();
        let sink = BusJobEventSink::with_capacity(bus.clone(), 2);
        let (a, b, c) = (JobId::new(), JobId::new(), JobId::new());

        sink.publish(started(a, 0));
        sink.publish(started(b, 0));
        sink.publish(started(a, 1));
        sink.publish(started(c, 0));
        assert_eq!(sink.tracked_jobs(), 2);

        // b went quiet longest, so it was dropped and starts over.
        sink.publish(started(b, 1));
        sink.publish(started(c, 1));

        let got: Vec<_> = sub
            .drain()
            .into_iter()
            .map(|env| (env.topic(), env.sequence_number()))
            .collect();
        assert_eq!(got, vec![(a, 1), (b, 1), (a, 2), (c, 1), (b, 1), (c, 2)]);
        assert_eq!(sink.tracked_jobs(), 2);
    }

    #[test]
    fn topic_filter_selects_one_job() {
        let bus: Arc<InMemoryEventBus<EventEnvelope<JobEvent>>> = Arc::new(InMemoryEventBus::new());
        let sub = bus.subscribe();
        let sink = BusJobEventSink::new(bus);
        let a = JobId::new();

        sink.publish(started(JobId::new(), 0));
        sink.publish(started(a, 3));

        let mine: Vec<_> = sub
            .drain()
            .into_iter()
            .filter(|env| TopicScoped::topic(env) == a)
            .collect();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].payload().job_id(), a);
    }

    #[test]
    fn recording_sink_filters_by_job() {
        let sink = RecordingEventSink::new();
        let a = JobId::new();
        sink.publish(started(a, 0));
        sink.publish(started(JobId::new(), 0));
        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.events_for(a).len(), 1);
    }
}
