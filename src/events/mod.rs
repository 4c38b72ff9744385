//! Progress reporting for builds in flight.
//!
//! The runner's workers publish [`Event`]s onto a shared [`EventBus`]; the
//! CLI subscribes and drains them into terminal output. Publishing never
//! blocks, and each event is delivered to exactly one subscriber, so a
//! single drain loop sees the whole build in publish order.

mod event;

pub use event::*;

use crossbeam::deque::{Injector, Steal, Worker};
use std::sync::Arc;

/// The shared side of the bus. Cloning is cheap; all clones publish into
/// the same queue.
#[derive(Clone, Debug, Default)]
pub struct EventBus {
    queue: Arc<Injector<Event>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes one event. Safe to call from any worker at any time.
    pub fn send(&self, event: Event) {
        self.queue.push(event);
    }

    /// A handle that drains events off this bus.
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            queue: self.queue.clone(),
            pending: Worker::new_fifo(),
        }
    }
}

/// The receiving side of the bus. Events land in a local batch before being
/// handed out, which keeps drains cheap while workers keep publishing.
pub struct EventStream {
    queue: Arc<Injector<Event>>,
    pending: Worker<Event>,
}

impl EventStream {
    /// Everything published since the last drain, in publish order.
    pub fn drain(&self) -> Vec<Event> {
        loop {
            match self.queue.steal_batch(&self.pending) {
                Steal::Success(()) | Steal::Retry => continue,
                Steal::Empty => break,
            }
        }

        let mut events = vec![];
        while let Some(event) = self.pending.pop() {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RunResult, TaskStatus};

    fn task_lifecycle(task_id: &str) -> Vec<Event> {
        vec![
            Event::TaskResolving {
                task_id: task_id.to_string(),
            },
            Event::TaskEvaluated {
                task_id: task_id.to_string(),
                status: TaskStatus::Pending,
            },
            Event::TaskExecuting {
                task_id: task_id.to_string(),
            },
            Event::TaskCompleted {
                task_id: task_id.to_string(),
                result: RunResult::Success,
                run_id: Some(1),
            },
        ]
    }

    #[test]
    fn a_run_is_observed_in_publish_order() {
        let bus = EventBus::new();
        let stream = bus.subscribe();

        bus.send(Event::RunnerStarted { task_count: 1 });
        for event in task_lifecycle("demo.build") {
            bus.send(event);
        }
        bus.send(Event::RunnerFinished);

        let observed = stream.drain();
        assert_eq!(observed.len(), 6);
        assert_matches!(observed[0], Event::RunnerStarted { task_count: 1 });
        assert_matches!(
            observed[3],
            Event::TaskExecuting { ref task_id } if task_id == "demo.build"
        );
        assert_matches!(observed.last(), Some(Event::RunnerFinished));
    }

    #[test]
    fn draining_consumes_each_event_once() {
        let bus = EventBus::new();
        let stream = bus.subscribe();

        bus.send(Event::TaskSkipped {
            task_id: "demo.build".to_string(),
            existing_run_id: Some(7),
        });

        assert_matches!(
            stream.drain().as_slice(),
            [Event::TaskSkipped {
                existing_run_id: Some(7),
                ..
            }]
        );
        assert!(stream.drain().is_empty());
    }

    #[test]
    fn events_published_after_a_drain_are_picked_up_by_the_next_one() {
        let bus = EventBus::new();
        let stream = bus.subscribe();

        bus.send(Event::TaskErrored {
            task_id: "demo.build".to_string(),
            error: "boom".to_string(),
        });
        assert_eq!(stream.drain().len(), 1);

        bus.send(Event::RunnerFinished);
        assert_matches!(stream.drain().as_slice(), [Event::RunnerFinished]);
    }

    #[test]
    fn publishers_on_cloned_handles_share_one_queue() {
        let bus = EventBus::new();
        let stream = bus.subscribe();

        let publisher = bus.clone();
        publisher.send(Event::TaskExecuting {
            task_id: "demo.build".to_string(),
        });
        bus.send(Event::TaskExecuting {
            task_id: "demo.check".to_string(),
        });

        assert_eq!(stream.drain().len(), 2);
    }
}
