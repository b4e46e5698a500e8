//! Job stream registry.
//!
//! A job stream keeps the messages of one leased job id in submission
//! order. At most one message per job is handed to a pool at a time; the
//! next one is released by [`JobRegistry::advance`] once the previous one
//! finishes, so jobs stay ordered even though pools run many threads.
//!
//! Every lease carries a generation. A message that was admitted under an
//! earlier lease of the same id cannot advance a later stream.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use rcm_packet::DISCRETE_JOB_ID;
use tracing::debug;

use crate::error::{RcmError, Result};

/// Identifies one lease of a job id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct JobTicket {
    pub(crate) id: u16,
    generation: u64,
}

/// Outcome of submitting a job message.
pub(crate) enum Admission<T> {
    /// The stream was idle: the message may go straight to a pool.
    Ready(T, JobTicket),
    /// A previous message is still in flight; this one waits in the stream.
    Queued,
    /// No stream is leased under this id.
    UnknownJob(T),
}

struct JobStream<T> {
    generation: u64,
    state: Mutex<StreamState<T>>,
}

struct StreamState<T> {
    /// No message of this job is in a ready queue or executing.
    empty: bool,
    queue: VecDeque<T>,
}

struct JobTable<T> {
    last_id: u16,
    next_generation: u64,
    streams: HashMap<u16, Arc<JobStream<T>>>,
}

/// Leased job ids and their pending messages.
pub(crate) struct JobRegistry<T> {
    table: Mutex<JobTable<T>>,
}

impl<T> JobRegistry<T> {
    pub(crate) fn new() -> Self {
        Self {
            table: Mutex::new(JobTable {
                last_id: DISCRETE_JOB_ID,
                next_generation: 0,
                streams: HashMap::new(),
            }),
        }
    }

    /// Lease an unused job id.
    pub(crate) fn acquire(&self) -> Result<u16> {
        let mut table = self.table.lock();

        for _ in 0..u16::MAX {
            table.last_id = table.last_id.wrapping_add(1);
            if table.last_id == DISCRETE_JOB_ID {
                table.last_id = table.last_id.wrapping_add(1);
            }
            let id = table.last_id;
            if table.streams.contains_key(&id) {
                continue;
            }

            let generation = table.next_generation;
            table.next_generation += 1;
            table.streams.insert(
                id,
                Arc::new(JobStream {
                    generation,
                    state: Mutex::new(StreamState {
                        empty: true,
                        queue: VecDeque::new(),
                    }),
                }),
            );
            debug!(job_id = id, generation, "acquired job id");
            return Ok(id);
        }

        Err(RcmError::JobIdsExhausted)
    }

    /// Release a job id, returning the messages that never ran.
    pub(crate) fn release(&self, id: u16) -> Result<Vec<T>> {
        let stream = self
            .table
            .lock()
            .streams
            .remove(&id)
            .ok_or(RcmError::JobIdNotFound(id))?;

        let drained: Vec<T> = stream.state.lock().queue.drain(..).collect();
        debug!(job_id = id, unprocessed = drained.len(), "released job id");
        Ok(drained)
    }

    /// Submit a message for job `id`.
    pub(crate) fn admit(&self, id: u16, item: T) -> Admission<T> {
        let Some(stream) = self.stream(id) else {
            return Admission::UnknownJob(item);
        };

        let mut state = stream.state.lock();
        if state.empty {
            state.empty = false;
            Admission::Ready(
                item,
                JobTicket {
                    id,
                    generation: stream.generation,
                },
            )
        } else {
            state.queue.push_back(item);
            Admission::Queued
        }
    }

    /// Called when a message admitted under `ticket` has finished executing.
    ///
    /// Returns the job's next message, keeping the stream busy, or marks
    /// the stream idle when nothing is queued. A ticket from a released
    /// lease is ignored, even if the id has been leased again since.
    pub(crate) fn advance(&self, ticket: JobTicket) -> Option<T> {
        let stream = self.stream(ticket.id)?;
        if stream.generation != ticket.generation {
            debug!(job_id = ticket.id, "stale job ticket");
            return None;
        }

        let mut state = stream.state.lock();
        match state.queue.pop_front() {
            Some(next) => Some(next),
            None => {
                state.empty = true;
                None
            }
        }
    }

    /// Empty every stream, returning their queued messages.
    pub(crate) fn drain_all(&self) -> Vec<T> {
        let streams: Vec<Arc<JobStream<T>>> =
            self.table.lock().streams.values().cloned().collect();

        let mut drained = Vec::new();
        for stream in streams {
            drained.extend(stream.state.lock().queue.drain(..));
        }
        drained
    }

    /// Number of leased job ids.
    pub(crate) fn len(&self) -> usize {
        self.table.lock().streams.len()
    }

    fn stream(&self, id: u16) -> Option<Arc<JobStream<T>>> {
        self.table.lock().streams.get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn ready<T: PartialEq + std::fmt::Debug>(admission: Admission<T>, expected: T) -> JobTicket {
        match admission {
            Admission::Ready(item, ticket) => {
                assert_eq!(item, expected);
                ticket
            }
            Admission::Queued => panic!("expected Ready, got Queued"),
            Admission::UnknownJob(_) => panic!("expected Ready, got UnknownJob"),
        }
    }

    #[test]
    fn acquired_ids_are_unique_and_non_discrete() {
        let registry = JobRegistry::<u32>::new();
        let mut seen = HashSet::new();
        for _ in 0..100 {
            let id = registry.acquire().unwrap();
            assert_ne!(id, DISCRETE_JOB_ID);
            assert!(seen.insert(id), "id {id} leased twice");
        }
        assert_eq!(registry.len(), 100);
    }

    #[test]
    fn acquire_skips_live_ids_after_wrap() {
        let registry = JobRegistry::<u32>::new();
        let first = registry.acquire().unwrap();
        assert_eq!(first, 1);

        registry.table.lock().last_id = u16::MAX;
        let wrapped = registry.acquire().unwrap();
        assert_eq!(wrapped, 2, "0 is discrete and 1 is still leased");
    }

    #[test]
    fn released_id_can_be_leased_again() {
        let registry = JobRegistry::<u32>::new();
        let id = registry.acquire().unwrap();
        registry.release(id).unwrap();
        assert_eq!(registry.len(), 0);

        registry.table.lock().last_id = id - 1;
        assert_eq!(registry.acquire().unwrap(), id);
    }

    #[test]
    fn exhausted_id_space_is_an_error() {
        let registry = JobRegistry::<u32>::new();
        for _ in 0..u16::MAX {
            registry.acquire().unwrap();
        }
        assert!(matches!(
            registry.acquire(),
            Err(RcmError::JobIdsExhausted)
        ));
    }

    #[test]
    fn release_unknown_id_fails() {
        let registry = JobRegistry::<u32>::new();
        assert!(matches!(
            registry.release(9),
            Err(RcmError::JobIdNotFound(9))
        ));
    }

    #[test]
    fn first_message_is_ready_rest_are_queued_in_order() {
        let registry = JobRegistry::new();
        let id = registry.acquire().unwrap();

        let ticket = ready(registry.admit(id, 1), 1);
        assert!(matches!(registry.admit(id, 2), Admission::Queued));
        assert!(matches!(registry.admit(id, 3), Admission::Queued));

        assert_eq!(registry.advance(ticket), Some(2));
        assert_eq!(registry.advance(ticket), Some(3));
        assert_eq!(registry.advance(ticket), None);

        // Idle again: the next message takes the fast path.
        assert_eq!(ready(registry.admit(id, 4), 4), ticket);
    }

    #[test]
    fn admit_to_unknown_job_returns_message() {
        let registry = JobRegistry::new();
        assert!(matches!(registry.admit(5, 42), Admission::UnknownJob(42)));
    }

    #[test]
    fn release_returns_queued_messages() {
        let registry = JobRegistry::new();
        let id = registry.acquire().unwrap();
        let ticket = ready(registry.admit(id, 'a'), 'a');
        for item in ['b', 'c', 'd'] {
            assert!(matches!(registry.admit(id, item), Admission::Queued));
        }

        assert_eq!(registry.release(id).unwrap(), vec!['b', 'c', 'd']);
        assert_eq!(registry.advance(ticket), None);
    }

    #[test]
    fn drain_all_empties_every_stream() {
        let registry = JobRegistry::new();
        let a = registry.acquire().unwrap();
        let b = registry.acquire().unwrap();
        for (id, item) in [(a, 1), (a, 2), (b, 10), (b, 11), (b, 12)] {
            let _ = registry.admit(id, item);
        }

        let mut drained = registry.drain_all();
        drained.sort_unstable();
        assert_eq!(drained, vec![2, 11, 12]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn ticket_from_released_lease_cannot_advance_new_stream() {
        let registry = JobRegistry::new();
        let id = registry.acquire().unwrap();
        let old = ready(registry.admit(id, 1), 1);
        registry.release(id).unwrap();

        // Lease the same id again while the old message is still "running".
        registry.table.lock().last_id = id - 1;
        assert_eq!(registry.acquire().unwrap(), id);
        let current = ready(registry.admit(id, 10), 10);
        assert_ne!(old, current);
        assert!(matches!(registry.admit(id, 11), Admission::Queued));

        // The old message finishing must neither release 11 nor idle the stream.
        assert_eq!(registry.advance(old), None);
        assert!(matches!(registry.admit(id, 12), Admission::Queued));

        assert_eq!(registry.advance(current), Some(11));
        assert_eq!(registry.advance(current), Some(12));
        assert_eq!(registry.advance(current), None);
    }
}
