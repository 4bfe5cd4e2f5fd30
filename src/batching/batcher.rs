use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use log::{debug, warn};

use crate::ai::Evaluation;
use crate::batching::slot::{Ready, SlotSet};
use crate::error::{BatchError, NetworkError};

/// Counters reported by [`InferenceBatcher::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Notifications handled, one evaluation call each.
    pub batches: usize,
    /// Rows evaluated across all batches.
    pub positions: usize,
    /// Batches handled per route.
    pub per_route: Vec<usize>,
    /// Submissions counted on the worker side.
    pub submitted: usize,
    pub games_completed: usize,
    pub workers_finished: usize,
}

/// Coordinator that evaluates each ready slot in one network call and hands
/// the buffers back to the worker that owns them.
#[derive(Debug, Clone)]
pub struct InferenceBatcher {
    poll_interval: Duration,
}

impl InferenceBatcher {
    pub fn new(poll_interval: Duration) -> Self {
        InferenceBatcher { poll_interval }
    }

    /// Serve `slots` until every worker has finished.
    ///
    /// `eval(route, observations, rows)` is called once per notification.
    /// `on_progress` sees the completed-game count each time it changes.
    /// Any evaluation error ends the phase: the slot set is dropped, which
    /// wakes every waiting worker with [`BatchError::Aborted`].
    pub fn run<E, P>(&self, slots: SlotSet, mut eval: E, mut on_progress: P) -> Result<BatchStats, BatchError>
    where
        E: FnMut(usize, &[f32], usize) -> Result<Evaluation, NetworkError>,
        P: FnMut(usize),
    {
        let progress = slots.progress();
        let mut stats = BatchStats {
            per_route: vec![0; slots.routes],
            ..Default::default()
        };
        let mut reported = 0;

        while progress.workers_finished() < slots.workers {
            match slots.ready.recv_timeout(self.poll_interval) {
                Ok(ready) => self.serve(&slots, ready, &mut eval, &mut stats)?,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("all slot handles dropped, stopping batcher");
                    break;
                }
            }

            let games = progress.games_completed();
            if games != reported {
                reported = games;
                on_progress(games);
            }
        }
        if progress.games_completed() != reported {
            on_progress(progress.games_completed());
        }

        stats.submitted = progress.batches_submitted();
        stats.games_completed = progress.games_completed();
        stats.workers_finished = progress.workers_finished();
        debug!(
            "batcher done: {} batches, {} positions, {} games",
            stats.batches, stats.positions, stats.games_completed
        );
        Ok(stats)
    }

    fn serve<E>(&self, slots: &SlotSet, ready: Ready, eval: &mut E, stats: &mut BatchStats) -> Result<(), BatchError>
    where
        E: FnMut(usize, &[f32], usize) -> Result<Evaluation, NetworkError>,
    {
        let Ready {
            slot,
            route,
            mut buffers,
        } = ready;
        let rows = buffers.rows();

        if rows > 0 {
            let output = eval(route, buffers.staged_input(), rows)
                .map_err(|source| BatchError::Evaluation { slot, source })?;

            let expected = rows * slots.action_size;
            if output.policy.len() != expected {
                return Err(BatchError::ShapeMismatch {
                    slot,
                    what: "policy",
                    expected,
                    actual: output.policy.len(),
                });
            }
            if output.value.len() != rows {
                return Err(BatchError::ShapeMismatch {
                    slot,
                    what: "value",
                    expected: rows,
                    actual: output.value.len(),
                });
            }
            buffers.write_outputs(&output.policy, &output.value);
        }

        stats.batches += 1;
        stats.positions += rows;
        if let Some(count) = stats.per_route.get_mut(route) {
            *count += 1;
        }

        if slots.done[slot].send(buffers).is_err() {
            warn!("worker for slot {} went away before its batch returned", slot);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn uniform(_route: usize, obs: &[f32], rows: usize) -> Result<Evaluation, NetworkError> {
        assert_eq!(obs.len(), rows);
        Ok(Evaluation {
            policy: vec![0.5; rows * 2],
            value: obs.to_vec(),
        })
    }

    #[test]
    fn test_run_serves_every_submission() {
        let (slots, handles) = SlotSet::new(3, 1, 4, 1, 2);
        let progress = slots.progress();
        let batcher = InferenceBatcher::new(Duration::from_millis(5));

        let stats = thread::scope(|s| {
            for (w, mut worker_slots) in handles.into_iter().enumerate() {
                let guard = progress.finish_guard();
                s.spawn(move || {
                    let _guard = guard;
                    let slot = &mut worker_slots[0];
                    for round in 0..5 {
                        let buffers = slot.buffers_mut().unwrap();
                        buffers.clear();
                        for _ in 0..=(round % 3) {
                            buffers.stage().unwrap().1[0] = w as f32;
                        }
                        slot.submit().unwrap();
                        let buffers = slot.buffers().unwrap();
                        assert_eq!(buffers.value_row(0), w as f32);
                        assert_eq!(buffers.policy_row(0), &[0.5, 0.5]);
                    }
                    slot.progress().game_completed();
                });
            }
            batcher.run(slots, uniform, |_| {}).unwrap()
        });

        assert_eq!(stats.batches, 15);
        assert_eq!(stats.batches, stats.submitted);
        assert_eq!(stats.positions, 3 * (1 + 2 + 3 + 1 + 2));
        assert_eq!(stats.per_route, vec![15]);
        assert_eq!(stats.games_completed, 3);
        assert_eq!(stats.workers_finished, 3);
    }

    #[test]
    fn test_run_returns_when_workers_never_submit() {
        let (slots, handles) = SlotSet::new(2, 1, 4, 1, 2);
        let progress = slots.progress();
        let guards: Vec<_> = (0..2).map(|_| progress.finish_guard()).collect();
        drop(guards);

        let batcher = InferenceBatcher::new(Duration::from_millis(5));
        let stats = batcher.run(slots, uniform, |_| {}).unwrap();
        assert_eq!(stats.batches, 0);
        drop(handles);
    }

    #[test]
    fn test_eval_failure_aborts_waiting_workers() {
        let (slots, handles) = SlotSet::new(2, 1, 2, 1, 2);
        let progress = slots.progress();
        let batcher = InferenceBatcher::new(Duration::from_millis(5));

        let (result, worker_results) = thread::scope(|s| {
            let joins: Vec<_> = handles
                .into_iter()
                .map(|mut worker_slots| {
                    let guard = progress.finish_guard();
                    s.spawn(move || {
                        let _guard = guard;
                        let slot = &mut worker_slots[0];
                        slot.buffers_mut()?.stage();
                        slot.submit()
                    })
                })
                .collect();
            let result = batcher.run(
                slots,
                |_, _, _| Err(NetworkError::Backend("device lost".into())),
                |_| {},
            );
            let worker_results: Vec<_> = joins.into_iter().map(|j| j.join().unwrap()).collect();
            (result, worker_results)
        });

        assert!(matches!(result, Err(BatchError::Evaluation { .. })));
        assert!(worker_results
            .iter()
            .all(|r| matches!(r, Err(BatchError::Aborted(_)))));
    }

    #[test]
    fn test_shape_mismatch_is_fatal() {
        let (slots, mut handles) = SlotSet::new(1, 1, 2, 1, 3);
        let slot = &mut handles[0][0];
        slot.buffers_mut().unwrap().stage();
        slot.send().unwrap();

        let batcher = InferenceBatcher::new(Duration::from_millis(5));
        let result = batcher.run(
            slots,
            |_, _, rows| {
                Ok(Evaluation {
                    policy: vec![0.0; 2],
                    value: vec![0.0; rows],
                })
            },
            |_| {},
        );
        assert!(matches!(
            result,
            Err(BatchError::ShapeMismatch {
                what: "policy",
                expected: 3,
                actual: 2,
                ..
            })
        ));
    }
}
