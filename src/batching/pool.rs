use std::thread;

use log::{debug, error};

use crate::ai::Evaluation;
use crate::batching::batcher::{BatchStats, InferenceBatcher};
use crate::batching::slot::{SlotHandle, SlotSet};
use crate::error::{BatchError, NetworkError};

/// Split `games` across `workers`; the first `games % workers` take one extra.
pub fn split_games(games: usize, workers: usize) -> Vec<usize> {
    let base = games / workers;
    let extra = games % workers;
    (0..workers).map(|w| base + usize::from(w < extra)).collect()
}

/// Derive a deterministic seed for a given worker or episode index.
pub fn derive_seed(base_seed: u64, index: usize) -> u64 {
    // FNV-1a-inspired mixing for deterministic, well-distributed seeds
    let mut hash = base_seed ^ 0x517cc1b727220a95;
    let index = index as u64;
    hash = hash.wrapping_mul(0x100000001b3);
    hash ^= index;
    hash = hash.wrapping_mul(0x100000001b3);
    hash ^= index >> 32;
    hash
}

/// Run one worker thread per entry of `handles` against `batcher`, which
/// serves them on the calling thread. The pool is joined before returning.
///
/// Threads are named `{name}-{id}`. A batcher error takes precedence over
/// worker errors, since workers only see it as [`BatchError::Aborted`].
pub fn run_pool<T, W, E, P>(
    name: &str,
    batcher: &InferenceBatcher,
    slots: SlotSet,
    handles: Vec<Vec<SlotHandle>>,
    work: W,
    eval: E,
    on_progress: P,
) -> Result<(BatchStats, Vec<T>), BatchError>
where
    T: Send,
    W: Fn(usize, Vec<SlotHandle>) -> Result<T, BatchError> + Sync,
    E: FnMut(usize, &[f32], usize) -> Result<Evaluation, NetworkError>,
    P: FnMut(usize),
{
    let progress = slots.progress();

    thread::scope(|scope| {
        let mut joins = Vec::with_capacity(handles.len());
        let mut spawn_error = None;

        for (id, worker_slots) in handles.into_iter().enumerate() {
            let guard = progress.finish_guard();
            let work = &work;
            let spawned = thread::Builder::new()
                .name(format!("{name}-{id}"))
                .spawn_scoped(scope, move || {
                    let _guard = guard;
                    work(id, worker_slots)
                });
            match spawned {
                Ok(handle) => joins.push(handle),
                Err(e) => {
                    spawn_error = Some(BatchError::Spawn(e));
                    break;
                }
            }
        }

        let stats = match spawn_error {
            // Dropping the slot set releases every worker already started.
            Some(err) => {
                drop(slots);
                Err(err)
            }
            None => batcher.run(slots, eval, on_progress),
        };

        let mut outputs = Vec::with_capacity(joins.len());
        let mut failure = None;
        for (id, join) in joins.into_iter().enumerate() {
            match join.join() {
                Ok(Ok(out)) => outputs.push(out),
                Ok(Err(e)) => {
                    debug!("{name}-{id} stopped: {e}");
                    failure.get_or_insert(e);
                }
                Err(_) => {
                    error!("{name}-{id} panicked");
                    failure.get_or_insert(BatchError::WorkerPanicked(id));
                }
            }
        }

        let stats = stats?;
        match failure {
            Some(e) => Err(e),
            None => Ok((stats, outputs)),
        }
    })
}
