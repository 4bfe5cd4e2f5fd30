use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::BatchError;

/// Fixed-shape evaluation buffers for one slot.
///
/// A worker stages up to `capacity` observation rows into `input`; the
/// batcher writes the matching policy and value rows back. The whole struct
/// travels by value between the two sides, so only one of them can touch it
/// at a time.
#[derive(Debug)]
pub struct SlotBuffers {
    input: Vec<f32>,
    policy: Vec<f32>,
    value: Vec<f32>,
    rows: usize,
    capacity: usize,
    observation_size: usize,
    action_size: usize,
}

impl SlotBuffers {
    pub fn new(capacity: usize, observation_size: usize, action_size: usize) -> Self {
        SlotBuffers {
            input: vec![0.0; capacity * observation_size],
            policy: vec![0.0; capacity * action_size],
            value: vec![0.0; capacity],
            rows: 0,
            capacity,
            observation_size,
            action_size,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Rows staged since the last [`clear`](Self::clear).
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn is_full(&self) -> bool {
        self.rows == self.capacity
    }

    pub fn observation_size(&self) -> usize {
        self.observation_size
    }

    pub fn action_size(&self) -> usize {
        self.action_size
    }

    pub fn clear(&mut self) {
        self.rows = 0;
    }

    /// Reserve the next input row. Returns its index and the row to fill,
    /// or `None` when the slot is full.
    pub fn stage(&mut self) -> Option<(usize, &mut [f32])> {
        if self.is_full() {
            return None;
        }
        let row = self.rows;
        self.rows += 1;
        let start = row * self.observation_size;
        Some((row, &mut self.input[start..start + self.observation_size]))
    }

    /// Input rows staged so far, back to back.
    pub fn staged_input(&self) -> &[f32] {
        &self.input[..self.rows * self.observation_size]
    }

    pub fn policy_row(&self, row: usize) -> &[f32] {
        let start = row * self.action_size;
        &self.policy[start..start + self.action_size]
    }

    pub fn value_row(&self, row: usize) -> f32 {
        self.value[row]
    }

    /// Copy evaluation output for the staged rows into the output buffers.
    pub(crate) fn write_outputs(&mut self, policy: &[f32], value: &[f32]) {
        let rows = self.rows;
        self.policy[..rows * self.action_size].copy_from_slice(policy);
        self.value[..rows].copy_from_slice(value);
    }
}

/// Ready notification: a slot's buffers handed to the batcher.
#[derive(Debug)]
pub struct Ready {
    pub slot: usize,
    pub route: usize,
    pub buffers: SlotBuffers,
}

/// Phase-wide counters shared by the workers and the batcher.
#[derive(Debug, Default)]
pub struct Progress {
    games_completed: AtomicUsize,
    workers_finished: AtomicUsize,
    batches_submitted: AtomicUsize,
}

impl Progress {
    pub fn game_completed(&self) {
        self.games_completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn games_completed(&self) -> usize {
        self.games_completed.load(Ordering::SeqCst)
    }

    pub fn workers_finished(&self) -> usize {
        self.workers_finished.load(Ordering::SeqCst)
    }

    pub fn batches_submitted(&self) -> usize {
        self.batches_submitted.load(Ordering::SeqCst)
    }

    /// Guard that marks one worker finished when dropped, including on
    /// early return or panic.
    pub fn finish_guard(self: &Arc<Self>) -> WorkerFinishGuard {
        WorkerFinishGuard {
            progress: Arc::clone(self),
        }
    }
}

pub struct WorkerFinishGuard {
    progress: Arc<Progress>,
}

impl Drop for WorkerFinishGuard {
    fn drop(&mut self) {
        self.progress.workers_finished.fetch_add(1, Ordering::SeqCst);
    }
}

/// Worker-side end of one slot.
pub struct SlotHandle {
    id: usize,
    route: usize,
    buffers: Option<SlotBuffers>,
    ready: Sender<Ready>,
    done: Receiver<SlotBuffers>,
    progress: Arc<Progress>,
}

impl SlotHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn route(&self) -> usize {
        self.route
    }

    pub fn buffers(&self) -> Result<&SlotBuffers, BatchError> {
        self.buffers.as_ref().ok_or(BatchError::SlotInFlight(self.id))
    }

    pub fn buffers_mut(&mut self) -> Result<&mut SlotBuffers, BatchError> {
        self.buffers.as_mut().ok_or(BatchError::SlotInFlight(self.id))
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// Hand the staged rows to the batcher.
    pub fn send(&mut self) -> Result<(), BatchError> {
        let buffers = self.buffers.take().ok_or(BatchError::SlotInFlight(self.id))?;
        self.progress.batches_submitted.fetch_add(1, Ordering::SeqCst);
        self.ready
            .send(Ready {
                slot: self.id,
                route: self.route,
                buffers,
            })
            .map_err(|_| BatchError::Aborted(self.id))
    }

    /// Block until the batcher returns the buffers with outputs filled in.
    pub fn wait(&mut self) -> Result<(), BatchError> {
        if self.buffers.is_some() {
            return Ok(());
        }
        let buffers = self.done.recv().map_err(|_| BatchError::Aborted(self.id))?;
        self.buffers = Some(buffers);
        Ok(())
    }

    pub fn submit(&mut self) -> Result<(), BatchError> {
        self.send()?;
        self.wait()
    }
}

/// Batcher-side end of every slot in one phase.
pub struct SlotSet {
    pub(crate) ready: Receiver<Ready>,
    pub(crate) done: Vec<Sender<SlotBuffers>>,
    pub(crate) progress: Arc<Progress>,
    pub(crate) workers: usize,
    pub(crate) routes: usize,
    pub(crate) action_size: usize,
}

impl SlotSet {
    /// Create `workers * routes` slots. `handles[w][r]` is worker `w`'s slot
    /// for route `r`.
    pub fn new(
        workers: usize,
        routes: usize,
        capacity: usize,
        observation_size: usize,
        action_size: usize,
    ) -> (SlotSet, Vec<Vec<SlotHandle>>) {
        let (ready_tx, ready_rx) = bounded(workers * routes);
        let progress = Arc::new(Progress::default());
        let mut done = Vec::with_capacity(workers * routes);
        let mut handles = Vec::with_capacity(workers);

        for w in 0..workers {
            let mut worker_slots = Vec::with_capacity(routes);
            for route in 0..routes {
                let (done_tx, done_rx) = bounded(1);
                done.push(done_tx);
                worker_slots.push(SlotHandle {
                    id: w * routes + route,
                    route,
                    buffers: Some(SlotBuffers::new(capacity, observation_size, action_size)),
                    ready: ready_tx.clone(),
                    done: done_rx,
                    progress: Arc::clone(&progress),
                });
            }
            handles.push(worker_slots);
        }

        let set = SlotSet {
            ready: ready_rx,
            done,
            progress,
            workers,
            routes,
            action_size,
        };
        (set, handles)
    }

    pub fn progress(&self) -> Arc<Progress> {
        Arc::clone(&self.progress)
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_until_full() {
        let mut buffers = SlotBuffers::new(2, 3, 4);
        let (row, input) = buffers.stage().unwrap();
        assert_eq!(row, 0);
        input.copy_from_slice(&[1.0, 2.0, 3.0]);
        buffers.stage().unwrap().1.fill(9.0);
        assert!(buffers.stage().is_none());
        assert_eq!(buffers.staged_input(), &[1.0, 2.0, 3.0, 9.0, 9.0, 9.0]);

        buffers.clear();
        assert_eq!(buffers.rows(), 0);
        assert!(buffers.staged_input().is_empty());
    }

    #[test]
    fn test_write_outputs_fills_staged_rows() {
        let mut buffers = SlotBuffers::new(3, 1, 2);
        buffers.stage();
        buffers.stage();
        buffers.write_outputs(&[0.1, 0.9, 0.6, 0.4], &[0.5, -0.5]);
        assert_eq!(buffers.policy_row(1), &[0.6, 0.4]);
        assert_eq!(buffers.value_row(0), 0.5);
    }

    #[test]
    fn test_slot_ids_and_routes() {
        let (set, handles) = SlotSet::new(3, 2, 4, 1, 1);
        assert_eq!(set.len(), 6);
        assert_eq!(handles.len(), 3);
        assert_eq!(handles[2][1].id(), 5);
        assert_eq!(handles[2][1].route(), 1);
    }

    #[test]
    fn test_send_twice_is_rejected() {
        let (_set, mut handles) = SlotSet::new(1, 1, 1, 1, 1);
        let slot = &mut handles[0][0];
        slot.send().unwrap();
        assert!(matches!(slot.send(), Err(BatchError::SlotInFlight(0))));
        assert!(slot.buffers().is_err());
        assert_eq!(slot.progress().batches_submitted(), 1);
    }

    #[test]
    fn test_wait_aborts_when_batcher_gone() {
        let (set, mut handles) = SlotSet::new(1, 1, 1, 1, 1);
        let slot = &mut handles[0][0];
        slot.send().unwrap();
        drop(set);
        assert!(matches!(slot.wait(), Err(BatchError::Aborted(0))));
    }

    #[test]
    fn test_finish_guard_counts_on_drop() {
        let progress = Arc::new(Progress::default());
        {
            let _a = progress.finish_guard();
            let _b = progress.finish_guard();
        }
        assert_eq!(progress.workers_finished(), 2);
    }
}
