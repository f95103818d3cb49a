//! Job-ID allocation and completion tracking.
//!
//! IDs are issued sequentially from an unbounded logical space. Completion
//! state lives in a sliding window of 64-bit chunks: once the oldest chunk is
//! entirely finished it is evicted and the window advances, so memory is
//! bounded by the number of IDs in flight rather than the lifetime total.
//! Anything below the window is finished and reclaimed; anything at or above
//! the window end has not been issued yet.

use std::collections::VecDeque;

/// Opaque token identifying a submitted job's completion state.
///
/// A job ID can be used as a synchronization point independent of holding
/// the job object itself; see [`JobSystem::allocate_job_id`].
///
/// [`JobSystem::allocate_job_id`]: crate::JobSystem::allocate_job_id
pub type JobId = u64;

/// Reserved ID that is never assigned to a submitted job.
///
/// It is pre-consumed at scheduler startup, so waiting on it returns
/// immediately and [`JobSystem::is_job_finished`] reports it finished.
///
/// [`JobSystem::is_job_finished`]: crate::JobSystem::is_job_finished
pub const INVALID_JOB_ID: JobId = 0;

const IDS_PER_CHUNK: u64 = 64;

#[derive(Debug, Default)]
pub(crate) struct IdMap {
    next: u64,
    chunks: VecDeque<u64>,
    /// Index of the first live chunk. The window's lower bound is always the
    /// ID of the first still-potentially-unfinished slot.
    offset: u64,
}

impl IdMap {
    pub fn new() -> Self {
        IdMap::default()
    }

    fn begin(&self) -> u64 {
        self.offset * IDS_PER_CHUNK
    }

    fn end(&self) -> u64 {
        (self.offset + self.chunks.len() as u64) * IDS_PER_CHUNK
    }

    /// Issues the next sequential ID, growing the window by one chunk when
    /// the new ID passes the window end. Infallible; IDs are never reissued.
    pub fn allocate(&mut self) -> JobId {
        let id = self.next;
        self.next += 1;
        if id >= self.end() {
            self.chunks.push_back(0);
        }
        id
    }

    /// Marks `id` finished. When the mutation lands in the oldest chunk and
    /// that chunk becomes fully set, the window slides forward, cascading
    /// through any chunks that are now complete.
    pub fn finish(&mut self, id: JobId) {
        debug_assert!(
            id >= self.begin() && id < self.end(),
            "finished job ID {id} is outside the live window [{}, {})",
            self.begin(),
            self.end()
        );
        let chunk_index = (id / IDS_PER_CHUNK - self.offset) as usize;
        let bit = 1u64 << (id % IDS_PER_CHUNK);
        debug_assert_eq!(self.chunks[chunk_index] & bit, 0, "job ID {id} finished twice");
        self.chunks[chunk_index] |= bit;
        if chunk_index == 0 {
            while self.chunks.front() == Some(&u64::MAX) {
                self.chunks.pop_front();
                self.offset += 1;
            }
        }
    }

    pub fn is_finished(&self, id: JobId) -> bool {
        if id < self.begin() {
            // Already reclaimed by a window slide.
            return true;
        }
        if id >= self.end() {
            // Not issued yet.
            return false;
        }
        let chunk_index = (id / IDS_PER_CHUNK - self.offset) as usize;
        self.chunks[chunk_index] & (1u64 << (id % IDS_PER_CHUNK)) != 0
    }

    /// Number of chunks currently held live, i.e. the window size.
    pub fn window_chunks(&self) -> usize {
        self.chunks.len()
    }
}
