use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use chrono::{DateTime, Local};
use dcron_schedule::Schedule;

use crate::job::Job;

/// Detached marker for an entry not currently in the heap.
const NO_INDEX: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Waiting,
    Executing,
}

/// One scheduled job: its compiled schedule, fire bookkeeping, and the
/// flag a dispatch task raises while the job runs.
pub struct Entry {
    pub schedule: Schedule,
    pub prev_time: Option<DateTime<Local>>,
    pub next_time: DateTime<Local>,
    pub job: Job,
    pub executing: Arc<AtomicBool>,
    /// Current position in the heap, maintained on every swap so removal
    /// stays O(log n) once the entry is located.
    heap_index: usize,
}

impl Entry {
    pub fn new(schedule: Schedule, next_time: DateTime<Local>, job: Job) -> Self {
        Self {
            schedule,
            prev_time: None,
            next_time,
            job,
            executing: Arc::new(AtomicBool::new(false)),
            heap_index: NO_INDEX,
        }
    }

    pub fn status(&self) -> EntryStatus {
        if self.executing.load(Ordering::SeqCst) {
            EntryStatus::Executing
        } else {
            EntryStatus::Waiting
        }
    }
}

/// Min-heap of entries keyed on `next_time`. Owned exclusively by the
/// scheduler loop; every mutation goes through it.
#[derive(Default)]
pub struct EntryHeap {
    entries: Vec<Entry>,
}

impl EntryHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entry with the earliest `next_time`.
    pub fn peek(&self) -> Option<&Entry> {
        self.entries.first()
    }

    pub fn push(&mut self, mut entry: Entry) {
        entry.heap_index = self.entries.len();
        self.entries.push(entry);
        self.sift_up(self.entries.len() - 1);
    }

    pub fn pop(&mut self) -> Option<Entry> {
        if self.entries.is_empty() {
            return None;
        }
        let last = self.entries.len() - 1;
        self.swap(0, last);
        let mut entry = self.entries.pop()?;
        entry.heap_index = NO_INDEX;
        if !self.entries.is_empty() {
            self.sift_down(0);
        }
        Some(entry)
    }

    /// Remove the entry belonging to `job_id`. The scan is linear (the
    /// heap holds at most a few thousand entries); the removal itself is
    /// logarithmic via the entry's index.
    pub fn delete(&mut self, job_id: u64) -> bool {
        match self.entries.iter().position(|e| e.job.id == job_id) {
            Some(pos) => {
                debug_assert_eq!(self.entries[pos].heap_index, pos);
                self.remove_at(pos);
                true
            }
            None => false,
        }
    }

    /// Restore heap order after the entry at `pos` changed its key.
    pub fn fix(&mut self, pos: usize) {
        self.sift_down(pos);
        self.sift_up(pos);
    }

    fn remove_at(&mut self, pos: usize) {
        let last = self.entries.len() - 1;
        self.swap(pos, last);
        self.entries.pop();
        if pos < self.entries.len() {
            self.fix(pos);
        }
    }

    fn less(&self, i: usize, j: usize) -> bool {
        self.entries[i].next_time < self.entries[j].next_time
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.entries.swap(i, j);
        self.entries[i].heap_index = i;
        self.entries[j].heap_index = j;
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if !self.less(i, parent) {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        loop {
            let left = 2 * i + 1;
            if left >= self.entries.len() {
                break;
            }
            let mut smallest = left;
            let right = left + 1;
            if right < self.entries.len() && self.less(right, left) {
                smallest = right;
            }
            if !self.less(smallest, i) {
                break;
            }
            self.swap(i, smallest);
            i = smallest;
        }
    }
}
