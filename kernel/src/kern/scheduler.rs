//! Cooperative round-robin scheduler. The cursor is a plain index walker
//! over the process table's current ready list; no callbacks into guest code.

use super::process::{ProcessState, ProcessTable};

#[derive(Default)]
pub struct Scheduler {
    current: Option<u64>,
    cursor: usize,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler { current: None, cursor: 0 }
    }

    pub fn get_current(&self) -> Option<u64> {
        self.current
    }

    pub fn set_current(&mut self, id: u64) {
        self.current = Some(id);
    }

    pub fn clear_current(&mut self) {
        self.current = None;
    }

    /// Returns a process to the ready pool, e.g. after its step budget
    /// elapses without it exiting. A no-op if `id` isn't allocated.
    pub fn mark_ready(&self, processes: &mut ProcessTable, id: u64) {
        let _ = processes.set_state(id, ProcessState::Ready);
    }

    /// Takes a process out of the ready pool without exiting it. No syscall
    /// in this kernel currently produces a real blocking condition (channel
    /// recv and wait both poll rather than suspend), but the state exists
    /// for callers that need to park a process until something external
    /// marks it ready again.
    pub fn mark_blocked(&self, processes: &mut ProcessTable, id: u64) {
        let _ = processes.set_state(id, ProcessState::Blocked);
    }

    /// Picks the next ready process after the current index, wrapping
    /// around. Does not mutate `get_current()`; callers that want to
    /// actually switch call `set_current` with the result.
    pub fn schedule_next(&mut self, processes: &ProcessTable) -> Option<u64> {
        let ready = processes.ready_ids_in_order();
        if ready.is_empty() {
            return None;
        }
        let start = match self.current {
            Some(id) => ready.iter().position(|&r| r == id).map(|p| p + 1).unwrap_or(0),
            None => 0,
        };
        let next = ready[start % ready.len()];
        self.cursor = (start % ready.len()) + 1;
        Some(next)
    }
}
