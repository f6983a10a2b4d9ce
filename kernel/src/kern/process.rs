//! Up to 16 processes: id, state, saved context, entry point, exit status.

use super::error::ErrorKind;

pub const MAX_PROCESSES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    Running,
    Blocked,
    Exited,
}

/// Saved PC, SP, and general registers that let a process resume after
/// budget exhaustion switches it out.
#[derive(Debug, Clone, Copy)]
pub struct ProcessContext {
    pub pc: u64,
    pub sp: u64,
    pub gpr: [u64; 32],
    pub entry_point: u64,
    pub initialized: bool,
}

impl ProcessContext {
    pub fn new(entry_point: u64, sp: u64) -> Self {
        ProcessContext { pc: entry_point, sp, gpr: [0; 32], entry_point, initialized: true }
    }
}

#[derive(Debug, Clone)]
pub struct Process {
    pub id: u64,
    pub state: ProcessState,
    pub entry_point: u64,
    pub stack_pointer: u64,
    pub context: Option<ProcessContext>,
    pub exit_status: u64,
}

#[derive(Default)]
pub struct ProcessTable {
    slots: Vec<Option<Process>>,
    next_id: u64,
}

impl ProcessTable {
    pub fn new() -> Self {
        ProcessTable { slots: vec![None; MAX_PROCESSES], next_id: 1 }
    }

    pub fn allocated_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn spawn(&mut self, entry_point: u64, stack_pointer: u64) -> Result<u64, ErrorKind> {
        let slot = self.slots.iter_mut().find(|s| s.is_none()).ok_or(ErrorKind::OutOfMemory)?;
        let id = self.next_id;
        self.next_id += 1;
        *slot = Some(Process {
            id,
            state: ProcessState::Ready,
            entry_point,
            stack_pointer,
            context: Some(ProcessContext::new(entry_point, stack_pointer)),
            exit_status: 0,
        });
        Ok(id)
    }

    pub fn get(&self, id: u64) -> Option<&Process> {
        self.slots.iter().flatten().find(|p| p.id == id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut Process> {
        self.slots.iter_mut().flatten().find(|p| p.id == id)
    }

    pub fn set_state(&mut self, id: u64, state: ProcessState) -> Result<(), ErrorKind> {
        self.get_mut(id).ok_or(ErrorKind::InvalidArgument)?.state = state;
        Ok(())
    }

    pub fn exit(&mut self, id: u64, status: u64) -> Result<(), ErrorKind> {
        let process = self.get_mut(id).ok_or(ErrorKind::InvalidArgument)?;
        process.state = ProcessState::Exited;
        process.exit_status = status;
        Ok(())
    }

    /// Order of (id, state) pairs for all allocated processes, used by the
    /// scheduler's round-robin walk.
    pub fn ready_ids_in_order(&self) -> Vec<u64> {
        self.slots
            .iter()
            .flatten()
            .filter(|p| p.state == ProcessState::Ready)
            .map(|p| p.id)
            .collect()
    }

    pub fn remove(&mut self, id: u64) {
        if let Some(slot) = self.slots.iter_mut().find(|s| matches!(s, Some(p) if p.id == id)) {
            *slot = None;
        }
    }
}
