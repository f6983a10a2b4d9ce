//! Up to 64 file handles per address space: path, permissions, position, owner.

use bitflags::bitflags;

use super::error::ErrorKind;

pub const MAX_HANDLES: usize = 64;
pub const MAX_PATH_LEN: usize = 255;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HandleFlags: u8 {
        const R = 0b0001;
        const W = 0b0010;
        const CREATE = 0b0100;
        const TRUNCATE = 0b1000;
    }
}

#[derive(Debug, Clone)]
pub struct Handle {
    pub id: u64,
    pub path: Vec<u8>,
    pub flags: HandleFlags,
    pub position: u64,
    pub owner_process_id: u32,
}

#[derive(Default)]
pub struct HandleTable {
    slots: Vec<Option<Handle>>,
    next_id: u64,
}

impl HandleTable {
    pub fn new() -> Self {
        HandleTable { slots: vec![None; MAX_HANDLES], next_id: 1 }
    }

    pub fn allocated_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn open(
        &mut self,
        path: &[u8],
        flags: HandleFlags,
        owner: u32,
    ) -> Result<u64, ErrorKind> {
        if path.is_empty() || path.len() > MAX_PATH_LEN {
            return Err(ErrorKind::InvalidArgument);
        }
        if !flags.intersects(HandleFlags::R | HandleFlags::W) {
            return Err(ErrorKind::InvalidArgument);
        }
        let slot = self.slots.iter_mut().find(|s| s.is_none()).ok_or(ErrorKind::OutOfMemory)?;
        let id = self.next_id;
        self.next_id += 1;
        *slot = Some(Handle {
            id,
            path: path.to_vec(),
            flags,
            position: 0,
            owner_process_id: owner,
        });
        Ok(id)
    }

    fn find_mut(&mut self, id: u64) -> Result<&mut Handle, ErrorKind> {
        if id == 0 {
            return Err(ErrorKind::InvalidArgument);
        }
        self.slots
            .iter_mut()
            .flatten()
            .find(|h| h.id == id)
            .ok_or(ErrorKind::InvalidHandle)
    }

    /// Validates a read against the handle's permissions and advances its
    /// position by `len`; the actual byte copy happens at the syscall layer
    /// via the VM-memory writer, which this table has no access to.
    pub fn read(&mut self, id: u64, len: u64) -> Result<u64, ErrorKind> {
        let handle = self.find_mut(id)?;
        if !handle.flags.contains(HandleFlags::R) {
            return Err(ErrorKind::PermissionDenied);
        }
        handle.position += len;
        Ok(len)
    }

    pub fn write(&mut self, id: u64, len: u64) -> Result<u64, ErrorKind> {
        let handle = self.find_mut(id)?;
        if !handle.flags.contains(HandleFlags::W) {
            return Err(ErrorKind::PermissionDenied);
        }
        handle.position += len;
        Ok(len)
    }

    pub fn close(&mut self, id: u64) -> Result<u64, ErrorKind> {
        if id == 0 {
            return Err(ErrorKind::InvalidArgument);
        }
        let slot = self
            .slots
            .iter_mut()
            .find(|s| matches!(s, Some(h) if h.id == id))
            .ok_or(ErrorKind::InvalidHandle)?;
        *slot = None;
        Ok(0)
    }

    pub fn cleanup_owned(&mut self, owner: u32) -> usize {
        let mut freed = 0;
        for slot in self.slots.iter_mut() {
            if matches!(slot, Some(h) if h.owner_process_id == owner) {
                *slot = None;
                freed += 1;
            }
        }
        freed
    }
}
