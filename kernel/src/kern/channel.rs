//! Up to 256 IPC channels, each a bounded FIFO queue of byte-string messages.

use crossbeam_queue::ArrayQueue;

use super::error::ErrorKind;

pub const MAX_CHANNELS: usize = 256;
pub const MAX_QUEUED_MESSAGES: usize = 32;
/// Largest single message `send` accepts, checked before the guest-supplied
/// length is used to size a host allocation.
pub const MAX_MESSAGE_BYTES: usize = 4096;
/// Total bytes a single channel may hold queued at once, independent of
/// `MAX_QUEUED_MESSAGES` -- a handful of near-`MAX_MESSAGE_BYTES` messages
/// would otherwise bypass the message-count cap's memory bound.
pub const MAX_CHANNEL_BYTES: usize = 64 * 1024;

struct Channel {
    id: u64,
    owner_process_id: u32,
    queue: ArrayQueue<Vec<u8>>,
    queued_bytes: usize,
}

#[derive(Default)]
pub struct ChannelTable {
    slots: Vec<Option<Channel>>,
    next_id: u64,
}

impl ChannelTable {
    pub fn new() -> Self {
        ChannelTable { slots: (0..MAX_CHANNELS).map(|_| None).collect(), next_id: 1 }
    }

    pub fn allocated_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn create(&mut self, owner: u32) -> Result<u64, ErrorKind> {
        let slot = self.slots.iter_mut().find(|s| s.is_none()).ok_or(ErrorKind::OutOfMemory)?;
        let id = self.next_id;
        self.next_id += 1;
        *slot = Some(Channel {
            id,
            owner_process_id: owner,
            queue: ArrayQueue::new(MAX_QUEUED_MESSAGES),
            queued_bytes: 0,
        });
        Ok(id)
    }

    fn find(&self, id: u64) -> Result<&Channel, ErrorKind> {
        self.slots.iter().flatten().find(|c| c.id == id).ok_or(ErrorKind::NotFound)
    }

    fn find_mut(&mut self, id: u64) -> Result<&mut Channel, ErrorKind> {
        self.slots.iter_mut().flatten().find(|c| c.id == id).ok_or(ErrorKind::NotFound)
    }

    pub fn send(&mut self, id: u64, message: Vec<u8>) -> Result<u64, ErrorKind> {
        let channel = self.find_mut(id)?;
        if channel.queued_bytes + message.len() > MAX_CHANNEL_BYTES {
            return Err(ErrorKind::WouldBlock);
        }
        let len = message.len();
        match channel.queue.push(message) {
            Ok(()) => {
                channel.queued_bytes += len;
                Ok(0)
            }
            Err(_) => Err(ErrorKind::WouldBlock),
        }
    }

    /// Pops the next message if present, truncated to `max_len`. Returns
    /// `Ok(0)` with no output on an empty queue, matching the non-blocking
    /// recv contract (success, not would_block).
    pub fn recv(&mut self, id: u64, max_len: usize) -> Result<Vec<u8>, ErrorKind> {
        let channel = self.find_mut(id)?;
        match channel.queue.pop() {
            Some(mut msg) => {
                channel.queued_bytes -= msg.len();
                msg.truncate(max_len);
                Ok(msg)
            }
            None => Ok(Vec::new()),
        }
    }

    pub fn close(&mut self, id: u64) -> Result<u64, ErrorKind> {
        let slot = self
            .slots
            .iter_mut()
            .find(|s| matches!(s, Some(c) if c.id == id))
            .ok_or(ErrorKind::NotFound)?;
        *slot = None;
        Ok(0)
    }

    pub fn cleanup_owned(&mut self, owner: u32) -> usize {
        let mut freed = 0;
        for slot in self.slots.iter_mut() {
            if matches!(slot, Some(c) if c.owner_process_id == owner) {
                *slot = None;
                freed += 1;
            }
        }
        freed
    }
}
