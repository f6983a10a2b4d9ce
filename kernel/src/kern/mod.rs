//! The basin kernel: syscall dispatch over the mapping, handle, channel,
//! and process tables, bound to a page table, scheduler, and interrupt
//! controller. Owns nothing that the VM's register file or RAM owns.

pub mod channel;
pub mod cow;
pub mod error;
pub mod framebuffer;
pub mod handle;
pub mod input;
pub mod interrupt;
pub mod keyboard;
pub mod mapping;
pub mod mouse;
pub mod page_table;
pub mod process;
pub mod scheduler;
pub mod syscall;

use log::debug;

use channel::ChannelTable;
use cow::CowTable;
use error::{ErrorKind, SyscallResult};
use handle::{HandleFlags, HandleTable};
use input::{InputEvent, InputQueue};
use interrupt::InterruptController;
use keyboard::KeyboardState;
use mapping::MappingTable;
use mouse::MouseState;
use page_table::{PagePerm, PageTable};
use process::{ProcessState, ProcessTable};
use scheduler::Scheduler;

use crate::vm::elf::{self, LoadKind};
use crate::vm::memory::Memory;

const MAX_ELF_HEADER: u64 = 64;
const MAX_SPAWN_IMAGE_BYTES: u64 = 1 << 20;
const USER_STACK_TOP_OFFSET: u64 = page_table::PAGE_SIZE;

pub struct Kernel {
    pub mappings: MappingTable,
    pub handles: HandleTable,
    pub channels: ChannelTable,
    pub processes: ProcessTable,
    pub page_table: PageTable,
    pub cow: CowTable,
    pub keyboard: KeyboardState,
    pub mouse: MouseState,
    pub input_queue: InputQueue,
    pub interrupts: InterruptController,
    pub scheduler: Scheduler,
    ticks: u64,
}

impl Kernel {
    pub fn new() -> Self {
        Kernel {
            mappings: MappingTable::new(),
            handles: HandleTable::new(),
            channels: ChannelTable::new(),
            processes: ProcessTable::new(),
            page_table: PageTable::new(),
            cow: CowTable::new(),
            keyboard: KeyboardState::new(),
            mouse: MouseState::new(),
            input_queue: InputQueue::new(),
            interrupts: InterruptController::new(),
            scheduler: Scheduler::new(),
            ticks: 0,
        }
    }

    fn current_owner(&self) -> u32 {
        self.scheduler.get_current().map(|id| id as u32).unwrap_or(0)
    }

    pub fn push_input_event(&mut self, event: InputEvent) {
        self.input_queue.push(event);
    }

    /// Feeds one PS/2 scancode byte to the keyboard decoder and, once a full
    /// key event has been assembled, queues it for `sys_read_input_event`.
    pub fn feed_scancode(&mut self, scancode: u8) {
        if let Some(event) = self.keyboard.feed_scancode(scancode) {
            self.push_input_event(event);
        }
    }

    /// Applies a relative mouse motion, clamps it to the framebuffer bounds,
    /// and queues the resulting move event.
    pub fn feed_mouse_move(&mut self, dx: i32, dy: i32) {
        let max_x = crate::vm::memory::FB_WIDTH as i32 - 1;
        let max_y = crate::vm::memory::FB_HEIGHT as i32 - 1;
        let event = self.mouse.move_by(dx, dy, max_x, max_y);
        self.push_input_event(event);
    }

    pub fn feed_mouse_button_down(&mut self, button: u8) {
        let event = self.mouse.button_down(button);
        self.push_input_event(event);
    }

    pub fn feed_mouse_button_up(&mut self, button: u8) {
        let event = self.mouse.button_up(button);
        self.push_input_event(event);
    }

    /// Single entry point for every ECALL. Never panics on guest-supplied
    /// arguments; each handler validates its own and returns an `ErrorKind`.
    /// Returns `(a0, yield_requested)`.
    pub fn handle_syscall(
        &mut self,
        num: u64,
        a0: u64,
        a1: u64,
        a2: u64,
        a3: u64,
        memory: &mut Memory,
    ) -> (u64, bool) {
        if !syscall::is_defined(num) {
            return (ErrorKind::InvalidSyscall.to_a0(), false);
        }
        let (result, yield_requested) = self.dispatch(num, a0, a1, a2, a3, memory);
        (error::result_to_a0(result), yield_requested)
    }

    fn dispatch(
        &mut self,
        num: u64,
        a0: u64,
        a1: u64,
        a2: u64,
        a3: u64,
        memory: &mut Memory,
    ) -> (SyscallResult, bool) {
        use syscall::*;
        match num {
            SYS_SPAWN => (self.sys_spawn(a0, memory), false),
            SYS_EXIT => (self.sys_exit(a0), true),
            SYS_YIELD => (Ok(0), true),
            SYS_GETPID => (Ok(self.scheduler.get_current().unwrap_or(0)), false),
            SYS_KILL => (self.sys_kill(a0), false),
            SYS_WAIT => (self.sys_wait(a0), false),
            SYS_SLEEP => (Ok(0), true),
            SYS_TIME => {
                self.ticks += 1;
                (Ok(self.ticks), false)
            }
            SYS_SYSINFO_ALIAS | SYS_SYSINFO => (Ok(self.sys_info()), false),
            SYS_MAP => (self.sys_map(a0, a1, a2), false),
            SYS_UNMAP => (self.sys_unmap(a0), false),
            SYS_PROTECT => (self.sys_protect(a0, a1), false),
            SYS_OPEN => (self.sys_open(a0, a1, a2, memory), false),
            SYS_CLOSE => (self.handles.close(a0), false),
            SYS_READ => (self.handles.read(a0, a2), false),
            SYS_WRITE => (self.handles.write(a0, a2), false),
            SYS_CHANNEL_CREATE => (self.channels.create(self.current_owner()), false),
            SYS_CHANNEL_SEND => (self.sys_channel_send(a0, a1, a2, memory), false),
            SYS_CHANNEL_RECV => (self.sys_channel_recv(a0, a1, a2, memory), false),
            SYS_CHANNEL_CLOSE => (self.channels.close(a0), false),
            SYS_READ_INPUT_EVENT => (self.sys_read_input_event(a0, memory), false),
            SYS_FB_CLEAR => (framebuffer::fb_clear(memory, a0 as u32), false),
            SYS_FB_DRAW_PIXEL => {
                (framebuffer::fb_draw_pixel(memory, a0 as u32, a1 as u32, a2 as u32), false)
            }
            SYS_FB_DRAW_TEXT => {
                (framebuffer::fb_draw_text(memory, a0, a1 as u32, a2 as u32, a3 as u32), false)
            }
            _ => (Err(ErrorKind::InvalidSyscall), false),
        }
    }

    fn sys_map(&mut self, hint_addr: u64, size: u64, flags_u32: u64) -> SyscallResult {
        let flags = PagePerm::from_bits(flags_u32 as u8).ok_or(ErrorKind::InvalidArgument)?;
        let owner = self.current_owner();
        self.mappings.syscall_map(&mut self.page_table, hint_addr, size, flags, owner)
    }

    fn sys_unmap(&mut self, addr: u64) -> SyscallResult {
        let owner = self.current_owner();
        self.mappings.syscall_unmap(&mut self.page_table, addr, owner)
    }

    fn sys_protect(&mut self, addr: u64, flags_u32: u64) -> SyscallResult {
        let flags = PagePerm::from_bits(flags_u32 as u8).ok_or(ErrorKind::InvalidArgument)?;
        self.mappings.syscall_protect(&mut self.page_table, addr, flags)
    }

    fn sys_open(&mut self, path_ptr: u64, len: u64, flags_u32: u64, memory: &Memory) -> SyscallResult {
        if path_ptr == 0 || len == 0 || len > handle::MAX_PATH_LEN as u64 {
            return Err(ErrorKind::InvalidArgument);
        }
        let mut path = Vec::with_capacity(len as usize);
        for i in 0..len {
            path.push(memory.read8(path_ptr + i).map_err(|_| ErrorKind::InvalidArgument)?);
        }
        let flags = HandleFlags::from_bits(flags_u32 as u8).ok_or(ErrorKind::InvalidArgument)?;
        self.handles.open(&path, flags, self.current_owner())
    }

    fn sys_channel_send(&mut self, cid: u64, buf_ptr: u64, len: u64, memory: &Memory) -> SyscallResult {
        if len > channel::MAX_MESSAGE_BYTES as u64 {
            return Err(ErrorKind::InvalidArgument);
        }
        let mut message = Vec::with_capacity(len as usize);
        for i in 0..len {
            message.push(memory.read8(buf_ptr + i).map_err(|_| ErrorKind::InvalidArgument)?);
        }
        self.channels.send(cid, message)
    }

    fn sys_channel_recv(&mut self, cid: u64, buf_ptr: u64, max_len: u64, memory: &mut Memory) -> SyscallResult {
        let message = self.channels.recv(cid, max_len as usize)?;
        for (i, byte) in message.iter().enumerate() {
            memory.write8(buf_ptr + i as u64, *byte).map_err(|_| ErrorKind::InvalidArgument)?;
        }
        Ok(message.len() as u64)
    }

    fn sys_read_input_event(&mut self, buf_ptr: u64, memory: &mut Memory) -> SyscallResult {
        match self.input_queue.pop() {
            Some(event) => {
                let wire = event.to_wire();
                for (i, byte) in wire.iter().enumerate() {
                    memory.write8(buf_ptr + i as u64, *byte).map_err(|_| ErrorKind::InvalidArgument)?;
                }
                Ok(input::EVENT_SIZE as u64)
            }
            None => Err(ErrorKind::WouldBlock),
        }
    }

    fn sys_spawn(&mut self, executable_ptr: u64, memory: &mut Memory) -> SyscallResult {
        let image_bytes = read_guest_blob(memory, executable_ptr, MAX_SPAWN_IMAGE_BYTES)?;
        let image = elf::parse(&image_bytes, LoadKind::User).map_err(|_| ErrorKind::InvalidArgument)?;
        elf::load_segments(&image, &image_bytes, memory).map_err(|_| ErrorKind::InvalidArgument)?;
        self.processes.spawn(image.entry, Self::default_user_stack_top())
    }

    /// The initial stack pointer given to every freshly-spawned user process,
    /// including the bootstrap process the host loads directly (see
    /// `basin-run`'s `main`). Kept as one function so both spawn paths agree.
    pub fn default_user_stack_top() -> u64 {
        crate::vm::memory::RAM_SIZE as u64 - USER_STACK_TOP_OFFSET
    }

    fn sys_exit(&mut self, status: u64) -> SyscallResult {
        let pid = self.scheduler.get_current().ok_or(ErrorKind::InvalidArgument)?;
        self.processes.exit(pid, status).map_err(|_| ErrorKind::InvalidArgument)?;
        self.cleanup_process_resources(pid as u32);
        self.processes.remove(pid);
        self.scheduler.clear_current();
        Ok(0)
    }

    fn sys_kill(&mut self, pid: u64) -> SyscallResult {
        self.processes.exit(pid, u64::MAX).map_err(|_| ErrorKind::InvalidArgument)?;
        self.cleanup_process_resources(pid as u32);
        self.processes.remove(pid);
        Ok(0)
    }

    fn sys_wait(&mut self, pid: u64) -> SyscallResult {
        let process = self.processes.get(pid).ok_or(ErrorKind::InvalidArgument)?;
        if process.state == ProcessState::Exited {
            Ok(process.exit_status)
        } else {
            Err(ErrorKind::WouldBlock)
        }
    }

    fn sys_info(&self) -> u64 {
        let counts = [
            self.processes.allocated_count() as u64,
            self.mappings.allocated_count() as u64,
            self.handles.allocated_count() as u64,
            self.channels.allocated_count() as u64,
        ];
        counts.iter().enumerate().fold(0u64, |acc, (i, &c)| acc | ((c & 0xff) << (i * 8)))
    }

    /// Releases every mapping/handle/channel owned by `process_id`. Idempotent:
    /// a second call on an already-cleaned process returns 0.
    pub fn cleanup_process_resources(&mut self, process_id: u32) -> usize {
        let freed_mappings = self.mappings.cleanup_owned(&mut self.page_table, process_id);
        let freed_handles = self.handles.cleanup_owned(process_id);
        let freed_channels = self.channels.cleanup_owned(process_id);
        let total = freed_mappings + freed_handles + freed_channels;
        if total > 0 {
            debug!("cleaned up {total} resources for process {process_id}");
        }
        total
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads up to `cap` bytes starting at `ptr`, stopping as soon as a read
/// fails (treated as "end of the readable image"), used by `spawn` to pull
/// a guest-resident ELF image into a host-owned buffer before parsing.
fn read_guest_blob(memory: &Memory, ptr: u64, cap: u64) -> Result<Vec<u8>, ErrorKind> {
    if ptr == 0 {
        return Err(ErrorKind::InvalidArgument);
    }
    if memory.read8(ptr).is_err() {
        return Err(ErrorKind::InvalidArgument);
    }
    let header_end = ptr + MAX_ELF_HEADER;
    let mut header = Vec::with_capacity(MAX_ELF_HEADER as usize);
    for addr in ptr..header_end {
        match memory.read8(addr) {
            Ok(b) => header.push(b),
            Err(_) => break,
        }
    }
    if header.len() < MAX_ELF_HEADER as usize {
        return Err(ErrorKind::InvalidArgument);
    }
    let phoff = u64::from_le_bytes(header[32..40].try_into().unwrap());
    let phentsize = u16::from_le_bytes(header[54..56].try_into().unwrap()) as u64;
    let phnum = u16::from_le_bytes(header[56..58].try_into().unwrap()) as u64;
    let phdr_end = phoff + phentsize * phnum;

    let mut blob = header;
    for addr in header_end..(ptr + phdr_end).min(ptr + cap) {
        blob.push(memory.read8(addr).map_err(|_| ErrorKind::InvalidArgument)?);
    }

    let mut max_segment_end = phdr_end;
    for i in 0..phnum {
        let base = (phoff + i * phentsize) as usize;
        if base + 48 > blob.len() {
            break;
        }
        let file_offset = u64::from_le_bytes(blob[base + 8..base + 16].try_into().unwrap());
        let file_size = u64::from_le_bytes(blob[base + 32..base + 40].try_into().unwrap());
        max_segment_end = max_segment_end.max(file_offset + file_size);
    }
    let total = max_segment_end.min(cap);
    while (blob.len() as u64) < total {
        let addr = ptr + blob.len() as u64;
        blob.push(memory.read8(addr).map_err(|_| ErrorKind::InvalidArgument)?);
    }
    Ok(blob)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_syscall_number_is_rejected() {
        let mut kernel = Kernel::new();
        let mut memory = Memory::new();
        let (a0, yielded) = kernel.handle_syscall(9999, 0, 0, 0, 0, &mut memory);
        assert_eq!(a0 as i64, ErrorKind::InvalidSyscall.code());
        assert!(!yielded);
    }

    #[test]
    fn map_then_protect_then_unmap_via_syscalls() {
        let mut kernel = Kernel::new();
        let mut memory = Memory::new();
        let (addr, _) = kernel.handle_syscall(syscall::SYS_MAP, 0, 4096, 0b011, 0, &mut memory);
        assert!(addr >= page_table::USER_BASE);
        let (protect_result, _) =
            kernel.handle_syscall(syscall::SYS_PROTECT, addr, 0b001, 0, 0, &mut memory);
        assert_eq!(protect_result, 0);
        assert_eq!(kernel.page_table.check_permission(addr), Some(PagePerm::R));
        let (unmap_result, _) = kernel.handle_syscall(syscall::SYS_UNMAP, addr, 0, 0, 0, &mut memory);
        assert_eq!(unmap_result, 0);
    }

    #[test]
    fn ipc_round_trip_via_syscalls() {
        let mut kernel = Kernel::new();
        let mut memory = Memory::new();
        let (cid, _) = kernel.handle_syscall(syscall::SYS_CHANNEL_CREATE, 0, 0, 0, 0, &mut memory);
        assert_ne!(cid, 0);
        for (i, byte) in b"Hello".iter().enumerate() {
            memory.write8(0x5000 + i as u64, *byte).unwrap();
        }
        let (sent, _) =
            kernel.handle_syscall(syscall::SYS_CHANNEL_SEND, cid, 0x5000, 5, &mut memory);
        assert_eq!(sent, 0);
        let (received, _) =
            kernel.handle_syscall(syscall::SYS_CHANNEL_RECV, cid, 0x6000, 4096, &mut memory);
        assert_eq!(received, 5);
        for (i, expected) in b"Hello".iter().enumerate() {
            assert_eq!(memory.read8(0x6000 + i as u64).unwrap(), *expected);
        }
    }

    #[test]
    fn sysinfo_reflects_allocated_process_count() {
        let mut kernel = Kernel::new();
        kernel.processes.spawn(0x1000, 0).unwrap();
        let info = kernel.sys_info();
        assert_eq!(info & 0xff, 1);
    }

    #[test]
    fn exit_destroys_the_process_slot() {
        let mut kernel = Kernel::new();
        let mut memory = Memory::new();
        let pid = kernel.processes.spawn(0x1000, 0).unwrap();
        kernel.scheduler.set_current(pid);
        let (result, yielded) = kernel.handle_syscall(syscall::SYS_EXIT, 0, 0, 0, 0, &mut memory);
        assert_eq!(result, 0);
        assert!(yielded);
        assert_eq!(kernel.processes.allocated_count(), 0);
        assert!(kernel.processes.get(pid).is_none());
    }

    #[test]
    fn channel_send_rejects_oversized_length_before_allocating() {
        let mut kernel = Kernel::new();
        let mut memory = Memory::new();
        let (cid, _) = kernel.handle_syscall(syscall::SYS_CHANNEL_CREATE, 0, 0, 0, 0, &mut memory);
        let (result, _) = kernel.handle_syscall(
            syscall::SYS_CHANNEL_SEND,
            cid,
            0x9000,
            channel::MAX_MESSAGE_BYTES as u64 + 1,
            0,
            &mut memory,
        );
        assert_eq!(result as i64, ErrorKind::InvalidArgument.code());
    }

    #[test]
    fn kill_destroys_the_process_slot() {
        let mut kernel = Kernel::new();
        let mut memory = Memory::new();
        let pid = kernel.processes.spawn(0x1000, 0).unwrap();
        let (result, _) = kernel.handle_syscall(syscall::SYS_KILL, pid, 0, 0, 0, &mut memory);
        assert_eq!(result, 0);
        assert_eq!(kernel.processes.allocated_count(), 0);
    }

    #[test]
    fn fed_scancode_reaches_the_readable_input_queue() {
        let mut kernel = Kernel::new();
        let mut memory = Memory::new();
        kernel.feed_scancode(0x1e); // scancode-set-1 make code for 'A'
        let (len, _) = kernel.handle_syscall(syscall::SYS_READ_INPUT_EVENT, 0x9000, 0, 0, 0, &mut memory);
        assert_eq!(len, input::EVENT_SIZE as u64);
    }

    #[test]
    fn fed_mouse_motion_reaches_the_readable_input_queue() {
        let mut kernel = Kernel::new();
        let mut memory = Memory::new();
        kernel.feed_mouse_move(5, 5);
        let (len, _) = kernel.handle_syscall(syscall::SYS_READ_INPUT_EVENT, 0x9000, 0, 0, 0, &mut memory);
        assert_eq!(len, input::EVENT_SIZE as u64);
    }
}
