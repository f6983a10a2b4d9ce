//! The RV64I execution loop: fetch, decode, execute, with an installable
//! syscall trap that lets the integration layer route ECALL to the kernel.

use std::collections::HashMap;

use log::{debug, trace};

use super::decode::{self, BranchOp, Instruction, LoadWidth, Op, OpImm, StoreWidth};
use super::error::VmFault;
use super::memory::Memory;
use super::registers::RegisterFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Running,
    Halted,
    Errored,
}

/// Per-PC branch outcome counters, used by tooling to spot hot loops.
#[derive(Debug, Default, Clone)]
pub struct PerfCounters {
    pub instructions_retired: u64,
    pub syscalls_dispatched: u64,
}

/// Tracks how often each PC value is fetched, evicting the coldest entry
/// once a fixed capacity is exceeded so the map cannot grow unbounded
/// across a long-running guest.
pub struct HotPathTracker {
    capacity: usize,
    counts: HashMap<u64, u64>,
}

impl HotPathTracker {
    pub fn new(capacity: usize) -> Self {
        HotPathTracker { capacity, counts: HashMap::new() }
    }

    pub fn record(&mut self, pc: u64) {
        *self.counts.entry(pc).or_insert(0) += 1;
        if self.counts.len() > self.capacity {
            if let Some((&coldest, _)) = self.counts.iter().min_by_key(|(_, &c)| c) {
                self.counts.remove(&coldest);
            }
        }
    }

    pub fn hottest(&self) -> Option<(u64, u64)> {
        self.counts.iter().max_by_key(|(_, &c)| c).map(|(&pc, &c)| (pc, c))
    }
}

impl Default for HotPathTracker {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Returns `(a0_result, yield_requested)`. `yield_requested` tells the
/// execution loop the current process has ceded control (exit/yield/sleep)
/// so a bounded `execute` should stop early rather than burn its remaining
/// step budget on a process that already gave it up.
type SyscallTrap = Box<dyn FnMut(u64, u64, u64, u64, u64, &mut Memory) -> (u64, bool)>;

pub struct Vm {
    pub regs: RegisterFile,
    pub memory: Memory,
    pub state: VmState,
    pub last_error: Option<VmFault>,
    pub perf: PerfCounters,
    pub branch_stats: HashMap<(u64, bool), u64>,
    pub hot_path: HotPathTracker,
    pub yield_requested: bool,
    trap: Option<SyscallTrap>,
}

impl Vm {
    pub fn new() -> Self {
        Vm {
            regs: RegisterFile::new(),
            memory: Memory::new(),
            state: VmState::Running,
            last_error: None,
            perf: PerfCounters::default(),
            branch_stats: HashMap::new(),
            hot_path: HotPathTracker::default(),
            yield_requested: false,
            trap: None,
        }
    }

    pub fn install_syscall_trap(&mut self, trap: SyscallTrap) {
        self.trap = Some(trap);
    }

    fn fault(&mut self, fault: VmFault) {
        debug!("vm fault: {fault}");
        self.last_error = Some(fault);
        self.state = VmState::Errored;
    }

    /// Executes at most one instruction. A no-op once the VM has halted or
    /// faulted; callers check `state` to decide whether to keep stepping.
    pub fn step(&mut self) {
        if self.state != VmState::Running {
            return;
        }
        let pc = self.regs.pc;
        self.hot_path.record(pc);
        let word = match self.memory.read32(pc) {
            Ok(w) => w,
            Err(fault) => return self.fault(fault),
        };
        let instr = match decode::decode(word) {
            Ok(i) => i,
            Err(fault) => return self.fault(fault),
        };
        trace!("pc={pc:#x} word={word:#010x} instr={instr:?}");
        if let Err(fault) = self.execute_instruction(instr) {
            return self.fault(fault);
        }
        self.perf.instructions_retired += 1;
    }

    /// Runs up to `max_steps` instructions, stopping early if the VM halts
    /// or errors. Returns the number of instructions actually executed.
    pub fn execute(&mut self, max_steps: u64) -> u64 {
        let mut ran = 0;
        while ran < max_steps && self.state == VmState::Running {
            self.step();
            ran += 1;
            if self.yield_requested {
                self.yield_requested = false;
                break;
            }
        }
        ran
    }

    fn execute_instruction(&mut self, instr: Instruction) -> Result<(), VmFault> {
        match instr {
            Instruction::Lui { rd, imm } => {
                self.regs.set(rd, imm as u64);
                self.regs.pc += 4;
            }
            Instruction::Auipc { rd, imm } => {
                self.regs.set(rd, self.regs.pc.wrapping_add(imm as u64));
                self.regs.pc += 4;
            }
            Instruction::OpImm { op, rd, rs1, imm } => {
                let a = self.regs.get(rs1);
                let result = match op {
                    OpImm::Addi => a.wrapping_add(imm as u64),
                    OpImm::Slti => ((a as i64) < imm) as u64,
                    OpImm::Sltiu => (a < imm as u64) as u64,
                    OpImm::Xori => a ^ imm as u64,
                    OpImm::Ori => a | imm as u64,
                    OpImm::Andi => a & imm as u64,
                    OpImm::Slli => a.wrapping_shl((imm & 0x3f) as u32),
                    OpImm::Srli => a.wrapping_shr((imm & 0x3f) as u32),
                    OpImm::Srai => ((a as i64).wrapping_shr((imm & 0x3f) as u32)) as u64,
                };
                self.regs.set(rd, result);
                self.regs.pc += 4;
            }
            Instruction::Op { op, rd, rs1, rs2 } => {
                let a = self.regs.get(rs1);
                let b = self.regs.get(rs2);
                let result = match op {
                    Op::Add => a.wrapping_add(b),
                    Op::Sub => a.wrapping_sub(b),
                    Op::Sll => a.wrapping_shl((b & 0x3f) as u32),
                    Op::Slt => ((a as i64) < (b as i64)) as u64,
                    Op::Sltu => (a < b) as u64,
                    Op::Xor => a ^ b,
                    Op::Srl => a.wrapping_shr((b & 0x3f) as u32),
                    Op::Sra => ((a as i64).wrapping_shr((b & 0x3f) as u32)) as u64,
                    Op::Or => a | b,
                    Op::And => a & b,
                };
                self.regs.set(rd, result);
                self.regs.pc += 4;
            }
            Instruction::Load { width, rd, rs1, imm } => {
                let addr = self.regs.get(rs1).wrapping_add(imm as u64);
                let value = match width {
                    LoadWidth::B => self.memory.read8(addr)? as i8 as i64 as u64,
                    LoadWidth::H => self.memory.read16(addr)? as i16 as i64 as u64,
                    LoadWidth::W => self.memory.read32(addr)? as i32 as i64 as u64,
                    LoadWidth::D => self.memory.read64(addr)?,
                    LoadWidth::Bu => self.memory.read8(addr)? as u64,
                    LoadWidth::Hu => self.memory.read16(addr)? as u64,
                    LoadWidth::Wu => self.memory.read32(addr)? as u64,
                };
                self.regs.set(rd, value);
                self.regs.pc += 4;
            }
            Instruction::Store { width, rs1, rs2, imm } => {
                let addr = self.regs.get(rs1).wrapping_add(imm as u64);
                let value = self.regs.get(rs2);
                match width {
                    StoreWidth::B => self.memory.write8(addr, value as u8)?,
                    StoreWidth::H => self.memory.write16(addr, value as u16)?,
                    StoreWidth::W => self.memory.write32(addr, value as u32)?,
                    StoreWidth::D => self.memory.write64(addr, value)?,
                }
                self.regs.pc += 4;
            }
            Instruction::Branch { op, rs1, rs2, imm } => {
                let a = self.regs.get(rs1);
                let b = self.regs.get(rs2);
                let taken = match op {
                    BranchOp::Beq => a == b,
                    BranchOp::Bne => a != b,
                    BranchOp::Blt => (a as i64) < (b as i64),
                    BranchOp::Bge => (a as i64) >= (b as i64),
                    BranchOp::Bltu => a < b,
                    BranchOp::Bgeu => a >= b,
                };
                *self.branch_stats.entry((self.regs.pc, taken)).or_insert(0) += 1;
                self.regs.pc = if taken {
                    self.regs.pc.wrapping_add(imm as u64)
                } else {
                    self.regs.pc + 4
                };
            }
            Instruction::Jal { rd, imm } => {
                self.regs.set(rd, self.regs.pc + 4);
                self.regs.pc = self.regs.pc.wrapping_add(imm as u64);
            }
            Instruction::Jalr { rd, rs1, imm } => {
                let target = self.regs.get(rs1).wrapping_add(imm as u64) & !1u64;
                self.regs.set(rd, self.regs.pc + 4);
                self.regs.pc = target;
            }
            Instruction::Ecall => {
                self.dispatch_ecall()?;
                self.regs.pc += 4;
            }
        }
        Ok(())
    }

    fn dispatch_ecall(&mut self) -> Result<(), VmFault> {
        let num = self.regs.get(17); // a7
        let a0 = self.regs.get(10);
        let a1 = self.regs.get(11);
        let a2 = self.regs.get(12);
        let a3 = self.regs.get(13);
        let mut trap = self.trap.take().ok_or(VmFault::InvalidSyscall)?;
        let (result, yield_requested) = trap(num, a0, a1, a2, a3, &mut self.memory);
        self.trap = Some(trap);
        self.regs.set(10, result);
        self.yield_requested = yield_requested;
        self.perf.syscalls_dispatched += 1;
        Ok(())
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asm_addi(rd: u32, rs1: u32, imm: i32) -> u32 {
        ((imm as u32) << 20) | (rs1 << 15) | (rd << 7) | 0x13
    }

    #[test]
    fn addi_updates_register_and_advances_pc() {
        let mut vm = Vm::new();
        let word = asm_addi(1, 0, 42);
        vm.memory.write32(0, word).unwrap();
        vm.step();
        assert_eq!(vm.regs.get(1), 42);
        assert_eq!(vm.regs.pc, 4);
        assert_eq!(vm.state, VmState::Running);
    }

    #[test]
    fn invalid_instruction_sets_errored_state() {
        let mut vm = Vm::new();
        vm.memory.write32(0, 0x0000_007f).unwrap();
        vm.step();
        assert_eq!(vm.state, VmState::Errored);
        assert_eq!(vm.last_error, Some(VmFault::InvalidInstruction));
    }

    #[test]
    fn ecall_without_trap_faults_as_invalid_syscall() {
        let mut vm = Vm::new();
        vm.memory.write32(0, 0x0000_0073).unwrap();
        vm.step();
        assert_eq!(vm.last_error, Some(VmFault::InvalidSyscall));
    }

    #[test]
    fn ecall_invokes_installed_trap_and_writes_a0() {
        let mut vm = Vm::new();
        vm.install_syscall_trap(Box::new(|num, a0, _, _, _, _mem| {
            assert_eq!(num, 7);
            (a0 + 1, false)
        }));
        vm.regs.set(17, 7);
        vm.regs.set(10, 41);
        vm.memory.write32(0, 0x0000_0073).unwrap();
        vm.step();
        assert_eq!(vm.regs.get(10), 42);
        assert_eq!(vm.state, VmState::Running);
    }

    #[test]
    fn execute_stops_early_on_fault() {
        let mut vm = Vm::new();
        vm.memory.write32(0, 0x0000_007f).unwrap();
        let ran = vm.execute(10);
        assert_eq!(ran, 1);
    }
}
