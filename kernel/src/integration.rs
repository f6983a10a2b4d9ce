//! Binds a `Vm` to a `Kernel`: installs the ECALL trap, seeds the
//! framebuffer, and drives the cooperative run loop.

use std::cell::RefCell;
use std::rc::Rc;

use log::info;

use crate::kern::Kernel;
use crate::kern::process::ProcessState;
use crate::vm::{Vm, VmState};

/// A diagnostic pattern `finish_init` paints into the framebuffer so a host
/// compositor can tell a freshly-initialized kernel apart from a blank one.
const INIT_PATTERN_COLOR: u32 = 0x202030ff;

pub struct Integration {
    pub vm: Vm,
    pub kernel: Rc<RefCell<Kernel>>,
    initialized: bool,
}

impl Integration {
    pub fn new(vm: Vm, kernel: Kernel) -> Self {
        Integration { vm, kernel: Rc::new(RefCell::new(kernel)), initialized: false }
    }

    /// Stores the kernel reference and wires the ECALL trap. Call
    /// `finish_init` afterward to complete setup.
    pub fn init_with_kernel(vm: Vm, kernel: Kernel) -> Self {
        Self::new(vm, kernel)
    }

    pub fn finish_init(&mut self) {
        let kernel = Rc::clone(&self.kernel);
        self.vm.install_syscall_trap(Box::new(move |num, a0, a1, a2, a3, memory| {
            kernel.borrow_mut().handle_syscall(num, a0, a1, a2, a3, memory)
        }));
        self.vm.memory.fb_clear(INIT_PATTERN_COLOR);
        self.initialized = true;
        info!("integration layer initialized");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Saves the VM's PC/SP into the current process's context, runs it for
    /// up to `max_steps`, then saves the context back. Returns `true` if
    /// execution should continue (the VM is still running), `false` if it
    /// halted or faulted.
    pub fn run_current_process(&mut self, max_steps: u64) -> bool {
        let current = self.kernel.borrow().scheduler.get_current();
        let Some(pid) = current else {
            return false;
        };
        {
            let mut kernel = self.kernel.borrow_mut();
            if let Some(process) = kernel.processes.get_mut(pid) {
                if let Some(ctx) = process.context {
                    self.vm.regs.pc = ctx.pc;
                    self.vm.regs.set(2, ctx.sp);
                }
            }
        }
        self.vm.execute(max_steps);
        {
            let mut kernel = self.kernel.borrow_mut();
            if let Some(process) = kernel.processes.get_mut(pid) {
                if let Some(ctx) = process.context.as_mut() {
                    ctx.pc = self.vm.regs.pc;
                    ctx.sp = self.vm.regs.get(2);
                }
            }
        }
        self.vm.state == VmState::Running
    }

    /// Picks the next ready process via the scheduler, sets it current, and
    /// runs it. Returns `true` if a process ran and should continue.
    pub fn schedule_and_run_next(&mut self, max_steps: u64) -> bool {
        let next = {
            let mut kernel = self.kernel.borrow_mut();
            let next = kernel.scheduler.schedule_next(&kernel.processes);
            if let Some(pid) = next {
                kernel.scheduler.set_current(pid);
                let _ = kernel.processes.set_state(pid, ProcessState::Running);
            }
            next
        };
        let Some(pid) = next else {
            return false;
        };
        let still_running = self.run_current_process(max_steps);
        if still_running {
            let mut kernel = self.kernel.borrow_mut();
            if kernel.processes.get(pid).map(|p| p.state) == Some(ProcessState::Running) {
                kernel.scheduler.mark_ready(&mut kernel.processes, pid);
            }
        }
        still_running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kern::syscall;

    #[test]
    fn finish_init_paints_diagnostic_pattern() {
        let mut integration = Integration::new(Vm::new(), Kernel::new());
        integration.finish_init();
        assert_eq!(integration.vm.memory.fb_pixel(0, 0), INIT_PATTERN_COLOR);
        assert!(integration.is_initialized());
    }

    #[test]
    fn ecall_round_trips_through_installed_trap() {
        let mut integration = Integration::new(Vm::new(), Kernel::new());
        integration.finish_init();
        integration.vm.regs.set(17, syscall::SYS_GETPID);
        integration.vm.memory.write32(0, 0x0000_0073).unwrap();
        integration.vm.step();
        assert_eq!(integration.vm.regs.get(10), 0);
    }

    #[test]
    fn schedule_and_run_next_with_no_ready_process_returns_false() {
        let mut integration = Integration::new(Vm::new(), Kernel::new());
        integration.finish_init();
        assert!(!integration.schedule_and_run_next(10));
    }

    fn addi(rd: u32, rs1: u32, imm: i32) -> u32 {
        ((imm as u32) << 20) | (rs1 << 15) | (rd << 7) | 0x13
    }

    #[test]
    fn processes_that_outlast_their_quantum_keep_rotating() {
        let mut integration = Integration::new(Vm::new(), Kernel::new());
        integration.finish_init();
        for i in 0..3u64 {
            integration.vm.memory.write32(i * 4, addi(1, 0, 1)).unwrap();
            integration.vm.memory.write32(0x100 + i * 4, addi(1, 0, 1)).unwrap();
        }
        let (pid1, pid2) = {
            let mut kernel = integration.kernel.borrow_mut();
            let pid1 = kernel.processes.spawn(0x0, 0).unwrap();
            let pid2 = kernel.processes.spawn(0x100, 0).unwrap();
            (pid1, pid2)
        };

        assert!(integration.schedule_and_run_next(3));
        assert_eq!(integration.kernel.borrow().scheduler.get_current(), Some(pid1));
        assert!(integration.schedule_and_run_next(3));
        assert_eq!(integration.kernel.borrow().scheduler.get_current(), Some(pid2));
        assert!(integration.schedule_and_run_next(3));
        assert_eq!(integration.kernel.borrow().scheduler.get_current(), Some(pid1));
    }
}
