use thiserror::Error;

/// Faults raised inside the VM's own execution loop. Guest-recoverable faults
/// (everything but `InvalidInstruction`) are surfaced to the guest as a
/// negative ABI error code rather than stopping the VM; see `kern::error`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VmFault {
    #[error("invalid memory access")]
    InvalidMemoryAccess,
    #[error("unaligned memory access")]
    UnalignedMemoryAccess,
    #[error("invalid instruction encoding")]
    InvalidInstruction,
    #[error("invalid syscall")]
    InvalidSyscall,
}
