//! Guest-visible error taxonomy and its negative-integer ABI mapping.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("invalid handle")]
    InvalidHandle,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("permission denied")]
    PermissionDenied,
    #[error("not found")]
    NotFound,
    #[error("out of memory")]
    OutOfMemory,
    #[error("would block")]
    WouldBlock,
    #[error("interrupted")]
    Interrupted,
    #[error("invalid syscall")]
    InvalidSyscall,
    #[error("invalid address")]
    InvalidAddress,
    #[error("unaligned access")]
    UnalignedAccess,
    #[error("out of bounds")]
    OutOfBounds,
}

impl ErrorKind {
    /// The normative negative two's-complement code placed in a0.
    pub fn code(self) -> i64 {
        match self {
            ErrorKind::InvalidHandle => -1,
            ErrorKind::InvalidArgument => -2,
            ErrorKind::PermissionDenied => -3,
            ErrorKind::NotFound => -4,
            ErrorKind::OutOfMemory => -5,
            ErrorKind::WouldBlock => -6,
            ErrorKind::Interrupted => -7,
            ErrorKind::InvalidSyscall => -8,
            ErrorKind::InvalidAddress => -9,
            ErrorKind::UnalignedAccess => -10,
            ErrorKind::OutOfBounds => -11,
        }
    }

    pub fn to_a0(self) -> u64 {
        self.code() as u64
    }
}

pub type SyscallResult = Result<u64, ErrorKind>;

pub fn result_to_a0(result: SyscallResult) -> u64 {
    match result {
        Ok(value) => value,
        Err(kind) => kind.to_a0(),
    }
}
