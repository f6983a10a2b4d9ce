//! Process-wide toggle that silences host I/O (stdout logging of framebuffer
//! syncs, etc.) during tests. A scoped guard restores the prior state on
//! every exit path, including unwinding.

use std::sync::atomic::{AtomicBool, Ordering};

static RAW_IO_ENABLED: AtomicBool = AtomicBool::new(true);

pub fn is_enabled() -> bool {
    RAW_IO_ENABLED.load(Ordering::SeqCst)
}

/// RAII guard returned by `disable()`. Restores the previous state when dropped.
pub struct RawIoGuard {
    previous: bool,
}

impl Drop for RawIoGuard {
    fn drop(&mut self) {
        RAW_IO_ENABLED.store(self.previous, Ordering::SeqCst);
    }
}

/// Disables host I/O for the lifetime of the returned guard.
pub fn disable() -> RawIoGuard {
    let previous = RAW_IO_ENABLED.swap(false, Ordering::SeqCst);
    RawIoGuard { previous }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disable_is_restored_on_drop() {
        assert!(is_enabled());
        {
            let _guard = disable();
            assert!(!is_enabled());
        }
        assert!(is_enabled());
    }

    #[test]
    fn nested_guards_restore_in_order() {
        let outer = disable();
        {
            let inner = disable();
            assert!(!is_enabled());
            drop(inner);
            assert!(!is_enabled());
        }
        drop(outer);
        assert!(is_enabled());
    }
}
