//! Debug console for nachos_vm
//!
//! Flag-filtered trace output in the style of the Nachos `DEBUG` facility.
//! Each trace line is tagged with a single character flag; only enabled
//! flags are formatted at all.
//!
//! Output goes to stderr when the `std` feature is on. Under `cfg(test)` it
//! is captured in a fixed buffer so tests can inspect it. Otherwise it is
//! dropped.

use core::fmt::{self, Write};
use spin::Mutex;

// ============================================================================
// Debug Flags
// ============================================================================

/// Page fault engine and TLB refill
pub const PAGING: char = 'v';

/// Swap reads and writes
pub const SWAP: char = 'h';

/// Context switches (save/restore state)
pub const CONTEXT: char = 't';

/// Address space construction and teardown
pub const ADDRSPACE: char = 'a';

/// Enables every flag
pub const ALL: char = '+';

#[cfg(test)]
const CAPTURE_SIZE: usize = 4096;

// ============================================================================
// Console
// ============================================================================

/// Debug console state
pub struct Console {
    /// One bit per ASCII flag character
    enabled: u128,
    /// Captured output for tests
    #[cfg(test)]
    buffer: heapless::String<CAPTURE_SIZE>,
}

impl Console {
    /// Create a console with every flag disabled
    pub const fn new() -> Self {
        Console {
            enabled: 0,
            #[cfg(test)]
            buffer: heapless::String::new(),
        }
    }

    fn flag_bit(flag: char) -> u128 {
        if flag.is_ascii() {
            1u128 << (flag as u32)
        } else {
            0
        }
    }

    /// Enable every flag character in `flags`
    pub fn enable(&mut self, flags: &str) {
        for flag in flags.chars() {
            self.enabled |= Self::flag_bit(flag);
        }
    }

    /// Disable every flag
    pub fn disable_all(&mut self) {
        self.enabled = 0;
    }

    /// Check whether a flag is enabled
    pub fn is_enabled(&self, flag: char) -> bool {
        self.enabled & Self::flag_bit(ALL) != 0 || self.enabled & Self::flag_bit(flag) != 0
    }

    /// Write a string to the console
    pub fn write_str(&mut self, s: &str) {
        #[cfg(test)]
        {
            // Drop what no longer fits
            let _ = self.buffer.push_str(s);
        }

        #[cfg(all(feature = "std", not(test)))]
        {
            std::eprint!("{}", s);
        }

        #[cfg(not(any(test, feature = "std")))]
        {
            let _ = s;
        }
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        Console::write_str(self, s);
        Ok(())
    }
}

/// Global console instance
static CONSOLE: Mutex<Console> = Mutex::new(Console::new());

/// Enable debug flags (never disables already enabled ones)
pub fn enable(flags: &str) {
    CONSOLE.lock().enable(flags);
}

/// Check whether a debug flag is enabled
pub fn enabled(flag: char) -> bool {
    CONSOLE.lock().is_enabled(flag)
}

/// Print formatted text to the console
pub fn print(args: fmt::Arguments) {
    let _ = CONSOLE.lock().write_fmt(args);
}

/// Take the captured output, leaving the buffer empty
#[cfg(test)]
pub fn take_output() -> heapless::String<CAPTURE_SIZE> {
    core::mem::take(&mut CONSOLE.lock().buffer)
}

/// Print a trace line when `flag` is enabled
#[macro_export]
macro_rules! vm_debug {
    ($flag:expr, $($arg:tt)*) => {
        if $crate::console::enabled($flag) {
            $crate::console::print(format_args!($($arg)*));
            $crate::console::print(format_args!("\n"));
        }
    };
}
