//! Signal handling for graceful batch shutdown
//!
//! Two-phase Ctrl+C:
//! - First Ctrl+C: set the interrupt flag; in-flight items finish, nothing
//!   new is dispatched, and the partial batch summary is still printed
//! - Second Ctrl+C: force exit with code 130

use std::sync::atomic::{AtomicBool, Ordering};

/// Process exit codes
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Everything processed (or skipped) cleanly
    Success = 0,
    /// Unrecoverable failure before or during the command
    Failure = 1,
    /// The batch completed but some items ended in error outcomes
    BatchErrors = 2,
    /// User interrupted with Ctrl+C
    Interrupted = 130,
}

/// Set once the user has requested a stop
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Install the Ctrl+C handler. A batch runner passes [`interrupt_flag`] to
/// the executor so dispatch stops at the next item boundary.
pub fn setup_signal_handler() {
    if let Err(e) = ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::AcqRel) {
            // Second Ctrl+C: force exit
            std::process::exit(ExitCode::Interrupted as i32);
        }
        eprintln!("\nInterrupted. Letting in-flight items finish; Ctrl+C again to force quit.");
    }) {
        eprintln!("Warning: Failed to set Ctrl+C handler: {e}");
    }
}

/// The flag the executor polls between dispatches.
pub fn interrupt_flag() -> &'static AtomicBool {
    &INTERRUPTED
}
