//! Process-wide shutdown flag driven by SIGTERM/SIGINT.
//!
//! Instance loops check the flag between poll cycles; a scan already in
//! flight runs to completion first.

use std::os::raw::c_int;
use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn on_terminate(_signal: c_int) {
    RUNNING.store(false, Ordering::SeqCst);
}

/// Installs the handlers. Call once, before any instance starts.
pub fn install() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_terminate),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
    unsafe {
        sigaction(Signal::SIGTERM, &action)?;
        sigaction(Signal::SIGINT, &action)?;
    }
    Ok(())
}

pub fn running() -> &'static AtomicBool {
    &RUNNING
}
