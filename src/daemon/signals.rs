//! SIGINT/SIGTERM wiring: both set a shared shutdown flag the loop checks
//! once per iteration.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use signal_hook::consts::{SIGINT, SIGTERM};

use crate::core::errors::{CddError, Result};

/// Register termination signals against a fresh shutdown flag.
pub fn install_shutdown_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&flag)).map_err(|err| {
            CddError::Runtime {
                details: format!("cannot register signal handler {signal}: {err}"),
            }
        })?;
    }
    Ok(flag)
}
