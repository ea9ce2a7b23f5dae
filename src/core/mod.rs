//! Core infrastructure module for esml.
//!
//! - [`types`]: shared enumerations and aliases
//! - [`constants`]: REST paths and defaults
//! - [`error`]: the crate error type
//! - [`math`]: sigmoid, softmax and tolerance helpers

pub mod constants;
pub mod error;
pub mod math;
pub mod types;

pub use constants::*;
pub use error::{EsMlError, Result};
pub use types::*;

use std::sync::atomic::{AtomicBool, Ordering};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize logging. Safe to call more than once.
pub fn initialize_core() -> Result<()> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    // Try to initialize env_logger, ignore if already initialized
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();

    log::debug!("esml {} initialized", ESML_VERSION);
    Ok(())
}

/// Check if [`initialize_core`] has run
pub fn is_core_initialized() -> bool {
    INITIALIZED.load(Ordering::SeqCst)
}
