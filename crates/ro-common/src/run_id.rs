//! Identifiers for rows the service creates and for the running process.
//!
//! Every call record, batch and analysis row the service writes gets a fresh
//! ULID. The process-level run id is attached to log lines so that batches
//! launched by one API instance can be traced back to it.
//!
//! # Example
//! ```
//! use ro_common::run_id;
//!
//! let process = run_id::get();
//! let batch_id = run_id::generate();
//! assert_ne!(process, batch_id);
//! ```

use once_cell::sync::Lazy;
use ulid::Ulid;

static RUN_ID: Lazy<String> = Lazy::new(|| Ulid::new().to_string());

/// Returns the process-level run id (generated on first access).
#[inline]
pub fn get() -> &'static str {
    &RUN_ID
}

/// Generates a fresh, time-ordered ULID.
#[inline]
pub fn generate() -> String {
    Ulid::new().to_string()
}
