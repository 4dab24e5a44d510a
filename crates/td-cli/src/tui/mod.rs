//! Terminal user interface for td.
//!
//! ## Entry points
//!
//! - [`monitor::run_monitor`]: live dashboard of the session's work.

pub mod keymap;
pub mod monitor;
