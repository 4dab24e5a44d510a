//! td-core: the issue store, workflow engine, TDQ query language and sync
//! engine behind the `td` command.
//!
//! # Conventions
//!
//! - **Errors**: library functions return [`error::Result`]; every failure
//!   carries a stable [`error::ErrorCode`].
//! - **Writes**: all state changes go through [`mutation::run`], which logs
//!   each change to the action log in the same transaction.
//! - **Logging**: `tracing` macros only; the CLI installs the subscriber.

#![forbid(unsafe_code)]

pub mod analytics;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod ids;
pub mod model;
pub mod mutation;
pub mod session;
pub mod sync;
pub mod tdq;
pub mod time;
pub mod vcs;
pub mod views;
pub mod webhook;
pub mod workflow;
pub mod workspace;

pub use db::Store;
pub use error::{ErrorCode, Result, TdError};
pub use mutation::{ChangeListener, ChangeSignal, MutationContext};
pub use workspace::Workspace;
