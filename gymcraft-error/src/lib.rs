//! # gymcraft-error
//!
//! Unified error handling for gymcraft.
//!
//! ## Design Philosophy
//!
//! - **ErrorKind**: Know what went wrong (e.g., InvalidState, PolicyExecution)
//! - **ErrorStatus**: Decide how to handle it (Permanent, Temporary, Persistent)
//! - **Error Context**: Key-value pairs that locate the cause
//! - **Error Source**: Wrap underlying errors without leaking raw types
//!
//! ## Usage
//!
//! ```rust
//! use gymcraft_error::{Error, ErrorKind};
//!
//! fn example() -> Result<(), Error> {
//!     Err(Error::new(ErrorKind::InvalidState, "step called before reset")
//!         .with_operation("maze::step")
//!         .with_context("env", "simple_maze"))
//! }
//! ```
//!
//! ## Principles
//!
//! - All functions return `Result<T, gymcraft_error::Error>`
//! - External errors are wrapped with `set_source(err)`
//! - Same error handled once, subsequent ops only append context

mod error;
mod kind;
mod status;

pub use error::Error;
pub use kind::ErrorKind;
pub use status::ErrorStatus;

/// Result type alias using gymcraft Error
pub type Result<T> = std::result::Result<T, Error>;
