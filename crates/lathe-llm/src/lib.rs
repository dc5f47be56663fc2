//! Provider-neutral completion types for the lathe agent loop.
//!
//! This crate defines the narrow surface the loop consumes: request and
//! response shapes, the message/content-part model, tool definitions,
//! usage accounting, an error taxonomy with retryability classification,
//! and the [`Completer`] trait. Concrete provider adapters (HTTP clients,
//! retry schedules, streaming transports) live behind that trait and are
//! not part of this crate.

pub mod completer;
pub mod errors;
pub mod types;

pub use completer::*;
pub use errors::*;
pub use types::*;
