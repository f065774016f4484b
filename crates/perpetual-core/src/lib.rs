//! perpetual-core: streaming response decoding and context truncation
//!
//! This crate holds the two pieces of the chat client with real contracts:
//! the server-sent-events decoder that turns raw transport chunks into
//! discrete stream events, and the payload builder that bounds how much
//! history is sent back to the completion API.

pub mod context;
pub mod decoder;
pub mod error;
pub mod types;

pub use context::{TRUNCATION_NOTICE, build_payload};
pub use decoder::{StreamDecoder, StreamEvent};
pub use error::{Error, Result};
pub use types::{Message, Role, SessionState};
