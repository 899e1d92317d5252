//! Wire protocol shared between the autobridge agent and its callers.
//!
//! This crate provides:
//! - The structured request document accepted by the control endpoint
//! - Monitor specifications for property change reporting
//! - The notification body posted to callback URLs

mod protocol;

pub use protocol::*;

/// Default TCP port on which the agent listens for control sessions.
pub const DEFAULT_PORT: u16 = 1035;

/// Command name used for speech, both by the legacy encodings and the structured form.
pub const SPEAK_COMMAND: &str = "speak";
