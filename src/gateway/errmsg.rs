//! Error messages returned to HTTP callers.
//!
//! Messages are fixed strings so no broker detail leaks to the caller.
//! The underlying error is logged.

/// No reply arrived before the call deadline.
pub const TIMEOUT: &str = "The server took too long to respond.";

/// Connection, channel, publish or reply failure.
pub const SEND_FAILED: &str = "An error occurred while sending the transaction.";
