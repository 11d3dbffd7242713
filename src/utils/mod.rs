//! Shared helpers.
//!
//! Process bootstrap, cooperative cancellation and HTTP plumbing used by
//! both the gateway and the worker.

pub mod bootstrap;
pub mod cancel;
pub mod http;
