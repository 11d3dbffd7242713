//! Courier - synchronous RPC over an AMQP broker
//!
//! A stateless HTTP gateway hands each call to a pool of background workers
//! through RabbitMQ and blocks until the matching reply comes back on a
//! per-call reply queue.
//!
//! - [`broker`]: transport traits with AMQP and in-memory implementations
//! - [`supervisor`]: keeps the shared connection alive
//! - [`rpc`]: per-call channel, retrying publish, correlated reply listener
//! - [`gateway`]: request/reply orchestration and the HTTP surface
//! - [`worker`]: competing consumer on the work queue
//! - [`client`]: load generator posting sample transactions to the gateway

pub mod broker;
pub mod client;
pub mod config;
pub mod gateway;
pub mod rpc;
pub mod supervisor;
pub mod utils;
pub mod worker;
