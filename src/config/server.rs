//! Gateway, worker and client configuration types.

use std::time::Duration;

use serde::Deserialize;

use crate::broker::WORK_QUEUE;

/// Gateway configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Host to bind to.
    pub host: String,
    /// HTTP port.
    pub port: u16,
    /// Queue jobs are published to.
    pub work_queue: String,
    /// How long a caller waits for the reply.
    pub timeout_ms: u64,
    /// Publish retries after the first attempt.
    pub publish_retries: u32,
    /// Base pause between publish attempts (250ms is added on top).
    pub publish_backoff_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            work_queue: WORK_QUEUE.to_string(),
            timeout_ms: 5 * 60 * 1000,
            publish_retries: 5,
            publish_backoff_ms: 500,
        }
    }
}

impl GatewayConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn publish_backoff(&self) -> Duration {
        Duration::from_millis(self.publish_backoff_ms)
    }
}

/// Worker configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Host to bind the health endpoint to.
    pub host: String,
    /// HTTP port for the health endpoint.
    pub port: u16,
    /// Queue to consume jobs from.
    pub queue: String,
    /// Declare the queue durable.
    pub durable: bool,
    /// Synthetic work duration per job.
    pub work_delay_ms: u64,
    /// Jobs accepted but not yet replied to.
    pub max_in_flight: usize,
    /// Reply publish retries after the first attempt.
    pub publish_retries: u32,
    /// Base pause between reply publish attempts.
    pub publish_backoff_ms: u64,
    /// Pause before resubscribing after the consumer stops.
    pub resubscribe_delay_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8085,
            queue: WORK_QUEUE.to_string(),
            durable: false,
            work_delay_ms: 3000,
            max_in_flight: 64,
            publish_retries: 5,
            publish_backoff_ms: 500,
            resubscribe_delay_ms: 1000,
        }
    }
}

impl WorkerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn work_delay(&self) -> Duration {
        Duration::from_millis(self.work_delay_ms)
    }

    pub fn publish_backoff(&self) -> Duration {
        Duration::from_millis(self.publish_backoff_ms)
    }

    pub fn resubscribe_delay(&self) -> Duration {
        Duration::from_millis(self.resubscribe_delay_ms)
    }

    /// Prefetch sent to the broker; clamped to the AMQP field width.
    pub fn prefetch(&self) -> u16 {
        u16::try_from(self.max_in_flight.max(1)).unwrap_or(u16::MAX)
    }
}

/// Load-generating client configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Gateway hostname.
    pub server_host: String,
    /// Gateway port.
    pub server_port: u16,
    /// Pause between requests.
    pub interval_ms: u64,
    /// Per-request timeout.
    pub timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: "localhost".to_string(),
            server_port: 8080,
            interval_ms: 2500,
            timeout_ms: 5 * 60 * 1000,
        }
    }
}

impl ClientConfig {
    pub fn server_url(&self) -> String {
        format!("http://{}:{}", self.server_host, self.server_port)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_config_default() {
        let gateway = GatewayConfig::default();
        assert_eq!(gateway.port, 8080);
        assert_eq!(gateway.work_queue, "transaction");
        assert_eq!(gateway.timeout(), Duration::from_millis(300_000));
        assert_eq!(gateway.publish_retries, 5);
        assert_eq!(gateway.publish_backoff(), Duration::from_millis(500));
        assert_eq!(gateway.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_worker_config_default() {
        let worker = WorkerConfig::default();
        assert_eq!(worker.port, 8085);
        assert_eq!(worker.queue, "transaction");
        assert!(!worker.durable);
        assert_eq!(worker.work_delay(), Duration::from_secs(3));
        assert_eq!(worker.prefetch(), 64);
    }

    #[test]
    fn test_worker_prefetch_clamped() {
        let worker = WorkerConfig {
            max_in_flight: 1_000_000,
            ..Default::default()
        };
        assert_eq!(worker.prefetch(), u16::MAX);

        let worker = WorkerConfig {
            max_in_flight: 0,
            ..Default::default()
        };
        assert_eq!(worker.prefetch(), 1);
    }

    #[test]
    fn test_client_config_default() {
        let client = ClientConfig::default();
        assert_eq!(client.server_url(), "http://localhost:8080");
        assert_eq!(client.interval(), Duration::from_millis(2500));
    }
}
