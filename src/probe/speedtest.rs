//! Throughput measurement over HTTP.
//!
//! The best server is the candidate answering a tiny request fastest. Download
//! throughput is measured by streaming `GET {server}/__down?bytes=N`; upload by
//! posting `N` random bytes to `{server}/__up`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::RngCore;

use crate::config::SpeedTestConfig;

use super::ProbeError;

/// Raw throughput in bits per second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    pub download_bps: f64,
    pub upload_bps: f64,
}

impl Throughput {
    pub fn download_mbps(&self) -> f64 {
        self.download_bps / 1_000_000.0
    }

    pub fn upload_mbps(&self) -> f64 {
        self.upload_bps / 1_000_000.0
    }
}

/// Something that can measure link throughput in both directions.
#[async_trait]
pub trait ThroughputMeter: Send + Sync {
    async fn measure(&self) -> Result<Throughput, ProbeError>;
}

/// HTTP speed test against one of several candidate servers.
pub struct HttpThroughputMeter {
    client: reqwest::Client,
    servers: Vec<String>,
    download_bytes: usize,
    upload_bytes: usize,
}

impl HttpThroughputMeter {
    pub fn new(config: &SpeedTestConfig) -> Result<Self, ProbeError> {
        if config.servers.is_empty() {
            return Err(ProbeError::Config("no speed test servers configured".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProbeError::Network(e.to_string()))?;

        Ok(Self {
            client,
            servers: config
                .servers
                .iter()
                .map(|s| s.trim_end_matches('/').to_string())
                .collect(),
            download_bytes: config.download_bytes,
            upload_bytes: config.upload_bytes,
        })
    }

    async fn latency(&self, server: &str) -> Result<Duration, ProbeError> {
        let start = Instant::now();
        let response = self
            .client
            .get(format!("{}/__down?bytes=0", server))
            .send()
            .await
            .map_err(map_reqwest)?
            .error_for_status()
            .map_err(map_reqwest)?;
        let _body = response.bytes().await.map_err(map_reqwest)?;
        Ok(start.elapsed())
    }

    /// Pick the reachable server with the lowest latency.
    pub async fn select_best_server(&self) -> Result<String, ProbeError> {
        let mut best: Option<(Duration, &String)> = None;

        for server in &self.servers {
            match self.latency(server).await {
                Ok(latency) => {
                    tracing::debug!("Speed test server {} answered in {:?}", server, latency);
                    if best.map_or(true, |(b, _)| latency < b) {
                        best = Some((latency, server));
                    }
                }
                Err(e) => tracing::warn!("Speed test server {} unreachable: {}", server, e),
            }
        }

        best.map(|(_, s)| s.clone())
            .ok_or_else(|| ProbeError::Network("no speed test server reachable".to_string()))
    }

    /// Download throughput in bits per second.
    pub async fn download(&self, server: &str) -> Result<f64, ProbeError> {
        let start = Instant::now();
        let mut response = self
            .client
            .get(format!("{}/__down?bytes={}", server, self.download_bytes))
            .send()
            .await
            .map_err(map_reqwest)?
            .error_for_status()
            .map_err(map_reqwest)?;

        let mut received: usize = 0;
        while let Some(chunk) = response.chunk().await.map_err(map_reqwest)? {
            received += chunk.len();
        }

        bits_per_second(received, start.elapsed())
    }

    /// Upload throughput in bits per second.
    pub async fn upload(&self, server: &str) -> Result<f64, ProbeError> {
        let mut payload = vec![0u8; self.upload_bytes];
        rand::thread_rng().fill_bytes(&mut payload);
        let sent = payload.len();

        let start = Instant::now();
        self.client
            .post(format!("{}/__up", server))
            .body(payload)
            .send()
            .await
            .map_err(map_reqwest)?
            .error_for_status()
            .map_err(map_reqwest)?;

        bits_per_second(sent, start.elapsed())
    }
}

#[async_trait]
impl ThroughputMeter for HttpThroughputMeter {
    async fn measure(&self) -> Result<Throughput, ProbeError> {
        let server = self.select_best_server().await?;
        tracing::info!("Speed test using server {}", server);

        let download_bps = self.download(&server).await?;
        let upload_bps = self.upload(&server).await?;

        Ok(Throughput {
            download_bps,
            upload_bps,
        })
    }
}

fn bits_per_second(bytes: usize, elapsed: Duration) -> Result<f64, ProbeError> {
    if bytes == 0 {
        return Err(ProbeError::Network("no data transferred".to_string()));
    }
    let secs = elapsed.as_secs_f64().max(1e-6);
    Ok(bytes as f64 * 8.0 / secs)
}

fn map_reqwest(e: reqwest::Error) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Network(format!("request timed out: {}", e))
    } else {
        ProbeError::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Bytes,
        extract::Query,
        routing::{get, post},
        Router,
    };
    use std::collections::HashMap;

    async fn spawn_speed_stub() -> String {
        async fn down(Query(q): Query<HashMap<String, usize>>) -> Vec<u8> {
            vec![7u8; q.get("bytes").copied().unwrap_or(0)]
        }
        async fn up(body: Bytes) -> String {
            body.len().to_string()
        }

        let app = Router::new()
            .route("/__down", get(down))
            .route("/__up", post(up));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn config(servers: Vec<String>) -> SpeedTestConfig {
        SpeedTestConfig {
            servers,
            download_bytes: 256 * 1024,
            upload_bytes: 128 * 1024,
            timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_mbps_conversion() {
        let t = Throughput {
            download_bps: 94_500_000.0,
            upload_bps: 12_000_000.0,
        };
        assert_eq!(t.download_mbps(), 94.5);
        assert_eq!(t.upload_mbps(), 12.0);
    }

    #[test]
    fn test_empty_server_list_rejected() {
        assert!(matches!(
            HttpThroughputMeter::new(&config(vec![])),
            Err(ProbeError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_measure_against_stub() {
        let good = spawn_speed_stub().await;
        // nothing listens on port 9 of the loopback
        let dead = "http://127.0.0.1:9".to_string();
        let meter = HttpThroughputMeter::new(&config(vec![dead, good.clone()])).unwrap();

        assert_eq!(meter.select_best_server().await.unwrap(), good);

        let t = meter.measure().await.unwrap();
        assert!(t.download_bps > 0.0);
        assert!(t.upload_bps > 0.0);
    }

    #[tokio::test]
    async fn test_no_reachable_server() {
        let meter = HttpThroughputMeter::new(&config(vec!["http://127.0.0.1:9".to_string()]))
            .unwrap();
        assert!(matches!(meter.measure().await, Err(ProbeError::Network(_))));
    }
}
