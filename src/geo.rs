//! IP geolocation lookups with a process-lifetime cache.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use thiserror::Error;

use crate::model::GeoLocation;

/// Geolocation lookup error types.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("response has no location")]
    MissingLocation,
    #[error("malformed location {0:?}")]
    Malformed(String),
}

/// Something that can turn an IP into coordinates.
#[async_trait]
pub trait GeoSource: Send + Sync {
    async fn locate(&self, ip: IpAddr) -> Result<GeoLocation, LookupError>;
}

#[derive(Debug, Deserialize)]
struct IpInfoResponse {
    loc: Option<String>,
}

/// ipinfo.io style service: `GET {base}/{ip}/json` returning `{"loc": "lat,lon"}`.
pub struct IpInfoSource {
    client: reqwest::Client,
    base_url: String,
}

impl IpInfoSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LookupError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LookupError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl GeoSource for IpInfoSource {
    async fn locate(&self, ip: IpAddr) -> Result<GeoLocation, LookupError> {
        let url = format!("{}/{}/json", self.base_url, ip);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LookupError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LookupError::Status(response.status().as_u16()));
        }

        let body: IpInfoResponse = response
            .json()
            .await
            .map_err(|e| LookupError::Network(e.to_string()))?;

        let loc = body.loc.ok_or(LookupError::MissingLocation)?;
        parse_location(&loc)
    }
}

/// Parse a `"<lat>,<lon>"` pair.
pub fn parse_location(loc: &str) -> Result<GeoLocation, LookupError> {
    let malformed = || LookupError::Malformed(loc.to_string());

    let (lat, lon) = loc.split_once(',').ok_or_else(malformed)?;
    let latitude: f64 = lat.trim().parse().map_err(|_| malformed())?;
    let longitude: f64 = lon.trim().parse().map_err(|_| malformed())?;

    if !latitude.is_finite() || !longitude.is_finite() {
        return Err(malformed());
    }

    Ok(GeoLocation {
        latitude,
        longitude,
    })
}

/// Whether `ip` can have a public location. `::ffff:a.b.c.d` is judged as
/// `a.b.c.d`.
pub fn is_locatable(ip: IpAddr) -> bool {
    let ip = ip.to_canonical();
    !ip.is_loopback() && !ip.is_unspecified()
}

/// Memoizing front for a [`GeoSource`].
///
/// Successful lookups are kept for the life of the process. Failures are
/// never cached, so the next call for the same address retries.
pub struct GeoCache {
    source: Arc<dyn GeoSource>,
    cache: RwLock<HashMap<IpAddr, GeoLocation>>,
}

impl GeoCache {
    pub fn new(source: Arc<dyn GeoSource>) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve `ip` to a location. Loopback, unspecified and unparseable
    /// addresses return `None` without touching the source. IPv4-mapped IPv6
    /// addresses are looked up as their IPv4 form.
    pub async fn resolve(&self, ip: &str) -> Option<GeoLocation> {
        let addr = match ip.trim().parse::<IpAddr>() {
            Ok(addr) if is_locatable(addr) => addr.to_canonical(),
            _ => return None,
        };

        let cached = self.cache.read().get(&addr).copied();
        if cached.is_some() {
            return cached;
        }

        match self.source.locate(addr).await {
            Ok(loc) => {
                self.cache.write().insert(addr, loc);
                Some(loc)
            }
            Err(e) => {
                tracing::warn!("Geolocation lookup for {} failed: {}", addr, e);
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }
}
