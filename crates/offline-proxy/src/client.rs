//! Network client

use async_trait::async_trait;
use http::{HeaderMap, HeaderValue};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ProxyError;
use crate::request::{FetchRequest, FetchResponse, is_hop_by_hop};

/// Header stamped on every outgoing request
///
/// A request arriving with this header set has come back from our own
/// forwarding and must not be forwarded again.
pub const HOP_HEADER: &str = "x-offline-cache-hop";

/// Something that can send a request to the network
///
/// The interception layer only ever talks to the network through this
/// trait, so tests can script connectivity.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, ProxyError>;
}

/// Network client configuration
#[derive(Clone, Debug)]
pub struct HttpFetcherConfig {
    /// User agent sent with every request
    pub user_agent: String,
    /// Connection establishment timeout
    pub connect_timeout: Duration,
    /// Skip TLS certificate verification
    pub skip_tls_verify: bool,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("offline-cache/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout: Duration::from_secs(10),
            skip_tls_verify: false,
        }
    }
}

/// reqwest-backed fetcher
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a new fetcher
    pub fn new(config: HttpFetcherConfig) -> Result<Self, ProxyError> {
        let mut builder = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout);

        if config.skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build()?;

        info!("Created network client ({})", config.user_agent);

        Ok(Self { client })
    }

    /// Copy end-to-end headers, dropping connection-specific ones and Host,
    /// and stamp the hop header
    fn outgoing_headers(headers: &HeaderMap) -> HeaderMap {
        let mut forwarded = HeaderMap::with_capacity(headers.len() + 1);
        for (name, value) in headers {
            if is_hop_by_hop(name.as_str()) || *name == http::header::HOST {
                continue;
            }
            forwarded.append(name.clone(), value.clone());
        }
        forwarded.insert(HOP_HEADER, HeaderValue::from_static("1"));
        forwarded
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, ProxyError> {
        if !request.is_http() {
            return Err(ProxyError::UnsupportedScheme(request.url.scheme().to_string()));
        }

        debug!("Fetching {} {}", request.method, request.url);

        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(Self::outgoing_headers(&request.headers))
            .body(request.body)
            .send()
            .await?;

        let status = response.status();
        let mut headers = HeaderMap::with_capacity(response.headers().len());
        for (name, value) in response.headers() {
            if !is_hop_by_hop(name.as_str()) {
                headers.append(name.clone(), value.clone());
            }
        }

        let body = response.bytes().await?;
        debug!("Fetched {} -> {} ({} bytes)", request.url, status, body.len());

        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }
}
