//! Network round-trips to the collection server

use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use url::Url;

use crate::errors::TransportError;
use crate::packets::Packet;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const INTERNET_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the datalogger needs from the network
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn check_internet(&self) -> bool;
    async fn check_server(&self) -> bool;
    async fn remote_checksum(&self) -> Result<String, TransportError>;
    /// Raw configuration payload, validated by the caller
    async fn remote_configuration(&self) -> Result<String, TransportError>;
    /// Returns how many packets, from the front of `packets`, the server accepted
    async fn send_packets(&self, packets: &[Packet]) -> Result<usize, TransportError>;
}

#[derive(Debug, Deserialize)]
struct ChecksumResponse {
    checksum: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    accepted: usize,
}

/// JSON-over-HTTP transport
pub struct HttpTransport {
    client: reqwest::Client,
    base: Url,
    internet_check_address: String,
}

impl HttpTransport {
    pub fn new(server_url: &str, internet_check_address: &str) -> Result<Self, TransportError> {
        let mut base = Url::parse(server_url)?;
        // Url::join replaces the last segment unless the base ends with '/'
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base,
            internet_check_address: internet_check_address.to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        Ok(self.base.join(path)?)
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, TransportError> {
        let url = self.endpoint(path)?;
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?;
        ensure_success(response)
    }
}

fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(TransportError::Status(status.as_u16()))
    }
}

#[async_trait]
impl DeliveryTransport for HttpTransport {
    async fn check_internet(&self) -> bool {
        let address = self.internet_check_address.as_str();
        match timeout(INTERNET_CHECK_TIMEOUT, TcpStream::connect(address)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("No internet connection: {}", e);
                false
            }
            Err(_) => {
                debug!("No internet connection: {} timed out", address);
                false
            }
        }
    }

    async fn check_server(&self) -> bool {
        match self.get("ping").await {
            Ok(_) => true,
            Err(e) => {
                warn!("Server not reachable: {}", e);
                false
            }
        }
    }

    async fn remote_checksum(&self) -> Result<String, TransportError> {
        let body = self.get("configuration/checksum").await?.text().await?;
        let response: ChecksumResponse = serde_json::from_str(&body)?;
        Ok(response.checksum)
    }

    async fn remote_configuration(&self) -> Result<String, TransportError> {
        Ok(self.get("configuration").await?.text().await?)
    }

    async fn send_packets(&self, packets: &[Packet]) -> Result<usize, TransportError> {
        let url = self.endpoint("packets")?;
        debug!("POST {} ({} packets)", url, packets.len());
        let response = self.client.post(url).json(packets).send().await?;
        let body = ensure_success(response)?.text().await?;
        let response: SendResponse = serde_json::from_str(&body)?;
        Ok(response.accepted.min(packets.len()))
    }
}
