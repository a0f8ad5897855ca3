//! Trusted external time for correcting packet timestamps

use async_trait::async_trait;
use log::debug;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Duration};

use crate::errors::TimeSyncError;
use crate::utils::unix_now;

const NTP_PACKET_LEN: usize = 48;
/// Seconds between the NTP epoch (1900) and the unix epoch (1970)
const NTP_UNIX_EPOCH_DELTA: f64 = 2_208_988_800.0;
/// LI = 0, version 3, mode 3 (client)
const SNTP_CLIENT_HEADER: u8 = 0b00_011_011;
const MODE_SERVER: u8 = 4;
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait TimeSource: Send + Sync {
    /// Seconds to add to the local clock to get trusted time
    async fn offset(&self) -> Result<f64, TimeSyncError>;
}

/// Single-exchange SNTP client
pub struct SntpTimeSource {
    server: String,
}

impl SntpTimeSource {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
        }
    }

    async fn exchange(&self) -> Result<f64, TimeSyncError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(&self.server).await?;

        let mut request = [0u8; NTP_PACKET_LEN];
        request[0] = SNTP_CLIENT_HEADER;
        let originate = unix_now();
        socket.send(&request).await?;

        let mut response = [0u8; NTP_PACKET_LEN];
        let len = socket.recv(&mut response).await?;
        let destination = unix_now();

        let (receive, transmit) = parse_response(&response[..len])?;
        Ok(clock_offset(originate, receive, transmit, destination))
    }
}

#[async_trait]
impl TimeSource for SntpTimeSource {
    async fn offset(&self) -> Result<f64, TimeSyncError> {
        let offset = timeout(QUERY_TIMEOUT, self.exchange())
            .await
            .map_err(|_| TimeSyncError::Timeout)??;
        debug!("{} reports clock offset {:.3} s", self.server, offset);
        Ok(offset)
    }
}

/// Receive and transmit timestamps (unix seconds) of a server reply
fn parse_response(response: &[u8]) -> Result<(f64, f64), TimeSyncError> {
    if response.len() < NTP_PACKET_LEN {
        return Err(TimeSyncError::InvalidResponse(format!(
            "{} bytes instead of {}",
            response.len(),
            NTP_PACKET_LEN
        )));
    }
    let mode = response[0] & 0b111;
    if mode != MODE_SERVER {
        return Err(TimeSyncError::InvalidResponse(format!(
            "mode {} instead of {}",
            mode, MODE_SERVER
        )));
    }
    let stratum = response[1];
    if stratum == 0 {
        return Err(TimeSyncError::InvalidResponse("kiss-of-death".into()));
    }

    let receive = ntp_timestamp(&response[32..40]);
    let transmit = ntp_timestamp(&response[40..48]);
    if transmit == 0.0 {
        return Err(TimeSyncError::InvalidResponse("empty transmit time".into()));
    }
    Ok((receive - NTP_UNIX_EPOCH_DELTA, transmit - NTP_UNIX_EPOCH_DELTA))
}

fn ntp_timestamp(bytes: &[u8]) -> f64 {
    let seconds = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let fraction = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    f64::from(seconds) + f64::from(fraction) / 4_294_967_296.0
}

fn clock_offset(originate: f64, receive: f64, transmit: f64, destination: f64) -> f64 {
    ((receive - originate) + (transmit - destination)) / 2.0
}
