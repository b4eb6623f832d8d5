//! SNTP client used to set the RTC

use core::fmt;

use embassy_net::dns::DnsQueryType;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpEndpoint, Stack};
use embassy_time::{Duration, Instant, Timer};

use crate::traits::WallClock;

const NTP_PORT: u16 = 123;
const NTP_PACKET_SIZE: usize = 48;
const NTP_TIMEOUT_SECS: u64 = 5;
/// Seconds between 1900-01-01 and 1970-01-01
const NTP_EPOCH_OFFSET: u64 = 2_208_988_800;
/// Length of one NTP era (2^32 s); era 1 starts 2036-02-07
const NTP_ERA_SECS: u64 = 1 << 32;

const MODE_SERVER: u8 = 4;
const MODE_BROADCAST: u8 = 5;
const MAX_STRATUM: u8 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NtpError {
    DnsResolveFailed,
    BindFailed,
    SendFailed,
    ReceiveFailed,
    Timeout,
    InvalidResponse,
    InvalidStratum(u8),
    InvalidTimestamp,
}

impl fmt::Display for NtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NtpError::DnsResolveFailed => write!(f, "could not resolve NTP server"),
            NtpError::BindFailed => write!(f, "could not bind UDP socket"),
            NtpError::SendFailed => write!(f, "could not send NTP request"),
            NtpError::ReceiveFailed => write!(f, "could not receive NTP reply"),
            NtpError::Timeout => write!(f, "NTP reply timed out"),
            NtpError::InvalidResponse => write!(f, "malformed NTP reply"),
            NtpError::InvalidStratum(s) => write!(f, "NTP server stratum {} not usable", s),
            NtpError::InvalidTimestamp => write!(f, "NTP timestamp unset or before 1970"),
        }
    }
}

/// Build an SNTP v4 client request
pub fn request_packet() -> [u8; NTP_PACKET_SIZE] {
    let mut packet = [0u8; NTP_PACKET_SIZE];
    // LI = 0, VN = 4, Mode = 3 (client)
    packet[0] = 0b00_100_011;
    packet
}

/// Server transmit time, in Unix seconds plus milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtpTime {
    pub unix_secs: u64,
    pub millis: u32,
}

impl NtpTime {
    /// Whole seconds after adding `delay_ms`, rounded to the nearest
    pub fn rounded_secs(&self, delay_ms: u64) -> u64 {
        self.unix_secs + (self.millis as u64 + delay_ms + 500) / 1000
    }
}

/// Extract the transmit timestamp from a server reply.
pub fn parse_response(response: &[u8]) -> Result<NtpTime, NtpError> {
    if response.len() < NTP_PACKET_SIZE {
        return Err(NtpError::InvalidResponse);
    }

    let mode = response[0] & 0x07;
    if mode != MODE_SERVER && mode != MODE_BROADCAST {
        return Err(NtpError::InvalidResponse);
    }

    // Stratum 0 is a kiss-of-death packet
    let stratum = response[1];
    if stratum == 0 || stratum > MAX_STRATUM {
        return Err(NtpError::InvalidStratum(stratum));
    }

    let tx_secs = u32::from_be_bytes([response[40], response[41], response[42], response[43]]);
    let tx_frac = u32::from_be_bytes([response[44], response[45], response[46], response[47]]);
    if tx_secs == 0 && tx_frac == 0 {
        return Err(NtpError::InvalidTimestamp);
    }

    // MSB clear means the counter has wrapped into era 1
    let mut ntp_secs = tx_secs as u64;
    if tx_secs & 0x8000_0000 == 0 {
        ntp_secs += NTP_ERA_SECS;
    }

    let unix_secs = ntp_secs
        .checked_sub(NTP_EPOCH_OFFSET)
        .filter(|secs| *secs > 0)
        .ok_or(NtpError::InvalidTimestamp)?;

    Ok(NtpTime {
        unix_secs,
        millis: ((tx_frac as u64 * 1000) >> 32) as u32,
    })
}

pub struct NtpClient {
    server: &'static str,
}

impl NtpClient {
    pub fn new(server: &'static str) -> Self {
        Self { server }
    }

    /// Query the server once; returns UTC Unix seconds
    pub async fn sync(&self, stack: Stack<'_>) -> Result<u64, NtpError> {
        let server_ip = stack
            .dns_query(self.server, DnsQueryType::A)
            .await
            .map_err(|_| NtpError::DnsResolveFailed)?
            .first()
            .copied()
            .ok_or(NtpError::DnsResolveFailed)?;
        let endpoint = IpEndpoint::new(server_ip, NTP_PORT);
        log::debug!("[NTP] Resolved {} to {}", self.server, server_ip);

        let mut rx_meta = [PacketMetadata::EMPTY; 2];
        let mut rx_buffer = [0u8; 64];
        let mut tx_meta = [PacketMetadata::EMPTY; 2];
        let mut tx_buffer = [0u8; 64];
        let mut socket = UdpSocket::new(
            stack,
            &mut rx_meta,
            &mut rx_buffer,
            &mut tx_meta,
            &mut tx_buffer,
        );
        socket.bind(0).map_err(|_| NtpError::BindFailed)?;

        let sent_at = Instant::now();
        socket
            .send_to(&request_packet(), endpoint)
            .await
            .map_err(|_| NtpError::SendFailed)?;

        let mut response = [0u8; NTP_PACKET_SIZE];
        let (len, _from) = embassy_time::with_timeout(
            Duration::from_secs(NTP_TIMEOUT_SECS),
            socket.recv_from(&mut response),
        )
        .await
        .map_err(|_| NtpError::Timeout)?
        .map_err(|_| NtpError::ReceiveFailed)?;

        let time = parse_response(&response[..len])?;

        // Half the round trip has passed since the server stamped the reply
        let rtt_ms = sent_at.elapsed().as_millis();
        let corrected = time.rounded_secs(rtt_ms / 2);
        log::info!("[NTP] {} UTC (RTT {}ms)", corrected, rtt_ms);

        Ok(corrected)
    }

    /// Keep asking until the server gives a usable time, then set `clock`.
    pub async fn sync_until_valid<C: WallClock>(
        &self,
        stack: Stack<'_>,
        clock: &mut C,
        retry: Duration,
    ) {
        loop {
            match self.sync(stack).await {
                Ok(unix_secs) => {
                    clock.set_unix(unix_secs);
                    if clock.is_valid() {
                        return;
                    }
                }
                Err(e) => log::warn!("[NTP] {}", e),
            }
            log::info!("[NTP] time not valid...");
            Timer::after(retry).await;
        }
    }
}
