//! Build-time configuration.
//!
//! Credentials are read from the build environment so they never end up in
//! the repository. Export them before flashing, e.g.
//!
//! ```text
//! WIFI_SSID=home WIFI_PASSWORD=... OPEN_WEATHER_KEY=... cargo run --release
//! ```

/// Maximum number of access points tried in turn.
pub const MAX_ACCESS_POINTS: usize = 2;

const DEFAULT_LOCATION: &str = "london,gb";
const DEFAULT_UNITS: &str = "metric";
const DEFAULT_NTP_SERVER: &str = "pool.ntp.org";
const WEATHER_HOST: &str = "api.openweathermap.org";

const WEATHER_POLL_INTERVAL_SECS: u64 = 60 * 60;
const WEATHER_RETRY_INTERVAL_SECS: u64 = 60;
const NTP_RETRY_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPoint {
    pub ssid: &'static str,
    pub password: &'static str,
}

impl AccessPoint {
    pub const fn new(ssid: &'static str, password: &'static str) -> Self {
        Self { ssid, password }
    }

    /// An access point without an SSID was left unset at build time.
    pub const fn is_configured(&self) -> bool {
        !self.ssid.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub access_points: [AccessPoint; MAX_ACCESS_POINTS],
    pub open_weather_key: &'static str,
    pub location: &'static str,
    pub units: &'static str,
    pub weather_host: &'static str,
    pub ntp_server: &'static str,
    /// Added to UTC before the clock is shown.
    pub utc_offset_secs: i32,
    pub weather_poll_interval_secs: u64,
    pub weather_retry_interval_secs: u64,
    pub ntp_retry_interval_secs: u64,
}

impl Config {
    pub const fn from_env() -> Self {
        Self {
            access_points: [
                AccessPoint::new(
                    or_default(option_env!("WIFI_SSID"), ""),
                    or_default(option_env!("WIFI_PASSWORD"), ""),
                ),
                AccessPoint::new(
                    or_default(option_env!("WIFI_SSID2"), ""),
                    or_default(option_env!("WIFI_PASSWORD2"), ""),
                ),
            ],
            open_weather_key: or_default(option_env!("OPEN_WEATHER_KEY"), ""),
            location: or_default(option_env!("WEATHER_LOCATION"), DEFAULT_LOCATION),
            units: or_default(option_env!("WEATHER_UNITS"), DEFAULT_UNITS),
            weather_host: WEATHER_HOST,
            ntp_server: or_default(option_env!("NTP_SERVER"), DEFAULT_NTP_SERVER),
            utc_offset_secs: match option_env!("UTC_OFFSET_SECS") {
                Some(raw) => match parse_offset(raw) {
                    Some(offset) => offset,
                    None => panic!("UTC_OFFSET_SECS must be a signed integer"),
                },
                None => 0,
            },
            weather_poll_interval_secs: WEATHER_POLL_INTERVAL_SECS,
            weather_retry_interval_secs: WEATHER_RETRY_INTERVAL_SECS,
            ntp_retry_interval_secs: NTP_RETRY_INTERVAL_SECS,
        }
    }

    /// Access points that were actually configured, in priority order.
    pub fn access_points(&self) -> impl Iterator<Item = &AccessPoint> {
        self.access_points.iter().filter(|ap| ap.is_configured())
    }
}

const fn or_default(value: Option<&'static str>, default: &'static str) -> &'static str {
    match value {
        Some(v) => v,
        None => default,
    }
}

/// Parse a signed decimal offset such as `3600` or `-18000`.
pub const fn parse_offset(raw: &str) -> Option<i32> {
    let bytes = raw.as_bytes();
    if bytes.is_empty() {
        return None;
    }

    let (negative, start) = match bytes[0] {
        b'-' => (true, 1),
        b'+' => (false, 1),
        _ => (false, 0),
    };
    if start == bytes.len() {
        return None;
    }

    let mut value: i32 = 0;
    let mut i = start;
    while i < bytes.len() {
        let b = bytes[i];
        if !b.is_ascii_digit() {
            return None;
        }
        value = match value.checked_mul(10) {
            Some(v) => v,
            None => return None,
        };
        value = match value.checked_add((b - b'0') as i32) {
            Some(v) => v,
            None => return None,
        };
        i += 1;
    }

    Some(if negative { -value } else { value })
}

/// Configuration baked in at build time.
pub static CONFIG: Config = Config::from_env();
