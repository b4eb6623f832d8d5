//! OpenWeather client and the hourly poll task

use core::fmt::{self, Write};

use embassy_net::Stack;
use embassy_net::dns::DnsSocket;
use embassy_net::tcp::client::{TcpClient, TcpClientState};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer, with_timeout};
use heapless::String;
use reqwless::client::HttpClient;
use reqwless::request::Method;
use serde::Deserialize;
use serde::de::{self, Deserializer, IgnoredAny, SeqAccess, Visitor};

use crate::clock::RtcClock;
use crate::config::Config;
use crate::model::{DESCRIPTION_CAPACITY, WeatherReport};
use crate::ntp::NtpClient;
use crate::traits::WallClock;

const MAX_RESPONSE_SIZE: usize = 4096;
/// Scratch space for strings that carry JSON escapes
const UNESCAPE_BUFFER_SIZE: usize = 128;
/// Bounds the whole exchange, including a peer that stalls mid-body
const FETCH_TIMEOUT_SECS: u64 = 30;
const SOCKET_TIMEOUT_SECS: u64 = 10;

pub type TcpState = TcpClientState<1, 1024, 1024>;

/// Latest successful report, consumed by the render loop
pub static LATEST_REPORT: Signal<CriticalSectionRawMutex, WeatherReport> = Signal::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchError {
    UrlTooLong,
    RequestFailed,
    InvalidStatus,
    ReadFailed,
    ParseFailed,
    MissingCondition,
    Timeout,
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::UrlTooLong => write!(f, "request URL too long"),
            FetchError::RequestFailed => write!(f, "HTTP request failed"),
            FetchError::InvalidStatus => write!(f, "server returned an error status"),
            FetchError::ReadFailed => write!(f, "failed to read response body"),
            FetchError::ParseFailed => write!(f, "response is not weather JSON"),
            FetchError::MissingCondition => write!(f, "response has no weather condition"),
            FetchError::Timeout => write!(f, "weather request timed out"),
        }
    }
}

#[derive(Deserialize)]
struct CurrentWeather {
    main: MainReadings,
    #[serde(deserialize_with = "first_condition")]
    weather: Option<Condition>,
}

#[derive(Deserialize)]
struct MainReadings {
    temp: f32,
    pressure: f32,
    humidity: f32,
}

#[derive(Deserialize)]
struct Condition {
    description: Description,
}

/// Description text, cut down to what a label can hold
struct Description(String<DESCRIPTION_CAPACITY>);

impl<'de> Deserialize<'de> for Description {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(DescriptionVisitor)
    }
}

struct DescriptionVisitor;

impl<'de> Visitor<'de> for DescriptionVisitor {
    type Value = Description;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a weather description")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Description, E> {
        let mut text = String::new();
        for c in value.chars() {
            if text.push(c).is_err() {
                break;
            }
        }
        Ok(Description(text))
    }
}

/// Only the first condition is shown; the rest are skipped however many
/// the server sends.
fn first_condition<'de, D>(deserializer: D) -> Result<Option<Condition>, D::Error>
where
    D: Deserializer<'de>,
{
    struct FirstCondition;

    impl<'de> Visitor<'de> for FirstCondition {
        type Value = Option<Condition>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a list of weather conditions")
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let first = seq.next_element::<Condition>()?;
            while seq.next_element::<IgnoredAny>()?.is_some() {}
            Ok(first)
        }
    }

    deserializer.deserialize_seq(FirstCondition)
}

/// Current-weather endpoint for the configured location
pub fn weather_url(config: &Config) -> Result<String<256>, FetchError> {
    let mut url = String::new();
    write!(
        url,
        "http://{}/data/2.5/weather?q={}&units={}&appid={}",
        config.weather_host, config.location, config.units, config.open_weather_key
    )
    .map_err(|_| FetchError::UrlTooLong)?;
    Ok(url)
}

/// Pick temperature, pressure, humidity and the first description out of
/// an OpenWeather response. Other fields are ignored.
pub fn parse_report(body: &[u8]) -> Result<WeatherReport, FetchError> {
    let mut unescape = [0u8; UNESCAPE_BUFFER_SIZE];
    let (weather, _) = serde_json_core::from_slice_escaped::<CurrentWeather>(body, &mut unescape)
        .map_err(|_| FetchError::ParseFailed)?;

    let condition = weather.weather.ok_or(FetchError::MissingCondition)?;

    Ok(WeatherReport {
        temperature: weather.main.temp,
        pressure: weather.main.pressure as u16,
        humidity: weather.main.humidity as u8,
        description: condition.description.0,
    })
}

pub struct WeatherClient<'a> {
    url: String<256>,
    tcp_state: &'a TcpState,
}

impl<'a> WeatherClient<'a> {
    pub fn new(config: &Config, tcp_state: &'a TcpState) -> Result<Self, FetchError> {
        Ok(Self {
            url: weather_url(config)?,
            tcp_state,
        })
    }

    pub async fn fetch(&self, stack: Stack<'_>) -> Result<WeatherReport, FetchError> {
        log::info!("[WEATHER] updating weather...");

        let mut rx_buf = [0u8; MAX_RESPONSE_SIZE];
        let body = with_timeout(
            Duration::from_secs(FETCH_TIMEOUT_SECS),
            self.download(stack, &mut rx_buf),
        )
        .await
        .map_err(|_| FetchError::Timeout)??;

        log::debug!("[WEATHER] Received {} bytes", body.len());

        let report = parse_report(body)?;
        log::info!(
            "[WEATHER] {}C, {} hPa, {}%, {}",
            report.temperature,
            report.pressure,
            report.humidity,
            report.description.as_str()
        );
        Ok(report)
    }

    /// GET the endpoint and read the whole body into `rx_buf`
    async fn download<'b>(
        &self,
        stack: Stack<'_>,
        rx_buf: &'b mut [u8],
    ) -> Result<&'b [u8], FetchError> {
        let mut tcp_client = TcpClient::new(stack, self.tcp_state);
        tcp_client.set_timeout(Some(Duration::from_secs(SOCKET_TIMEOUT_SECS)));
        let dns = DnsSocket::new(stack);
        let mut client = HttpClient::new(&tcp_client, &dns);

        let mut request = client
            .request(Method::GET, self.url.as_str())
            .await
            .map_err(|_| FetchError::RequestFailed)?;

        let response = request
            .send(rx_buf)
            .await
            .map_err(|_| FetchError::RequestFailed)?;

        if !response.status.is_successful() {
            log::error!("[WEATHER] Server returned status: {:?}", response.status);
            return Err(FetchError::InvalidStatus);
        }

        response
            .body()
            .read_to_end()
            .await
            .map_err(|_| FetchError::ReadFailed)
    }
}

/// When the next weather poll is due.
///
/// The first poll is due immediately. After a success the next one waits
/// the full interval; after a failure only the retry interval.
#[derive(Debug, Clone, Copy)]
pub struct PollSchedule {
    interval_secs: u64,
    retry_secs: u64,
    next_due_secs: u64,
}

impl PollSchedule {
    pub const fn new(interval_secs: u64, retry_secs: u64) -> Self {
        Self {
            interval_secs,
            retry_secs,
            next_due_secs: 0,
        }
    }

    pub fn due(&self, now_secs: u64) -> bool {
        now_secs >= self.next_due_secs
    }

    pub fn succeeded(&mut self, now_secs: u64) {
        self.next_due_secs = now_secs + self.interval_secs;
    }

    pub fn failed(&mut self, now_secs: u64) {
        self.next_due_secs = now_secs + self.retry_secs;
    }

    /// Seconds left until the next poll
    pub fn remaining(&self, now_secs: u64) -> u64 {
        self.next_due_secs.saturating_sub(now_secs)
    }
}

/// Poll the weather API forever and publish each successful report.
///
/// Network time is refreshed alongside every successful poll so the RTC
/// does not drift over long uptimes.
#[embassy_executor::task]
pub async fn weather_task(
    stack: Stack<'static>,
    config: &'static Config,
    tcp_state: &'static TcpState,
) {
    let client = match WeatherClient::new(config, tcp_state) {
        Ok(client) => client,
        Err(e) => {
            log::error!("[WEATHER] {}", e);
            return;
        }
    };
    let ntp = NtpClient::new(config.ntp_server);
    let mut clock = RtcClock::shared(config.utc_offset_secs);
    let mut schedule = PollSchedule::new(
        config.weather_poll_interval_secs,
        config.weather_retry_interval_secs,
    );

    loop {
        let now = Instant::now().as_secs();
        if schedule.due(now) {
            match client.fetch(stack).await {
                Ok(report) => {
                    LATEST_REPORT.signal(report);
                    schedule.succeeded(Instant::now().as_secs());

                    match ntp.sync(stack).await {
                        Ok(unix_secs) => clock.set_unix(unix_secs),
                        Err(e) => log::warn!("[NTP] Resync failed, keeping RTC: {}", e),
                    }
                }
                Err(e) => {
                    log::error!(
                        "[WEATHER] Fetch failed: {}, retrying in {}s",
                        e,
                        config.weather_retry_interval_secs
                    );
                    schedule.failed(Instant::now().as_secs());
                }
            }
        }

        let wait = schedule.remaining(Instant::now().as_secs()).max(1);
        Timer::after(Duration::from_secs(wait)).await;
    }
}
