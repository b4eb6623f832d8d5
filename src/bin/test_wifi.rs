#![no_std]
#![no_main]

use embassy_executor::Spawner;
use embassy_net::dns::DnsQueryType;
use embassy_net::{EthernetAddress, HardwareAddress};
use embassy_time::{Duration, Timer, with_timeout};
use esp_backtrace as _;
use esp_hal::{clock::CpuClock, rng::Rng, rtc_cntl::Rtc, timer::timg::TimerGroup};
use static_cell::StaticCell;

use weather_clock::{
    clock::RtcClock,
    config::{CONFIG, Config},
    ntp::NtpClient,
    traits::WallClock,
    weather::{FetchError, TcpState, WeatherClient},
    wifi::{self, ApRotation},
};

mod harness;

use harness::TestResults;

esp_bootloader_esp_idf::esp_app_desc!();

const HEAP_SIZE: usize = 72 * 1024;
const LINK_TIMEOUT_SECS: u64 = 60;
/// Longer than the fetch's own timeout
const STALL_BOUND_SECS: u64 = 45;
/// 2024-01-01 00:00:00 UTC
const EARLIEST_PLAUSIBLE: u64 = 1_704_067_200;

static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
static TCP_STATE: StaticCell<TcpState> = StaticCell::new();

async fn finish(results: &TestResults) -> ! {
    results.print_summary();
    esp_println::println!("\nTest run complete. Looping...");
    loop {
        Timer::after(Duration::from_secs(1)).await;
    }
}

#[esp_rtos::main]
async fn main(spawner: Spawner) {
    esp_println::logger::init_logger_from_env();
    let peripherals = esp_hal::init(esp_hal::Config::default().with_cpu_clock(CpuClock::max()));
    esp_alloc::heap_allocator!(size: HEAP_SIZE);

    esp_println::println!("\n==========================================");
    esp_println::println!("=== WiFi / Network Test Runner ===");
    esp_println::println!("==========================================");

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let mut results = TestResults::new();

    esp_println::println!("\n[TEST] Configuration");
    let rotation = ApRotation::from_config(&CONFIG);
    results.assert(!rotation.is_empty(), "at least one access point configured");
    results.assert(!CONFIG.open_weather_key.is_empty(), "weather API key configured");
    if rotation.is_empty() {
        finish(&results).await
    }

    esp_println::println!("\n[TEST] Radio");
    let radio = match esp_radio::init() {
        Ok(radio) => RADIO.init(radio),
        Err(e) => {
            esp_println::println!("    radio init failed: {:?}", e);
            results.assert(false, "radio init");
            finish(&results).await
        }
    };
    let (controller, interfaces) =
        match esp_radio::wifi::new(radio, peripherals.WIFI, Default::default()) {
            Ok(wifi) => wifi,
            Err(e) => {
                esp_println::println!("    wifi init failed: {:?}", e);
                results.assert(false, "wifi init");
                finish(&results).await
            }
        };
    results.assert(true, "radio and wifi init");

    let rng = Rng::new();
    let seed = ((rng.random() as u64) << 32) | rng.random() as u64;
    let (stack, runner) = wifi::init_stack(interfaces.sta, seed);

    let spawned = spawner.spawn(wifi::connection(controller, rotation)).is_ok()
        && spawner.spawn(wifi::net_task(runner)).is_ok();
    results.assert(spawned, "network tasks spawned");

    esp_println::println!("\n[TEST] Association and DHCP");
    match with_timeout(
        Duration::from_secs(LINK_TIMEOUT_SECS),
        wifi::wait_for_ip(stack),
    )
    .await
    {
        Ok(address) => {
            esp_println::println!("    address {}", address);
            results.assert(!address.is_unspecified(), "DHCP lease obtained");
            results.assert(
                matches!(
                    stack.hardware_address(),
                    HardwareAddress::Ethernet(mac) if mac.is_unicast() && mac != EthernetAddress([0; 6])
                ),
                "station MAC address assigned",
            );
        }
        Err(_) => {
            results.assert(false, "link up within timeout");
            finish(&results).await
        }
    }

    esp_println::println!("\n[TEST] DNS");
    match stack.dns_query(CONFIG.weather_host, DnsQueryType::A).await {
        Ok(addrs) => results.assert(!addrs.is_empty(), "weather host resolves"),
        Err(e) => {
            esp_println::println!("    dns failed: {:?}", e);
            results.assert(false, "weather host resolves");
        }
    }

    esp_println::println!("\n[TEST] NTP");
    let ntp = NtpClient::new(CONFIG.ntp_server);
    match ntp.sync(stack).await {
        Ok(secs) => {
            esp_println::println!("    NTP time {}", secs);
            results.assert(secs >= EARLIEST_PLAUSIBLE, "NTP time plausible");

            let mut clock = RtcClock::install(Rtc::new(peripherals.LPWR), CONFIG.utc_offset_secs);
            clock.set_unix(secs);
            results.assert(clock.is_valid(), "RTC set from NTP");
            if let Some(now) = clock.now() {
                esp_println::println!("    {}", now.format_stamp());
            }
        }
        Err(e) => {
            esp_println::println!("    NTP failed: {}", e);
            results.assert(false, "NTP sync");
        }
    }

    esp_println::println!("\n[TEST] Weather");
    let tcp_state = TCP_STATE.init(TcpState::new());
    match WeatherClient::new(&CONFIG, tcp_state) {
        Ok(client) => match client.fetch(stack).await {
            Ok(report) => {
                results.assert(
                    report.temperature > -60.0 && report.temperature < 60.0,
                    "temperature in valid range",
                );
                results.assert(
                    report.pressure > 850 && report.pressure < 1100,
                    "pressure in valid range",
                );
                results.assert(report.humidity <= 100, "humidity in valid range");
                results.assert(!report.description.is_empty(), "description present");
            }
            Err(e) => {
                esp_println::println!("    fetch failed: {}", e);
                results.assert(false, "weather fetch");
            }
        },
        Err(e) => {
            esp_println::println!("    {}", e);
            results.assert(false, "weather URL fits");
        }
    }

    esp_println::println!("\n[TEST] Stalled weather host");
    // Non-routable, so the connection never completes
    let stalled = Config {
        weather_host: "10.255.255.1",
        ..CONFIG
    };
    match WeatherClient::new(&stalled, tcp_state) {
        Ok(client) => {
            let outcome = with_timeout(
                Duration::from_secs(STALL_BOUND_SECS),
                client.fetch(stack),
            )
            .await;
            results.assert(outcome.is_ok(), "fetch gives up on its own");
            results.assert(
                matches!(
                    outcome,
                    Ok(Err(FetchError::Timeout)) | Ok(Err(FetchError::RequestFailed))
                ),
                "stalled fetch reports timeout or request failure",
            );
        }
        Err(e) => {
            esp_println::println!("    {}", e);
            results.assert(false, "stalled URL fits");
        }
    }

    finish(&results).await
}
