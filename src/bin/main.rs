#![no_std]
#![no_main]

use embassy_executor::Spawner;
use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Instant, Timer};
use esp_backtrace as _;
use esp_hal::{clock::CpuClock, rng::Rng, rtc_cntl::Rtc, timer::timg::TimerGroup};
use static_cell::StaticCell;

use weather_clock::{
    clock::RtcClock,
    config::CONFIG,
    display::{EpaperPanel, Layout, OledPanel},
    hardware::{self, DisplayType},
    logic::{Dashboard, update_panel},
    ntp::NtpClient,
    traits::{Panel, WallClock},
    weather::{LATEST_REPORT, TcpState, weather_task},
    wifi::{self, ApRotation},
};

const HEAP_SIZE: usize = 72 * 1024;
const TICK: Duration = Duration::from_secs(1);

// Choose your display type here
// DisplayType::EPaper - Uses SPI on GPIO10(CS), GPIO11(MOSI), GPIO12(SCK), GPIO13(DC), GPIO14(RST), GPIO15(BUSY)
// DisplayType::SSD1306 - Uses I2C on GPIO2(SDA), GPIO1(SCL), address 0x3C
const DISPLAY_TYPE: DisplayType = DisplayType::SSD1306; // or DisplayType::EPaper

static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
static TCP_STATE: StaticCell<TcpState> = StaticCell::new();

esp_bootloader_esp_idf::esp_app_desc!();

/// Park the main task after an unrecoverable startup error
async fn halt() -> ! {
    loop {
        Timer::after(Duration::from_secs(1)).await;
    }
}

/// Tick the clock once a second and take in weather reports as they come.
async fn run_dashboard<P: Panel>(mut panel: P, clock: RtcClock) -> ! {
    let layout = Layout::for_size(panel.size());
    let mut dashboard = Dashboard::new();
    let mut next_tick = Instant::now();

    loop {
        if let Some(now) = clock.now() {
            dashboard.set_time(&now, panel.show_seconds());
        }

        if let Err(e) = update_panel(&mut panel, &mut dashboard, &layout) {
            log::error!("[DISPLAY] {}", e);
        }

        next_tick += TICK;
        // A slow flush can overrun the tick; skip ahead instead of catching up
        if next_tick < Instant::now() {
            next_tick = Instant::now() + TICK;
        }

        loop {
            match select(Timer::at(next_tick), LATEST_REPORT.wait()).await {
                Either::First(()) => break,
                Either::Second(report) => {
                    dashboard.set_weather(&report);
                    if let Err(e) = update_panel(&mut panel, &mut dashboard, &layout) {
                        log::error!("[DISPLAY] {}", e);
                    }
                }
            }
        }
    }
}

#[esp_rtos::main]
async fn main(spawner: Spawner) {
    esp_println::logger::init_logger_from_env();
    let peripherals = esp_hal::init(esp_hal::Config::default().with_cpu_clock(CpuClock::max()));

    esp_alloc::heap_allocator!(size: HEAP_SIZE);

    esp_println::println!("=== Weather Clock ===");

    // Initialize RTOS timer for embassy
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    // Bring up the radio and the network stack
    let radio = match esp_radio::init() {
        Ok(radio) => RADIO.init(radio),
        Err(e) => {
            esp_println::println!("[ERROR] Radio init failed: {:?}", e);
            halt().await
        }
    };
    let (controller, interfaces) =
        match esp_radio::wifi::new(radio, peripherals.WIFI, Default::default()) {
            Ok(wifi) => wifi,
            Err(e) => {
                esp_println::println!("[ERROR] WiFi init failed: {:?}", e);
                halt().await
            }
        };

    let rng = Rng::new();
    let seed = ((rng.random() as u64) << 32) | rng.random() as u64;
    let (stack, runner) = wifi::init_stack(interfaces.sta, seed);

    if let Err(e) = spawner.spawn(wifi::connection(
        controller,
        ApRotation::from_config(&CONFIG),
    )) {
        esp_println::println!("[ERROR] Failed to spawn task: {:?}", e);
        halt().await
    }
    if let Err(e) = spawner.spawn(wifi::net_task(runner)) {
        esp_println::println!("[ERROR] Failed to spawn task: {:?}", e);
        halt().await
    }

    wifi::wait_for_ip(stack).await;

    // Network time into the RTC
    let mut clock = RtcClock::install(Rtc::new(peripherals.LPWR), CONFIG.utc_offset_secs);
    NtpClient::new(CONFIG.ntp_server)
        .sync_until_valid(
            stack,
            &mut clock,
            Duration::from_secs(CONFIG.ntp_retry_interval_secs),
        )
        .await;
    if let Some(now) = clock.now() {
        esp_println::println!("{}", now.format_stamp());
    }

    let tcp_state = TCP_STATE.init(TcpState::new());
    if let Err(e) = spawner.spawn(weather_task(stack, &CONFIG, tcp_state)) {
        esp_println::println!("[ERROR] Failed to spawn task: {:?}", e);
        halt().await
    }

    // Initialize display based on chosen type
    match DISPLAY_TYPE {
        DisplayType::EPaper => {
            let panel = hardware::DisplayHardware::new(
                peripherals.SPI2,
                peripherals.GPIO10,
                peripherals.GPIO11,
                peripherals.GPIO12,
                peripherals.GPIO13,
                peripherals.GPIO14,
                peripherals.GPIO15,
            )
            .map_err(|e| esp_println::println!("[ERROR] e-Paper bus: {}", e))
            .and_then(|hw| {
                EpaperPanel::new(hw)
                    .map_err(|e| esp_println::println!("[ERROR] e-Paper init: {}", e))
            });
            match panel {
                Ok(panel) => run_dashboard(panel, clock).await,
                Err(()) => halt().await,
            }
        }
        DisplayType::SSD1306 => {
            let panel = hardware::SSD1306Hardware::new(
                peripherals.I2C1,
                peripherals.GPIO2,
                peripherals.GPIO1,
            )
            .map_err(|e| esp_println::println!("[ERROR] OLED bus: {}", e))
            .and_then(|hw| {
                OledPanel::new(hw).map_err(|e| esp_println::println!("[ERROR] OLED init: {}", e))
            });
            match panel {
                Ok(panel) => run_dashboard(panel, clock).await,
                Err(()) => halt().await,
            }
        }
    }
}
