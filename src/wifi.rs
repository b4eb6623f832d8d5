//! WiFi station management
//!
//! The connection task owns the radio controller and keeps the station
//! associated, rotating through the configured access points whenever a
//! connect attempt fails.

use embassy_net::{Config as NetConfig, Ipv4Address, Runner, Stack, StackResources};
use embassy_time::{Duration, Timer};
use esp_radio::wifi::{
    ClientConfig, ModeConfig, WifiController, WifiDevice, WifiEvent, WifiStaState,
};
use heapless::Vec;
use static_cell::StaticCell;

use crate::config::{AccessPoint, Config, MAX_ACCESS_POINTS};

const RECONNECT_DELAY_MS: u64 = 5_000;
const LINK_POLL_MS: u64 = 500;

/// Cycles through configured access points, wrapping after the last one.
#[derive(Debug, Clone)]
pub struct ApRotation {
    access_points: Vec<AccessPoint, MAX_ACCESS_POINTS>,
    index: usize,
}

impl ApRotation {
    /// Access points left unset at build time are skipped.
    pub fn from_config(config: &Config) -> Self {
        let mut configured = Vec::new();
        for ap in config.access_points() {
            if configured.push(*ap).is_err() {
                break;
            }
        }
        Self {
            access_points: configured,
            index: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access_points.is_empty()
    }

    pub fn current(&self) -> Option<&AccessPoint> {
        self.access_points.get(self.index)
    }

    /// Move on to the next access point and return it
    pub fn advance(&mut self) -> Option<&AccessPoint> {
        if self.access_points.is_empty() {
            return None;
        }
        self.index = (self.index + 1) % self.access_points.len();
        self.current()
    }
}

/// Create the embassy-net stack on top of the station interface
pub fn init_stack(
    device: WifiDevice<'static>,
    seed: u64,
) -> (Stack<'static>, Runner<'static, WifiDevice<'static>>) {
    static NET_RESOURCES: StaticCell<StackResources<4>> = StaticCell::new();
    let resources = NET_RESOURCES.init(StackResources::new());

    embassy_net::new(device, NetConfig::dhcpv4(Default::default()), resources, seed)
}

/// Wait for the link and a DHCP lease
pub async fn wait_for_ip(stack: Stack<'_>) -> Ipv4Address {
    while !stack.is_link_up() {
        Timer::after(Duration::from_millis(LINK_POLL_MS)).await;
    }

    log::info!("[WIFI] MAC address {}", stack.hardware_address());
    log::info!("[WIFI] Waiting to get IP address...");
    loop {
        if let Some(config) = stack.config_v4() {
            log::info!("[WIFI] Got IP: {}", config.address);
            return config.address.address();
        }
        Timer::after(Duration::from_millis(LINK_POLL_MS)).await;
    }
}

#[embassy_executor::task]
pub async fn connection(mut controller: WifiController<'static>, mut rotation: ApRotation) {
    if rotation.is_empty() {
        log::error!("[WIFI] No access point configured, set WIFI_SSID at build time");
        return;
    }

    log::info!("[WIFI] Connecting to AP...");
    loop {
        if matches!(esp_radio::wifi::sta_state(), WifiStaState::Connected) {
            controller.wait_for_event(WifiEvent::StaDisconnected).await;
            log::warn!("[WIFI] Disconnected");
            Timer::after(Duration::from_millis(RECONNECT_DELAY_MS)).await;
        }

        let Some(ap) = rotation.current().copied() else {
            return;
        };

        let client_config = ModeConfig::Client(
            ClientConfig::default()
                .with_ssid(ap.ssid.into())
                .with_password(ap.password.into()),
        );
        if let Err(e) = controller.set_config(&client_config) {
            log::error!("[WIFI] Failed to apply config for {}: {:?}", ap.ssid, e);
            rotation.advance();
            continue;
        }

        if !matches!(controller.is_started(), Ok(true)) {
            if let Err(e) = controller.start_async().await {
                log::error!("[WIFI] Failed to start radio: {:?}", e);
                Timer::after(Duration::from_millis(RECONNECT_DELAY_MS)).await;
                continue;
            }
        }

        match controller.connect_async().await {
            Ok(()) => match controller.rssi() {
                Ok(rssi) => log::info!("[WIFI] Connected to {} (RSSI {} dBm)", ap.ssid, rssi),
                Err(_) => log::info!("[WIFI] Connected to {}", ap.ssid),
            },
            Err(e) => {
                log::warn!("[WIFI] could not connect to AP, retrying: {:?}", e);
                rotation.advance();
            }
        }
    }
}

#[embassy_executor::task]
pub async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}
