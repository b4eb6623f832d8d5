use core::fmt;

use embedded_graphics::{
    image::ImageRaw,
    mono_font::{
        MonoFont,
        ascii::{FONT_5X8, FONT_6X10, FONT_9X15, FONT_10X20},
    },
    pixelcolor::BinaryColor,
    prelude::*,
};
use embedded_hal_bus::spi::ExclusiveDevice;
use epd_waveshare::{
    color::Color,
    epd2in13_v2::{Display2in13, Epd2in13},
    prelude::{DisplayRotation as EpdRotation, WaveshareDisplay},
};
use esp_hal::{
    Blocking,
    delay::Delay,
    gpio::{Input, Output},
    i2c::master::I2c,
    spi::master::Spi,
};
use ssd1306::{
    I2CDisplayInterface, Ssd1306,
    mode::BufferedGraphicsMode,
    prelude::{DisplayConfig, DisplayRotation, DisplaySize128x64, I2CInterface},
};

use crate::hardware::{DisplayHardware, SSD1306Hardware};
use crate::traits::Panel;

const BUSY_TIMEOUT_MS: u32 = 10_000;

/// Panels at least this wide get the large layout
const WIDE_MIN_WIDTH: u32 = 200;

const BACKGROUND_WIDE: &[u8] = include_bytes!("../assets/background_250x122.raw");
const BACKGROUND_COMPACT: &[u8] = include_bytes!("../assets/background_128x64.raw");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayError {
    BusyTimeout,
    Init,
    Draw,
    Flush,
}

impl fmt::Display for DisplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayError::BusyTimeout => write!(f, "display BUSY timeout"),
            DisplayError::Init => write!(f, "failed to initialize display"),
            DisplayError::Draw => write!(f, "failed to draw frame"),
            DisplayError::Flush => write!(f, "failed to update display"),
        }
    }
}

/// Where each label goes and which fonts draw them.
///
/// Labels after the date sit at `base_y + spacing * n`.
#[derive(Clone, Copy)]
pub struct Layout {
    pub x: i32,
    pub time_y: i32,
    pub base_y: i32,
    pub spacing: i32,
    pub big_font: &'static MonoFont<'static>,
    pub font: &'static MonoFont<'static>,
    pub background: &'static [u8],
    pub background_width: u32,
}

impl Layout {
    /// 250x122 e-paper in landscape
    pub const WIDE: Layout = Layout {
        x: 10,
        time_y: 2,
        base_y: 28,
        spacing: 18,
        big_font: &FONT_10X20,
        font: &FONT_6X10,
        background: BACKGROUND_WIDE,
        background_width: 250,
    };

    /// 128x64 OLED
    pub const COMPACT: Layout = Layout {
        x: 2,
        time_y: 0,
        base_y: 16,
        spacing: 10,
        big_font: &FONT_9X15,
        font: &FONT_5X8,
        background: BACKGROUND_COMPACT,
        background_width: 128,
    };

    pub fn for_size(size: Size) -> Layout {
        if size.width >= WIDE_MIN_WIDTH {
            Layout::WIDE
        } else {
            Layout::COMPACT
        }
    }

    /// Top-left corner of the label in slot `n` (0 = date)
    pub fn label_origin(&self, n: i32) -> Point {
        Point::new(self.x, self.base_y + self.spacing * n)
    }

    pub fn time_origin(&self) -> Point {
        Point::new(self.x, self.time_y)
    }

    pub fn background(&self) -> ImageRaw<'static, BinaryColor> {
        ImageRaw::new(self.background, self.background_width)
    }
}

/// Wait for the e-Paper display BUSY pin to go LOW
fn wait_for_display_ready(hw: &DisplayHardware) -> Result<(), DisplayError> {
    let timeout_cycles = BUSY_TIMEOUT_MS / 10;

    for _ in 0..timeout_cycles {
        if !hw.busy.is_high() {
            return Ok(());
        }
        hw.delay.delay_millis(10);
    }

    Err(DisplayError::BusyTimeout)
}

type EpdSpi<'a> = ExclusiveDevice<Spi<'a, Blocking>, Output<'a>, Delay>;

/// Waveshare 2.13" e-Paper HAT in landscape.
///
/// A full refresh takes about two seconds, so this panel shows `HH:MM`.
pub struct EpaperPanel<'a> {
    spi: EpdSpi<'a>,
    epd: Epd2in13<EpdSpi<'a>, Input<'a>, Output<'a>, Output<'a>, Delay>,
    display: Display2in13,
    delay: Delay,
}

impl<'a> EpaperPanel<'a> {
    pub fn new(mut hw: DisplayHardware<'a>) -> Result<Self, DisplayError> {
        log::info!("[EPD] Initializing Waveshare 2.13\" e-Paper HAT");

        wait_for_display_ready(&hw)?;

        let epd = Epd2in13::new(&mut hw.spi, hw.busy, hw.dc, hw.rst, &mut hw.delay, None)
            .map_err(|_| DisplayError::Init)?;

        let mut display = Display2in13::default();
        display.set_rotation(EpdRotation::Rotate90);
        display
            .clear(Color::White)
            .map_err(|_| DisplayError::Draw)?;

        log::info!("[EPD] Driver initialized");

        Ok(Self {
            spi: hw.spi,
            epd,
            display,
            delay: hw.delay,
        })
    }
}

impl Panel for EpaperPanel<'_> {
    type Color = Color;
    type Canvas = Display2in13;

    fn canvas(&mut self) -> &mut Display2in13 {
        &mut self.display
    }

    fn flush(&mut self) -> Result<(), DisplayError> {
        self.epd
            .update_and_display_frame(&mut self.spi, self.display.buffer(), &mut self.delay)
            .map_err(|_| DisplayError::Flush)
    }

    fn show_seconds(&self) -> bool {
        false
    }
}

type OledDisplay<'a> = Ssd1306<
    I2CInterface<I2c<'a, Blocking>>,
    DisplaySize128x64,
    BufferedGraphicsMode<DisplaySize128x64>,
>;

/// SSD1306 128x64 OLED, fast enough to tick every second
pub struct OledPanel<'a> {
    display: OledDisplay<'a>,
}

impl<'a> OledPanel<'a> {
    pub fn new(hw: SSD1306Hardware<'a>) -> Result<Self, DisplayError> {
        log::info!("[OLED] Initializing SSD1306");

        let interface = I2CDisplayInterface::new(hw.i2c);
        let mut display = Ssd1306::new(interface, DisplaySize128x64, DisplayRotation::Rotate0)
            .into_buffered_graphics_mode();
        display.init().map_err(|_| DisplayError::Init)?;
        display.clear_buffer();

        Ok(Self { display })
    }
}

impl<'a> Panel for OledPanel<'a> {
    type Color = BinaryColor;
    type Canvas = OledDisplay<'a>;

    fn canvas(&mut self) -> &mut OledDisplay<'a> {
        &mut self.display
    }

    fn flush(&mut self) -> Result<(), DisplayError> {
        self.display.flush().map_err(|_| DisplayError::Flush)
    }

    fn show_seconds(&self) -> bool {
        true
    }
}
