use core::fmt;

use embedded_hal_bus::spi::ExclusiveDevice;
use esp_hal::gpio::AnyPin;
use esp_hal::{
    delay::Delay,
    gpio::{Input, InputConfig, Level, Output, OutputConfig},
    i2c::master::{Config as I2cConfig, I2c},
    peripherals::{I2C1, SPI2},
    spi::master::{Config as SpiConfig, Spi},
    time::Rate,
};

const SPI_FREQ_MHZ: u32 = 10;
const I2C_FREQ_KHZ: u32 = 400;

#[derive(Debug, Clone, Copy)]
pub enum DisplayType {
    EPaper,
    SSD1306,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareError {
    SpiConfig,
    I2cConfig,
    ChipSelect,
}

impl fmt::Display for HardwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HardwareError::SpiConfig => write!(f, "invalid SPI configuration"),
            HardwareError::I2cConfig => write!(f, "invalid I2C configuration"),
            HardwareError::ChipSelect => write!(f, "failed to set up chip select"),
        }
    }
}

/// SPI bus and control lines of the e-Paper HAT
pub struct DisplayHardware<'a> {
    pub spi: ExclusiveDevice<Spi<'a, esp_hal::Blocking>, Output<'a>, Delay>,
    pub busy: Input<'a>,
    pub dc: Output<'a>,
    pub rst: Output<'a>,
    pub delay: Delay,
}

impl<'a> DisplayHardware<'a> {
    pub fn new<CS, MOSI, SCK, DC, RST, BUSY>(
        spi_periph: SPI2<'a>,
        cs_gpio: CS,
        mosi_gpio: MOSI,
        sck_gpio: SCK,
        dc_gpio: DC,
        rst_gpio: RST,
        busy_gpio: BUSY,
    ) -> Result<Self, HardwareError>
    where
        CS: Into<AnyPin<'a>>,
        MOSI: Into<AnyPin<'a>>,
        SCK: Into<AnyPin<'a>>,
        DC: Into<AnyPin<'a>>,
        RST: Into<AnyPin<'a>>,
        BUSY: Into<AnyPin<'a>>,
    {
        let spi_bus = Spi::new(
            spi_periph,
            SpiConfig::default().with_frequency(Rate::from_mhz(SPI_FREQ_MHZ)),
        )
        .map_err(|_| HardwareError::SpiConfig)?
        .with_sck(sck_gpio.into())
        .with_mosi(mosi_gpio.into());

        let cs = Output::new(cs_gpio.into(), Level::High, OutputConfig::default());
        let dc = Output::new(dc_gpio.into(), Level::Low, OutputConfig::default());
        let rst = Output::new(rst_gpio.into(), Level::High, OutputConfig::default());
        let busy = Input::new(busy_gpio.into(), InputConfig::default());

        let spi = ExclusiveDevice::new(spi_bus, cs, Delay::new())
            .map_err(|_| HardwareError::ChipSelect)?;

        Ok(Self {
            spi,
            busy,
            dc,
            rst,
            delay: Delay::new(),
        })
    }
}

/// I2C bus of the SSD1306 OLED
pub struct SSD1306Hardware<'a> {
    pub i2c: I2c<'a, esp_hal::Blocking>,
}

impl<'a> SSD1306Hardware<'a> {
    pub fn new<SDA, SCL>(i2c_periph: I2C1<'a>, sda: SDA, scl: SCL) -> Result<Self, HardwareError>
    where
        SDA: Into<AnyPin<'a>>,
        SCL: Into<AnyPin<'a>>,
    {
        let i2c = I2c::new(
            i2c_periph,
            I2cConfig::default().with_frequency(Rate::from_khz(I2C_FREQ_KHZ)),
        )
        .map_err(|_| HardwareError::I2cConfig)?
        .with_sda(sda.into())
        .with_scl(scl.into());

        Ok(Self { i2c })
    }
}
