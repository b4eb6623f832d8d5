//! Wall-clock time backed by the ESP32-S3 RTC

use core::cell::RefCell;
use core::fmt::Write;
use core::sync::atomic::{AtomicBool, Ordering};

use critical_section::Mutex;
use esp_hal::rtc_cntl::Rtc;
use heapless::String;

use crate::traits::WallClock;

const SECONDS_PER_DAY: i64 = 86_400;
const MICROS_PER_SECOND: u64 = 1_000_000;

/// RTC instance shared between the render loop and the weather task
static RTC: Mutex<RefCell<Option<Rtc<'static>>>> = Mutex::new(RefCell::new(None));

/// Set once NTP has written the RTC
static TIME_VALID: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl DateTime {
    /// Break Unix seconds down into a calendar date and time of day.
    pub fn from_unix(unix_secs: i64) -> Self {
        let days = unix_secs.div_euclid(SECONDS_PER_DAY);
        let secs_today = unix_secs.rem_euclid(SECONDS_PER_DAY);
        let (year, month, day) = civil_from_days(days);

        Self {
            year,
            month,
            day,
            hour: (secs_today / 3600) as u8,
            minute: ((secs_today % 3600) / 60) as u8,
            second: (secs_today % 60) as u8,
        }
    }

    /// `HH:MM:SS`
    pub fn format_time(&self) -> String<16> {
        let mut out = String::new();
        let _ = write!(out, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second);
        out
    }

    /// `HH:MM`
    pub fn format_time_short(&self) -> String<16> {
        let mut out = String::new();
        let _ = write!(out, "{:02}:{:02}", self.hour, self.minute);
        out
    }

    /// `dd/mm/yyyy`
    pub fn format_date(&self) -> String<16> {
        let mut out = String::new();
        let _ = write!(out, "{:02}/{:02}/{:04}", self.day, self.month, self.year);
        out
    }

    /// `dd/mm/yyyy hh:mm`, used in the boot log
    pub fn format_stamp(&self) -> String<24> {
        let mut out = String::new();
        let _ = write!(
            out,
            "{:02}/{:02}/{:04} {:02}:{:02}",
            self.day, self.month, self.year, self.hour, self.minute
        );
        out
    }
}

/// Convert days since 1970-01-01 to (year, month, day).
///
/// Howard Hinnant's `civil_from_days`, valid for the proleptic Gregorian
/// calendar.
pub fn civil_from_days(days_since_epoch: i64) -> (u16, u8, u8) {
    // Shift the epoch to 0000-03-01 so the leap day ends the year
    let z = days_since_epoch + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u8;
    let year = if month <= 2 { y + 1 } else { y };

    (year as u16, month, day)
}

/// Handle to the hardware RTC.
///
/// The RTC counts UTC. The configured offset is applied when reading.
#[derive(Debug, Clone, Copy)]
pub struct RtcClock {
    utc_offset_secs: i32,
}

impl RtcClock {
    /// Take ownership of the RTC peripheral and return a handle to it.
    pub fn install(rtc: Rtc<'static>, utc_offset_secs: i32) -> Self {
        critical_section::with(|cs| {
            RTC.borrow_ref_mut(cs).replace(rtc);
        });
        Self { utc_offset_secs }
    }

    /// A handle to an RTC that was installed earlier.
    pub const fn shared(utc_offset_secs: i32) -> Self {
        Self { utc_offset_secs }
    }
}

impl WallClock for RtcClock {
    fn set_unix(&mut self, unix_secs: u64) {
        let written = critical_section::with(|cs| match RTC.borrow_ref(cs).as_ref() {
            Some(rtc) => {
                rtc.set_current_time_us(unix_secs * MICROS_PER_SECOND);
                true
            }
            None => false,
        });

        if written {
            TIME_VALID.store(true, Ordering::Release);
        } else {
            log::error!("[RTC] Not installed, time not set");
        }
    }

    fn unix(&self) -> Option<u64> {
        if !TIME_VALID.load(Ordering::Acquire) {
            return None;
        }
        critical_section::with(|cs| {
            RTC.borrow_ref(cs)
                .as_ref()
                .map(|rtc| rtc.current_time_us() / MICROS_PER_SECOND)
        })
    }

    fn utc_offset_secs(&self) -> i32 {
        self.utc_offset_secs
    }
}
