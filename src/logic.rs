//! Business logic layer (hardware-independent)

use core::fmt::Write;

use embedded_graphics::{
    image::Image,
    mono_font::{MonoFont, MonoTextStyleBuilder},
    pixelcolor::BinaryColor,
    prelude::*,
    text::{Baseline, Text, TextStyleBuilder},
};
use heapless::String;

use crate::clock::DateTime;
use crate::display::{DisplayError, Layout};
use crate::model::WeatherReport;
use crate::traits::Panel;

pub type Label = String<48>;

/// Text of every on-screen label.
///
/// Weather labels keep the last successfully fetched reading; before the
/// first fetch they show placeholders.
pub struct Dashboard {
    time: Label,
    date: Label,
    temperature: Label,
    pressure: Label,
    humidity: Label,
    description: Label,
    dirty: bool,
}

impl Dashboard {
    pub fn new() -> Self {
        Self {
            time: Label::new(),
            date: Label::new(),
            temperature: label("temp: --C"),
            pressure: label("pressure: --"),
            humidity: label("humidity: --%"),
            description: label("updating weather..."),
            dirty: true,
        }
    }

    pub fn set_time(&mut self, now: &DateTime, show_seconds: bool) {
        let time = if show_seconds {
            now.format_time()
        } else {
            now.format_time_short()
        };
        self.dirty |= replace(&mut self.time, time.as_str());
        self.dirty |= replace(&mut self.date, now.format_date().as_str());
    }

    pub fn set_weather(&mut self, report: &WeatherReport) {
        let mut text = Label::new();

        let _ = write!(text, "temp: {}C", report.temperature);
        self.dirty |= replace(&mut self.temperature, text.as_str());

        text.clear();
        let _ = write!(text, "pressure: {}", report.pressure);
        self.dirty |= replace(&mut self.pressure, text.as_str());

        text.clear();
        let _ = write!(text, "humidity: {}%", report.humidity);
        self.dirty |= replace(&mut self.humidity, text.as_str());

        self.dirty |= replace(&mut self.description, report.description.as_str());
    }

    pub fn time(&self) -> &str {
        &self.time
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn temperature(&self) -> &str {
        &self.temperature
    }

    pub fn pressure(&self) -> &str {
        &self.pressure
    }

    pub fn humidity(&self) -> &str {
        &self.humidity
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Whether any label changed since the last call
    pub fn take_dirty(&mut self) -> bool {
        core::mem::replace(&mut self.dirty, false)
    }

    /// Draw background then every label.
    pub fn render<D>(&self, target: &mut D, layout: &Layout) -> Result<(), D::Error>
    where
        D: DrawTarget<Color = BinaryColor>,
    {
        target.clear(BinaryColor::Off)?;
        Image::new(&layout.background(), Point::zero()).draw(target)?;

        draw_label(target, &self.time, layout.big_font, layout.time_origin())?;

        let rows = [
            &self.date,
            &self.temperature,
            &self.pressure,
            &self.humidity,
            &self.description,
        ];
        for (n, text) in rows.into_iter().enumerate() {
            draw_label(target, text, layout.font, layout.label_origin(n as i32))?;
        }

        Ok(())
    }
}

impl Default for Dashboard {
    fn default() -> Self {
        Self::new()
    }
}

fn label(text: &str) -> Label {
    let mut out = Label::new();
    let _ = out.push_str(text);
    out
}

/// Overwrite `slot` with `text`, truncating to capacity. Returns whether
/// the text changed.
fn replace(slot: &mut Label, text: &str) -> bool {
    if slot.as_str() == text {
        return false;
    }
    slot.clear();
    for c in text.chars() {
        if slot.push(c).is_err() {
            break;
        }
    }
    true
}

fn draw_label<D>(
    target: &mut D,
    text: &str,
    font: &'static MonoFont<'static>,
    origin: Point,
) -> Result<(), D::Error>
where
    D: DrawTarget<Color = BinaryColor>,
{
    let style = MonoTextStyleBuilder::new()
        .font(font)
        .text_color(BinaryColor::On)
        .background_color(BinaryColor::Off)
        .build();
    let baseline = TextStyleBuilder::new().baseline(Baseline::Top).build();

    Text::with_text_style(text, origin, style, baseline).draw(target)?;
    Ok(())
}

/// Redraw the panel if the dashboard changed since the last flush.
///
/// Returns whether a flush happened.
pub fn update_panel<P: Panel>(
    panel: &mut P,
    dashboard: &mut Dashboard,
    layout: &Layout,
) -> Result<bool, DisplayError> {
    if !dashboard.take_dirty() {
        return Ok(false);
    }

    let mut canvas = panel.canvas().color_converted::<BinaryColor>();
    let result = dashboard
        .render(&mut canvas, layout)
        .map_err(|_| DisplayError::Draw)
        .and_then(|()| panel.flush());

    if let Err(e) = result {
        // Try again on the next tick
        dashboard.dirty = true;
        return Err(e);
    }
    Ok(true)
}
