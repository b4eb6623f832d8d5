//! Hardware abstraction traits

use embedded_graphics::{pixelcolor::BinaryColor, prelude::*};

use crate::clock::DateTime;
use crate::display::DisplayError;

/// Trait for clocks that can be set from network time
pub trait WallClock {
    /// Set the clock to UTC Unix seconds
    fn set_unix(&mut self, unix_secs: u64);

    /// UTC Unix seconds, `None` until the clock has been set
    fn unix(&self) -> Option<u64>;

    /// Offset added to UTC for display
    fn utc_offset_secs(&self) -> i32;

    /// Whether the clock holds network time
    fn is_valid(&self) -> bool {
        self.unix().is_some()
    }

    /// Local calendar time
    fn now(&self) -> Option<DateTime> {
        self.unix()
            .map(|secs| DateTime::from_unix(secs as i64 + self.utc_offset_secs() as i64))
    }
}

/// Trait for display panels with an in-memory frame buffer
pub trait Panel {
    /// Native pixel color; monochrome content converts into it
    type Color: PixelColor + From<BinaryColor>;

    /// Frame buffer drawn into before `flush`
    type Canvas: DrawTarget<Color = Self::Color>;

    fn canvas(&mut self) -> &mut Self::Canvas;

    /// Push the frame buffer to the glass
    fn flush(&mut self) -> Result<(), DisplayError>;

    /// Slow panels drop seconds so they refresh once a minute
    fn show_seconds(&self) -> bool;

    fn size(&mut self) -> Size {
        self.canvas().bounding_box().size
    }
}
