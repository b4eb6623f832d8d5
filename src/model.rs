// Model of the data shown by this app

use heapless::String;

/// Longest description kept from the weather API
pub const DESCRIPTION_CAPACITY: usize = 48;

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReport {
    pub temperature: f32,
    pub pressure: u16,
    pub humidity: u8,
    pub description: String<DESCRIPTION_CAPACITY>,
}
