#![no_std]

extern crate alloc;

pub mod clock;
pub mod config;
pub mod display;
pub mod hardware;
pub mod logic;
pub mod model;
pub mod ntp;
pub mod traits;
pub mod weather;
pub mod wifi;
