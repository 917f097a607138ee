// Layer3 Common Module - shared containers for signal detectors

pub mod time_windows;

pub use time_windows::TimeWindow;
