pub mod format;

pub use format::{format_bytes, format_duration, format_eta, format_speed, progress_bar};
