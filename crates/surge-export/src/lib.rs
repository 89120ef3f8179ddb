//! SURGE Export - collaborators that read the coordinator's published view
//!
//! - `exposition`: OpenMetrics text and JSON status over HTTP (pull model)
//! - `csv_sink`: one CSV row per accepted report

pub mod csv_sink;
pub mod exposition;

pub use csv_sink::*;
pub use exposition::*;
