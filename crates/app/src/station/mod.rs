//! Station wiring around the decision layer: reads detections, drives the
//! output lines, follows the enable input and serves metrics over HTTP.
//!
//! - `config`: CLI and TOML profile parsing.
//! - `lines`: memory or sysfs line backends.
//! - `pipeline`: supervisor, gate actor and the streaming loop.
//! - `server`: Actix Web metrics endpoint with static fallthrough.
//! - `telemetry`: tracing subscriber and Prometheus recorder.

pub use config::{StationCliArgs, StationConfig};
pub use pipeline::run;

mod config;
mod lines;
mod pipeline;
mod server;
mod telemetry;
