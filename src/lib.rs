//! Live satellite positions on a shaded globe.
//!
//! Element sets are fetched once, propagated off the UI thread when a
//! worker is available (on the main thread otherwise), and shown through a
//! double buffer that the GPU blends between batches. When no element
//! sets can be had, a seeded synthetic swarm stands in.

pub mod app;
pub mod astronomy;
pub mod buffers;
pub mod config;
pub mod globe;
pub mod math;
pub mod pipeline;
pub mod propagation;
pub mod render;
mod settings;
pub mod synthetic;
pub mod time;
pub mod tle;
pub mod worker;

pub use app::App;
pub use config::AppConfig;
pub use pipeline::{LivePath, SatelliteMode, SatelliteSystem};
