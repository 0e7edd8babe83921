pub mod catalog;
pub mod config;
pub mod distance;
pub mod engine;
pub mod error;
pub mod events;
pub mod fusion;
pub mod gps;
pub mod output;
pub mod registry;
pub mod runtime;
pub mod selection;
pub mod sensors;
pub mod session;
pub mod state;
pub mod throttle;
pub mod validation;

pub use catalog::BeaconCatalog;
pub use config::Config;
pub use distance::estimate_distance;
pub use engine::GuidanceEngine;
pub use error::GuideError;
pub use events::SensorEvent;
pub use output::OutputRequest;
