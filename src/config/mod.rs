pub mod settings;

pub use settings::{Config, DirectionConfig, MeterConfig, OutputConfig, ParityConfig};
