pub mod power_meter;
pub mod simulated;
pub mod traits;

pub use power_meter::{PowerMeter, PowerReading};
pub use simulated::SimulatedMeter;
pub use traits::{Device, DeviceData};
