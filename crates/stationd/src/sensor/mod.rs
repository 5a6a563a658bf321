pub mod derived;
pub mod descriptions;
pub mod keys;
pub mod remap;

pub use descriptions::SensorDescription;
pub use descriptions::SensorValue;
pub use remap::Dialect;
pub use remap::RawPayload;
pub use remap::RemappedPayload;
pub use remap::remap;
