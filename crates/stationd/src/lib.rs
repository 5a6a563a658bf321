pub mod api;
pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod entity;
pub mod notify;
pub mod options;
pub mod push;
pub mod routes;
pub mod sensor;
pub mod station;

pub use config::Config;
pub use config::ConfigError;
pub use config::Diagnostic;
pub use config::LogLevel;
pub use config::format_diagnostics;
pub use coordinator::Coordinator;
pub use coordinator::IngestError;
pub use options::Options;
pub use options::OptionsStore;
pub use station::Station;
