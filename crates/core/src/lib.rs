pub mod config;
pub mod error;
pub mod telemetry;
pub mod units;

pub use config::Settings;
pub use error::AppError;
