pub mod config;
pub mod error;
pub mod retry;
pub mod shutdown;
pub mod telemetry;

pub use config::Settings;
pub use error::AppError;
