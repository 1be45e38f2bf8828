//! Shared types, configuration, and errors for the OrderDesk admin console backend.

pub mod config;
pub mod error;

pub use config::AppConfig;
pub use error::{ConsoleError, ConsoleResult};
