//! Station fleet basic library
//!
//! Provides basic functions shared by all services, including:
//! - logging bootstrap
//! - shutdown signal handling
//! - common command-line arguments and startup banner

pub mod bootstrap_args;
pub mod logging;
pub mod service_bootstrap;
pub mod shutdown;

pub use bootstrap_args::ServiceArgs;
pub use service_bootstrap::ServiceInfo;

// Re-export common dependencies
pub use tokio;

// Re-export CLI dependencies when cli feature is enabled
#[cfg(feature = "cli")]
pub use clap;

// Re-export clap derive macros separately for proper macro resolution
#[cfg(feature = "cli")]
pub use clap::{Args, Parser};
