//! Command-line arguments shared by station fleet services
//!
//! Services flatten [`ServiceArgs`] into their own parser. Every field is an
//! override: anything left unset falls back to the service's config file.

#[cfg(feature = "cli")]
use clap::Args;

#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "cli", derive(Args))]
pub struct ServiceArgs {
    /// Config file, defaults to the service's own path
    #[cfg_attr(feature = "cli", arg(short = 'c', long, env = "CONFIG_PATH"))]
    pub config: Option<String>,

    /// Listen address override, e.g. 0.0.0.0:8000
    #[cfg_attr(feature = "cli", arg(short = 'b', long, env = "BIND_ADDRESS"))]
    pub bind_address: Option<String>,

    /// Log level or filter directive; overrides `logging.level`
    #[cfg_attr(feature = "cli", arg(short = 'l', long, env = "LOG_LEVEL"))]
    pub log_level: Option<String>,

    /// Shorthand for `--log-level debug`
    #[cfg_attr(feature = "cli", arg(long))]
    pub debug: bool,

    /// Plain console output
    #[cfg_attr(feature = "cli", arg(long))]
    pub no_color: bool,

    /// Skip the startup banner
    #[cfg_attr(feature = "cli", arg(long))]
    pub no_banner: bool,

    /// Load and validate the config, then exit
    #[cfg_attr(feature = "cli", arg(long))]
    pub validate: bool,
}

impl ServiceArgs {
    /// Config path to load, `default` when none was given
    pub fn config_path(&self, default: &str) -> String {
        self.config.clone().unwrap_or_else(|| default.to_string())
    }

    /// Filter to install: `--debug`, then `--log-level`, then the configured level
    pub fn log_filter(&self, configured: &str) -> String {
        if self.debug {
            return "debug".to_string();
        }
        match self.log_level.as_deref().map(str::trim) {
            Some(level) if !level.is_empty() => level.to_string(),
            _ => configured.to_string(),
        }
    }
}
