//! Service startup helpers: banner and logging bootstrap

use std::path::PathBuf;

use crate::bootstrap_args::ServiceArgs;
use crate::logging::{self, LogConfig};
use tracing::info;

/// Service metadata for startup
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    /// Service name (e.g., "stationsrv")
    pub name: String,
    /// Service version, normally the caller's `CARGO_PKG_VERSION`
    pub version: String,
    /// Service description
    pub description: String,
}

impl ServiceInfo {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
        }
    }
}

/// Print the startup banner
pub fn print_startup_banner(service: &ServiceInfo) {
    info!("==================================================");
    info!(" {} v{}", service.name.to_uppercase(), service.version);
    info!(" {}", service.description);
    info!("==================================================");
}

/// Log directory: `STATIONSRV_LOG_DIR`-style override, then the configured dir
pub fn resolve_log_dir(service: &ServiceInfo, configured: Option<&str>) -> PathBuf {
    let env_var = format!("{}_LOG_DIR", service.name.to_uppercase());
    std::env::var(env_var)
        .ok()
        .or_else(|| configured.map(str::to_string))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("logs"))
}

/// Initialize logging from the CLI overrides and the service's logging config
pub fn init_logging(
    service: &ServiceInfo,
    args: &ServiceArgs,
    configured_level: &str,
    log_dir: Option<&str>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = LogConfig {
        service_name: service.name.clone(),
        log_dir: resolve_log_dir(service, log_dir),
        level: args.log_filter(configured_level),
        enable_file: log_dir.is_some(),
        enable_json: json,
        ansi: !args.no_color,
    };
    logging::init_with_config(config)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_service_info_creation() {
        let service = ServiceInfo::new("stationsrv", "1.2.3", "Station bridge");
        assert_eq!(service.name, "stationsrv");
        assert_eq!(service.version, "1.2.3");
    }

    #[test]
    fn test_resolve_log_dir_prefers_configured_over_default() {
        let service = ServiceInfo::new("logdirtestsrv", "0.0.0", "test");
        assert_eq!(resolve_log_dir(&service, None), PathBuf::from("logs"));
        assert_eq!(
            resolve_log_dir(&service, Some("/var/log/fleet")),
            PathBuf::from("/var/log/fleet")
        );
    }
}
