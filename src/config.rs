//! Runtime configuration
//!
//! Bootstrapped from the environment (`RELOAD_ENABLED`) and refined through
//! builder methods.

use std::fmt;
use std::time::Duration;

use crate::extract::{default_name_policy, NamePolicy};

/// Environment variable controlling the initial reload toggle.
///
/// Unset: reload disabled. Set to `quiet`: reload enabled with diagnostic
/// logging suppressed. Set to anything else: reload enabled.
pub const RELOAD_ENV: &str = "RELOAD_ENABLED";

/// Runtime configuration
#[derive(Clone)]
pub struct RuntimeConfig {
    /// Whether local packages are watched for changes
    pub reload_enabled: bool,
    /// Suppress diagnostic logging (event emission is unaffected)
    pub quiet: bool,
    /// Interval between loader-cache reconciliation passes
    pub sync_interval: Duration,
    /// File name of the package descriptor that marks a package root
    pub manifest_file: String,
    /// Directory component that marks installed dependencies
    pub vendor_dir: String,
    /// Policy deciding whether a type nested under another type is tracked,
    /// given its name (or export key when the name is empty). The default
    /// accepts names starting with an uppercase letter.
    pub nested_name_policy: NamePolicy,
    /// Buffered capacity of the lifecycle event channel
    pub event_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            reload_enabled: false,
            quiet: false,
            sync_interval: Duration::from_secs(5),
            manifest_file: "package.json".to_string(),
            vendor_dir: "node_modules".to_string(),
            nested_name_policy: default_name_policy(),
            event_capacity: 1024,
        }
    }
}

impl RuntimeConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration from the process environment
    pub fn from_env() -> Self {
        let config = Self::default();
        match std::env::var(RELOAD_ENV) {
            Ok(value) if value == "quiet" => config.with_reload_enabled(true).with_quiet(true),
            Ok(_) => config.with_reload_enabled(true),
            Err(_) => config,
        }
    }

    /// Set the initial reload toggle
    pub fn with_reload_enabled(mut self, enabled: bool) -> Self {
        self.reload_enabled = enabled;
        self
    }

    /// Enable/disable quiet mode
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Set the reconciliation interval
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Set the manifest file name
    pub fn with_manifest_file(mut self, name: &str) -> Self {
        self.manifest_file = name.to_string();
        self
    }

    /// Set the vendor directory name
    pub fn with_vendor_dir(mut self, name: &str) -> Self {
        self.vendor_dir = name.to_string();
        self
    }

    /// Set the nested type name policy
    pub fn with_nested_name_policy(mut self, policy: NamePolicy) -> Self {
        self.nested_name_policy = policy;
        self
    }

    /// Set the event channel capacity
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

impl fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("reload_enabled", &self.reload_enabled)
            .field("quiet", &self.quiet)
            .field("sync_interval", &self.sync_interval)
            .field("manifest_file", &self.manifest_file)
            .field("vendor_dir", &self.vendor_dir)
            .field("event_capacity", &self.event_capacity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert!(!config.reload_enabled);
        assert!(!config.quiet);
        assert_eq!(config.sync_interval, Duration::from_secs(5));
        assert_eq!(config.manifest_file, "package.json");
        assert_eq!(config.vendor_dir, "node_modules");
    }

    #[test]
    fn test_builder() {
        let config = RuntimeConfig::new()
            .with_reload_enabled(true)
            .with_quiet(true)
            .with_sync_interval(Duration::from_millis(100))
            .with_manifest_file("pkg.json")
            .with_vendor_dir("vendor");

        assert!(config.reload_enabled);
        assert!(config.quiet);
        assert_eq!(config.sync_interval, Duration::from_millis(100));
        assert_eq!(config.manifest_file, "pkg.json");
        assert_eq!(config.vendor_dir, "vendor");
    }

    #[test]
    fn test_from_env() {
        unsafe { std::env::set_var(RELOAD_ENV, "quiet") };
        let config = RuntimeConfig::from_env();
        assert!(config.reload_enabled);
        assert!(config.quiet);

        unsafe { std::env::set_var(RELOAD_ENV, "1") };
        let config = RuntimeConfig::from_env();
        assert!(config.reload_enabled);
        assert!(!config.quiet);

        unsafe { std::env::remove_var(RELOAD_ENV) };
        let config = RuntimeConfig::from_env();
        assert!(!config.reload_enabled);
    }
}
