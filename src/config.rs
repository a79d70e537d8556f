//! TOML-based engine configuration.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::Deserialize;

/// Ring capacity an engine may never look past: four days of hourly cells.
pub const MAX_RING_CAPACITY: usize = 96;

/// Engine parameters parsed from TOML.
///
/// All fields have defaults. Load with [`EngineConfig::from_toml_file`] or
/// start from [`EngineConfig::default`]. The TOML loaders validate before
/// returning, so a parsed config is always usable; [`EngineConfig::validate`]
/// remains available for configs assembled in code.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Rated per-charger power in kW (equivalently kWh per timeslot).
    pub unit_capacity_kw: f64,
    /// Commitment lookahead limit in timeslots.
    pub max_horizon: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unit_capacity_kw: 7.2,
            max_horizon: MAX_RING_CAPACITY,
        }
    }
}

/// Why an engine configuration was rejected.
///
/// The config is flat, so `field` is simply the offending key, or `"engine"`
/// when the TOML itself could not be read or parsed.
#[derive(Debug)]
pub struct ConfigError {
    /// Key of the rejected field.
    pub field: &'static str,
    /// Constraint that failed.
    pub message: String,
}

impl ConfigError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid engine config ({}): {}", self.field, self.message)
    }
}

impl EngineConfig {
    /// Reads and parses a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read, the TOML is
    /// malformed, or a field is out of range.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::new("engine", format!("cannot read \"{}\": {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Parses a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is malformed, contains unknown
    /// fields, or a field is out of range.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(s).map_err(|e| ConfigError::new("engine", e.to_string()))?;
        match config.validate().into_iter().next() {
            None => Ok(config),
            Some(error) => Err(error),
        }
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if the configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.unit_capacity_kw <= 0.0 {
            errors.push(ConfigError::new("unit_capacity_kw", "must be > 0"));
        }
        if self.max_horizon <= 1 {
            errors.push(ConfigError::new("max_horizon", "must be > 1"));
        }
        if self.max_horizon > MAX_RING_CAPACITY {
            errors.push(ConfigError::new(
                "max_horizon",
                format!("must be <= {MAX_RING_CAPACITY}"),
            ));
        }

        errors
    }
}
