//! Configuration validation utilities

use crate::schema::Config;
use std::path::Path;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate complete configuration
    pub fn validate(config: &Config) -> ValidationReport {
        let mut report = ValidationReport::new();

        Self::validate_storage(config, &mut report);
        Self::validate_database(config, &mut report);
        Self::validate_logging(config, &mut report);

        report
    }

    fn validate_storage(config: &Config, report: &mut ValidationReport) {
        let location = config.storage.data_location.trim();
        if location.is_empty() {
            report.add_error("storage.data_location", "Data location cannot be empty");
            return;
        }

        let path = Path::new(location);
        if !path.exists() {
            report.add_warning(
                "storage.data_location",
                &format!("Data location {} does not exist yet, it will be created on first upload", location),
            );
        } else if !path.is_dir() {
            report.add_error(
                "storage.data_location",
                &format!("Data location {} is not a directory", location),
            );
        }

        if path.is_relative() {
            report.add_warning(
                "storage.data_location",
                "Data location is relative, artifacts depend on the working directory",
            );
        }
    }

    fn validate_database(config: &Config, report: &mut ValidationReport) {
        if config.database.url.is_empty() {
            report.add_error("database.url", "Database URL cannot be empty");
        }

        if !config.database.url.starts_with("sqlite:") {
            report.add_warning("database.url", "Only SQLite is currently supported");
        }

        if config.database.max_connections == 0 {
            report.add_error("database.max_connections", "Max connections cannot be 0");
        } else if config.database.max_connections > 100 {
            report.add_warning("database.max_connections", "Max connections is very high");
        }

        if config.database.connection_timeout_seconds == 0 {
            report.add_error("database.connection_timeout_seconds", "Connection timeout cannot be 0");
        }

        if config.database.log_statements {
            report.add_warning("database.log_statements", "SQL statement logging is enabled");
        }
    }

    fn validate_logging(config: &Config, report: &mut ValidationReport) {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.as_str()) {
            report.add_error(
                "logging.level",
                &format!("Invalid log level: {}. Valid levels: {:?}", config.logging.level, valid_levels),
            );
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&config.logging.format.as_str()) {
            report.add_error(
                "logging.format",
                &format!("Invalid log format: {}. Valid formats: {:?}", config.logging.format, valid_formats),
            );
        }

        if config.logging.level == "trace" || config.logging.level == "debug" {
            report.add_warning("logging.level", "Debug/trace logging may impact performance in production");
        }
    }
}

/// Validation report containing errors and warnings
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

/// A validation issue (error or warning)
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, field: &str, message: &str) {
        self.errors.push(ValidationIssue {
            field: field.to_string(),
            message: message.to_string(),
        });
    }

    pub fn add_warning(&mut self, field: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            field: field.to_string(),
            message: message.to_string(),
        });
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        !self.has_errors()
    }

    pub fn summary(&self) -> String {
        format!("Validation: {} errors, {} warnings", self.errors.len(), self.warnings.len())
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let report = ConfigValidator::validate(&Config::default());
        assert!(report.is_valid(), "{:?}", report.errors);
    }

    #[test]
    fn test_missing_data_location_warns() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.data_location = dir.path().join("nested").display().to_string();

        let report = ConfigValidator::validate(&config);
        assert!(report.is_valid());
        assert!(report
            .warnings
            .iter()
            .any(|w| w.field == "storage.data_location" && w.message.contains("does not exist")));
    }

    #[test]
    fn test_data_location_must_be_directory() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut config = Config::default();
        config.storage.data_location = file.path().display().to_string();

        let report = ConfigValidator::validate(&config);
        assert!(report.has_errors());
        assert_eq!(report.errors[0].field, "storage.data_location");
    }

    #[test]
    fn test_collects_multiple_errors() {
        let mut config = Config::default();
        config.storage.data_location = String::new();
        config.database.max_connections = 0;
        config.logging.level = "loud".to_string();

        let report = ConfigValidator::validate(&config);
        assert_eq!(report.errors.len(), 3);
        assert_eq!(report.summary(), format!("Validation: 3 errors, {} warnings", report.warnings.len()));
    }

    #[test]
    fn test_non_sqlite_database_warns() {
        let mut config = Config::default();
        config.database.url = "mysql://localhost/dlc".to_string();

        let report = ConfigValidator::validate(&config);
        assert!(report.is_valid());
        assert!(report.has_warnings());
    }
}
