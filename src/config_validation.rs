//! Field-level validation of the sweep configuration.
//!
//! Validators return a [`ValidationError`] naming the offending field path
//! (e.g. `ramp.startRate`). [`ValidationContext`] collects every error so a
//! bad configuration is reported in one go instead of one field at a time.

use thiserror::Error;

/// Validation error with context about which field failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Field '{field}': {message}")]
    FieldError { field: String, message: String },

    #[error("Field '{field}' is required but not provided")]
    RequiredField { field: String },

    #[error("Field '{field}': value {value} is out of range ({min} to {max})")]
    OutOfRange {
        field: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("Field '{field}': invalid format - {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Multiple validation errors: {0}")]
    Multiple(String),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Collects errors while walking nested configuration sections.
#[derive(Debug, Default)]
pub struct ValidationContext {
    field_path: Vec<String>,
    errors: Vec<ValidationError>,
}

impl ValidationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a nested section.
    pub fn enter(&mut self, field: &str) {
        self.field_path.push(field.to_string());
    }

    /// Leave the current section.
    pub fn exit(&mut self) {
        self.field_path.pop();
    }

    pub fn current_path(&self) -> String {
        self.field_path.join(".")
    }

    /// Full path of `field` inside the current section.
    pub fn path_of(&self, field: &str) -> String {
        if self.field_path.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", self.current_path(), field)
        }
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Record the error of `result`, if any.
    pub fn check(&mut self, result: ValidationResult<()>) {
        if let Err(e) = result {
            self.add_error(e);
        }
    }

    pub fn require_non_empty(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            let field = self.path_of(field);
            self.add_error(ValidationError::RequiredField { field });
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Consume the context; several errors are joined into one.
    pub fn into_result(mut self) -> ValidationResult<()> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => {
                let messages: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
                Err(ValidationError::Multiple(messages.join("; ")))
            }
        }
    }
}

/// Validator for http(s) URLs.
pub struct UrlValidator;

impl UrlValidator {
    pub fn validate(url: &str, field: &str) -> ValidationResult<()> {
        let message = if url.is_empty() {
            "URL cannot be empty".to_string()
        } else if !url.starts_with("http://") && !url.starts_with("https://") {
            format!("URL must start with http:// or https://, got: {}", url)
        } else if url.contains(' ') {
            "URL cannot contain spaces".to_string()
        } else {
            return Ok(());
        };
        Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            message,
        })
    }
}

/// Validator for duration strings such as `60s` or `10m`.
pub struct DurationValidator;

impl DurationValidator {
    pub fn validate(duration_str: &str, field: &str) -> ValidationResult<std::time::Duration> {
        crate::utils::parse_duration_string(duration_str).map_err(|e| {
            ValidationError::InvalidFormat {
                field: field.to_string(),
                message: format!("Invalid duration format '{}': {}", duration_str, e),
            }
        })
    }

    pub fn validate_positive(duration_str: &str, field: &str) -> ValidationResult<()> {
        let duration = Self::validate(duration_str, field)?;
        if duration.is_zero() {
            return Err(ValidationError::OutOfRange {
                field: field.to_string(),
                value: duration_str.to_string(),
                min: "1s".to_string(),
                max: "unlimited".to_string(),
            });
        }
        Ok(())
    }
}

/// Validator for numeric ranges.
pub struct RangeValidator;

impl RangeValidator {
    pub fn validate_f64(value: f64, min: f64, max: f64, field: &str) -> ValidationResult<()> {
        if !(min..=max).contains(&value) {
            return Err(ValidationError::OutOfRange {
                field: field.to_string(),
                value: value.to_string(),
                min: min.to_string(),
                max: max.to_string(),
            });
        }
        Ok(())
    }

    pub fn validate_positive_u64(value: u64, field: &str) -> ValidationResult<()> {
        if value == 0 {
            return Err(ValidationError::OutOfRange {
                field: field.to_string(),
                value: "0".to_string(),
                min: "1".to_string(),
                max: "unlimited".to_string(),
            });
        }
        Ok(())
    }

    pub fn validate_positive_f64(value: f64, field: &str) -> ValidationResult<()> {
        if value.is_nan() || value <= 0.0 {
            return Err(ValidationError::OutOfRange {
                field: field.to_string(),
                value: value.to_string(),
                min: "0.0 (exclusive)".to_string(),
                max: "unlimited".to_string(),
            });
        }
        Ok(())
    }
}

/// Validator for the rate ramp.
pub struct RampValidator;

impl RampValidator {
    pub fn validate(start_rate: u32, end_rate: u32, increment: u32) -> ValidationResult<()> {
        RangeValidator::validate_positive_u64(start_rate as u64, "ramp.startRate")?;
        RangeValidator::validate_positive_u64(end_rate as u64, "ramp.endRate")?;
        RangeValidator::validate_positive_u64(increment as u64, "ramp.increment")?;

        if start_rate > end_rate {
            return Err(ValidationError::FieldError {
                field: "ramp".to_string(),
                message: format!(
                    "startRate ({}) must not exceed endRate ({})",
                    start_rate, end_rate
                ),
            });
        }
        Ok(())
    }
}

/// Validator for the replica sweep range.
pub struct ReplicaValidator;

impl ReplicaValidator {
    pub fn validate(min_replicas: u32, max_replicas: u32, partitions: u32) -> ValidationResult<()> {
        RangeValidator::validate_positive_u64(min_replicas as u64, "scale.minReplicas")?;
        RangeValidator::validate_positive_u64(partitions as u64, "scale.partitions")?;

        if min_replicas > max_replicas {
            return Err(ValidationError::FieldError {
                field: "scale".to_string(),
                message: format!(
                    "minReplicas ({}) must not exceed maxReplicas ({})",
                    min_replicas, max_replicas
                ),
            });
        }
        Ok(())
    }
}
