//! Environment validation stage.
//!
//! Runs the diagnostics script, then probes the accelerator device count
//! and asserts the minimum required before any multi-device test stage may
//! run. Insufficient devices is a hard precondition failure: multi-device
//! tests must never run on an under-provisioned host.

use thiserror::Error;

use crate::config::ValidateConfig;
use crate::step::StepSpec;

/// Errors from environment validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidateError {
    #[error("device probe produced no parseable count: {0:?}")]
    UnparseableCount(String),

    #[error("insufficient accelerator devices: {available} available, {required} required")]
    InsufficientDevices { available: u32, required: u32 },
}

/// The diagnostics step
pub fn diagnostics_step(config: &ValidateConfig) -> StepSpec {
    StepSpec::new("diagnostics", config.diagnostics.clone())
}

/// The device-count probe step
pub fn probe_step(config: &ValidateConfig) -> StepSpec {
    StepSpec::new("device-probe", config.probe.clone())
}

/// Parse the device count from probe stdout.
///
/// The probe may print diagnostics of its own; the count is the last
/// non-empty line.
pub fn parse_device_count(stdout: &str) -> Result<u32, ValidateError> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .and_then(|line| line.parse::<u32>().ok())
        .ok_or_else(|| ValidateError::UnparseableCount(stdout.trim().to_string()))
}

/// Assert the device-count precondition
pub fn assert_device_count(available: u32, required: u32) -> Result<(), ValidateError> {
    if available < required {
        return Err(ValidateError::InsufficientDevices {
            available,
            required,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_count() {
        assert_eq!(parse_device_count("2\n").unwrap(), 2);
        assert_eq!(parse_device_count("0").unwrap(), 0);
    }

    #[test]
    fn test_parse_takes_last_line() {
        let stdout = "CUDA available: True\ndriver 470.x\n4\n";
        assert_eq!(parse_device_count(stdout).unwrap(), 4);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_device_count("no devices here\n"),
            Err(ValidateError::UnparseableCount(_))
        ));
        assert!(matches!(
            parse_device_count(""),
            Err(ValidateError::UnparseableCount(_))
        ));
    }

    #[test]
    fn test_assert_passes_at_or_above_minimum() {
        assert!(assert_device_count(2, 2).is_ok());
        assert!(assert_device_count(8, 2).is_ok());
    }

    #[test]
    fn test_assert_fails_below_minimum() {
        let err = assert_device_count(1, 2).unwrap_err();
        assert_eq!(
            err,
            ValidateError::InsufficientDevices {
                available: 1,
                required: 2
            }
        );
    }

    #[test]
    fn test_steps_from_config() {
        let config = ValidateConfig::default();
        assert_eq!(diagnostics_step(&config).argv[0], "python");
        assert!(probe_step(&config).argv[2].contains("device_count"));
    }
}
