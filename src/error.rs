//! Application-level error type.
//!
//! Every fallible public operation in the crate returns `Result<_, AppError>`.
//! The exit code travels with the error so the binary can map failures to a
//! process status without inspecting messages:
//!
//! - `2`: configuration, argument, or filesystem problems
//! - `3`: not enough usable data to produce a result
//! - `4`: numerical failure that the caller asked to be fatal

use std::path::Path;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    /// Invalid configuration value or combination.
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(2, message)
    }

    /// Filesystem failure, tagged with the path involved.
    pub fn io(action: &str, path: &Path, err: impl std::fmt::Display) -> Self {
        Self::new(2, format!("Failed to {action} '{}': {err}", path.display()))
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(2, format!("JSON error: {err}"))
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        Self::new(2, format!("CSV error: {err}"))
    }
}
