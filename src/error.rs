//! Central error handling for the sensor grid engine.
//!
//! Provides a unified SensorGridError enum with consistent categorization
//! across device acquisition, buffer management and frame execution.

/// Centralized error type for all sensor grid operations
#[derive(thiserror::Error, Debug)]
pub enum SensorGridError {
    #[error("Device error: {0}")]
    Device(String),

    #[error("Capacity error: {0}")]
    Capacity(String),

    #[error("Build error: {0}")]
    Build(String),

    #[error("Readback error: {0}")]
    Readback(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SensorGridError {
    /// Convenience constructors for common error types
    pub fn device<T: ToString>(msg: T) -> Self {
        SensorGridError::Device(msg.to_string())
    }

    pub fn capacity<T: ToString>(msg: T) -> Self {
        SensorGridError::Capacity(msg.to_string())
    }

    pub fn build<T: ToString>(msg: T) -> Self {
        SensorGridError::Build(msg.to_string())
    }

    pub fn readback<T: ToString>(msg: T) -> Self {
        SensorGridError::Readback(msg.to_string())
    }
}

/// Result type alias for sensor grid operations
pub type GridResult<T> = Result<T, SensorGridError>;
