//! Error Handling Module
//!
//! Defines custom error types for the imagetrain library.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for training-driver operations
#[derive(Error, Debug)]
pub enum TrainError {
    /// Unrecognized preprocessing-function name; halts before pipeline construction
    #[error("unknown preprocessing_function: '{0}'")]
    UnknownPreprocessing(String),

    /// Error loading or decoding an image
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Error with dataset operations
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Class directory missing under the data root
    #[error("Class directory '{class}' not found under {root:?}")]
    MissingClassDirectory { class: String, root: PathBuf },

    /// Error with model operations (construction, weight loading)
    #[error("Model error: {0}")]
    Model(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Convenience Result type for training-driver operations
pub type Result<T> = std::result::Result<T, TrainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TrainError::Dataset("test error".to_string());
        assert_eq!(format!("{}", err), "Dataset error: test error");
    }

    #[test]
    fn test_unknown_preprocessing_display() {
        let err = TrainError::UnknownPreprocessing("histeq".to_string());
        assert!(format!("{}", err).contains("histeq"));
    }

    #[test]
    fn test_image_load_error() {
        let path = PathBuf::from("/path/to/image.jpg");
        let err = TrainError::ImageLoad(path, "file not found".to_string());
        assert!(format!("{}", err).contains("image.jpg"));
    }
}
