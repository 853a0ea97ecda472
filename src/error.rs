//! Error handling utilities for the crate
use thiserror::Error;

use reqwest::Error as ReqwestError;

/// All errors raised by this crate will be instances of VimeoError
#[derive(Error, Debug)]
pub enum VimeoError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(&'static str),
    #[error("Transport failure: {0}")]
    Transport(#[from] ReqwestError),
    #[error("Unexpected response from the API: {0}")]
    Protocol(String),
    #[error("API call failed ({code}): {message}")]
    Api {
        code: u32,
        message: String,
        raw: String,
    },
    #[error("Upload confirmation failed: {0}")]
    Confirmation(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl VimeoError {
    pub fn protocol(detail: impl Into<String>) -> Self {
        VimeoError::Protocol(detail.into())
    }

    pub fn required(field_name: &str) -> Self {
        VimeoError::InvalidInput(format!("{} is required", field_name))
    }
}

pub type Result<T> = std::result::Result<T, VimeoError>;
