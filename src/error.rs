use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// The caller left out something the request needs
    #[error("{0}")]
    MissingParameters(&'static str),
    /// A parameter is present but cannot be used
    #[error("{0}")]
    InvalidParameters(&'static str),
    #[error("{0}")]
    PortEnumeration(String),
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),
    #[error("serial i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

impl BridgeError {
    /// Errors the HTTP caller should see as a 400
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BridgeError::MissingParameters(_) | BridgeError::InvalidParameters(_)
        )
    }
}
