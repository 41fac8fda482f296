use thiserror::Error;

/// Errors raised while starting the callback server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("No available port in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },

    /// The address to advertise in callback URLs could not be determined
    #[error("Could not determine the local address to advertise")]
    LocalAddress,

    #[error("Failed to bind callback server: {0}")]
    Bind(String),
}
