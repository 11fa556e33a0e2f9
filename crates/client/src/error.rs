/// Errors from the salt-api client layer.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// salt-api rejected the session token. The caller may re-authenticate
    /// and retry once.
    #[error("Session rejected by salt-api, re-authentication required")]
    NeedsAuth,

    /// salt-api rejected the login credentials.
    #[error("Authentication failed")]
    AuthFailure,

    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// salt-api returned a non-2xx status other than 401.
    #[error("salt-api error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The response body did not have the expected shape.
    #[error("Unexpected response from salt-api: {0}")]
    Decode(String),

    #[error("Invalid server URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Token cache or password prompt failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
