use thiserror::Error;

/// Domain error types.
#[derive(Error, Debug)]
pub enum DomainError {
    /// Validation error (bad input, below-minimum amount, malformed request)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Order not found
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// Order state error
    #[error("Invalid order state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Amount invalid
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Webhook signature verification failed
    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    /// Error declared by the Stripe API on a response body
    #[error("Stripe API error ({kind}): {message}")]
    Stripe {
        kind: String,
        code: Option<String>,
        message: String,
    },

    /// Could not reach the Stripe API (timeout, empty body)
    #[error("There was a problem connecting to the Stripe API endpoint.")]
    Connectivity,

    /// Feature requires an implementation that is not installed
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl DomainError {
    /// Stripe reports a deleted or foreign-account customer id as an
    /// `invalid_request_error` whose message contains "No such customer".
    pub fn is_no_such_customer(&self) -> bool {
        match self {
            DomainError::Stripe { kind, message, .. } => {
                kind == "invalid_request_error"
                    && message.to_lowercase().contains("no such customer")
            }
            _ => false,
        }
    }
}

/// Domain result type.
pub type DomainResult<T> = Result<T, DomainError>;
