//! Error types for directory and synchronization operations.
//!
//! `DirectoryError` mirrors the LDAP result codes the engine cares about;
//! everything else is carried as a generic protocol error. `SyncError` wraps
//! the directory taxonomy together with the local collaborator failures the
//! reconciliation scan can encounter.

use thiserror::Error;

/// LDAP result code for `entryAlreadyExists`.
pub const RC_ALREADY_EXISTS: u32 = 68;
/// LDAP result code for `constraintViolation`.
pub const RC_CONSTRAINT_VIOLATION: u32 = 19;
/// LDAP result code for `objectClassViolation` (required attribute absent).
pub const RC_OBJECT_CLASS_VIOLATION: u32 = 65;
/// LDAP result code for `noSuchObject`.
pub const RC_NO_SUCH_OBJECT: u32 = 32;
/// LDAP result code for `invalidCredentials`.
pub const RC_INVALID_CREDENTIALS: u32 = 49;
/// LDAP result code for `sizeLimitExceeded`.
pub const RC_SIZE_LIMIT_EXCEEDED: u32 = 4;

/// Error that can occur while talking to the directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Failed to establish a connection to the directory server.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Bind was rejected by the server.
    #[error("authentication failed: invalid credentials")]
    AuthenticationFailed,

    /// The entry already exists in the directory (create conflict).
    #[error("entry already exists: {dn}")]
    AlreadyExists { dn: String },

    /// The directory rejected the operation because a schema constraint is
    /// not satisfied (typically a required attribute is absent).
    #[error("constraint violation: {message}")]
    ConstraintViolation { message: String },

    /// The entry does not exist in the directory.
    #[error("no such entry: {dn}")]
    NotFound { dn: String },

    /// A value is not a syntactically valid distinguished name.
    #[error("malformed distinguished name: {value}")]
    MalformedDn { value: String },

    /// An attribute required to derive a value is absent from an entry.
    #[error("missing attribute '{attribute}' on {dn}")]
    MissingAttribute { attribute: String, dn: String },

    /// Configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// Any other directory-protocol failure, carrying the LDAP result code.
    #[error("directory operation failed with code {code}: {message}")]
    Protocol { code: u32, message: String },

    /// Transport-level failure during an operation.
    #[error("directory operation failed: {message}")]
    OperationFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl DirectoryError {
    /// Map an LDAP result code to the error variant the engine branches on.
    pub fn from_result_code(code: u32, text: impl Into<String>, dn: &str) -> Self {
        match code {
            RC_ALREADY_EXISTS => DirectoryError::AlreadyExists { dn: dn.to_string() },
            RC_CONSTRAINT_VIOLATION | RC_OBJECT_CLASS_VIOLATION => {
                DirectoryError::ConstraintViolation { message: text.into() }
            }
            RC_NO_SUCH_OBJECT => DirectoryError::NotFound { dn: dn.to_string() },
            RC_INVALID_CREDENTIALS => DirectoryError::AuthenticationFailed,
            _ => DirectoryError::Protocol {
                code,
                message: text.into(),
            },
        }
    }

    /// Whether this is the create-conflict outcome (`entryAlreadyExists`).
    pub fn is_already_exists(&self) -> bool {
        matches!(self, DirectoryError::AlreadyExists { .. })
    }

    /// Whether this is the "not yet creatable" outcome (required attribute
    /// absent on create).
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, DirectoryError::ConstraintViolation { .. })
    }

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        DirectoryError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection failed error with source.
    pub fn connection_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DirectoryError::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an operation failed error.
    pub fn operation_failed(message: impl Into<String>) -> Self {
        DirectoryError::OperationFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create an operation failed error with source.
    pub fn operation_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DirectoryError::OperationFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type for directory operations.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Error that can occur during a reconciliation run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Directory-level failure.
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// Local user store failure.
    #[error("user store error: {message}")]
    UserStore { message: String },

    /// Export provisioning failure.
    #[error("provisioning failed for '{user}': {message}")]
    Provisioning { user: String, message: String },

    /// Configuration loading or validation failure.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// I/O failure reading local state.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Create a user store error.
    pub fn user_store(message: impl Into<String>) -> Self {
        SyncError::UserStore {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        SyncError::Config {
            message: message.into(),
        }
    }
}

/// Result type for reconciliation operations.
pub type SyncResult<T> = Result<T, SyncError>;
