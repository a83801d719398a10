use std::io;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong between "resolve the instance" and "the
/// certificate is installed".
///
/// The variants mirror how failures propagate: `Config`, `NotFound` and
/// `UnsupportedRuntime` abort a run before any remote mutation, `Connection`
/// and `Upload`/`RemoteOperation` fail a single challenge, and `Install` is
/// surfaced verbatim with no retry.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or invalid local configuration (API key, instance name, …).
    #[error("configuration error: {0}")]
    Config(String),

    /// The instance name did not match any hosting instance.
    #[error("couldn't find any match for {0:?}")]
    NotFound(String),

    /// The instance runs a platform we cannot place challenge files on.
    #[error("unsupported instance type {0:?}; only php, python and ruby instances are supported")]
    UnsupportedRuntime(String),

    /// The probe connection to the instance's file store failed.
    #[error("couldn't connect to the instance at {user}@{host}")]
    Connection { user: String, host: String },

    /// A hard command in a remote batch exited non-zero.
    #[error("remote batch failed: {0}")]
    RemoteOperation(String),

    /// The challenge file could not be placed on the instance.
    #[error("couldn't place file in domain: {0}")]
    Upload(String),

    /// The hosted-certificate upload was rejected.
    #[error("certificate install failed: {0}")]
    Install(String),

    /// The API returned an XML-RPC fault.
    #[error("api fault {code}: {message}")]
    RpcFault { code: i64, message: String },

    /// The API response was not a well-formed XML-RPC method response.
    #[error("malformed api response: {0}")]
    RpcProtocol(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}
