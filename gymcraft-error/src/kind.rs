//! Error kinds for gymcraft operations

use std::fmt;

/// The kind of error that occurred.
///
/// Callers match on `ErrorKind` to decide how to react. The policy harness,
/// for example, regenerates a policy only for [`ErrorKind::is_policy_fault`]
/// kinds and aborts the episode for everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // =========================================================================
    // General errors
    // =========================================================================
    /// An unexpected error occurred - catch-all for unhandled cases
    Unexpected,

    /// The requested feature or operation is not supported
    Unsupported,

    /// Invalid configuration or parameters
    ConfigInvalid,

    /// Invalid argument passed to function
    InvalidArgument,

    // =========================================================================
    // Environment errors
    // =========================================================================
    /// Operation not allowed in the current lifecycle phase (e.g. step before reset)
    InvalidState,

    /// Action code outside the environment's action space
    InvalidAction,

    /// Coordinate outside the grid
    OutOfBounds,

    // =========================================================================
    // Policy errors
    // =========================================================================
    /// Policy source does not define the required callable
    PolicyCompilation,

    /// Policy raised an error while running
    PolicyExecution,

    /// Policy could not be repaired within the retry budget
    PolicyExhausted,

    /// Instruction or wall-clock budget consumed
    BudgetExceeded,

    /// Stack overflow - too many values pushed
    StackOverflow,

    /// Stack underflow - tried to pop from empty stack
    StackUnderflow,

    /// Call depth exceeded maximum
    CallDepthExceeded,

    // =========================================================================
    // Inference/LLM errors
    // =========================================================================
    /// LLM inference failed
    InferenceFailed,

    /// Provider not available
    ProviderUnavailable,

    /// Rate limit exceeded
    RateLimited,

    /// Credentials rejected by the provider
    AuthenticationFailed,

    // =========================================================================
    // IO errors
    // =========================================================================
    /// File not found
    FileNotFound,

    /// Permission denied
    PermissionDenied,

    /// IO operation failed
    IoFailed,

    /// Network error
    NetworkFailed,

    // =========================================================================
    // Parse errors
    // =========================================================================
    /// Failed to parse input
    ParseFailed,

    /// Serialization/deserialization failed
    SerializationFailed,
}

impl ErrorKind {
    /// Returns the error kind as a static string
    pub fn as_str(&self) -> &'static str {
        match self {
            // General
            ErrorKind::Unexpected => "Unexpected",
            ErrorKind::Unsupported => "Unsupported",
            ErrorKind::ConfigInvalid => "ConfigInvalid",
            ErrorKind::InvalidArgument => "InvalidArgument",

            // Environment
            ErrorKind::InvalidState => "InvalidState",
            ErrorKind::InvalidAction => "InvalidAction",
            ErrorKind::OutOfBounds => "OutOfBounds",

            // Policy
            ErrorKind::PolicyCompilation => "PolicyCompilation",
            ErrorKind::PolicyExecution => "PolicyExecution",
            ErrorKind::PolicyExhausted => "PolicyExhausted",
            ErrorKind::BudgetExceeded => "BudgetExceeded",
            ErrorKind::StackOverflow => "StackOverflow",
            ErrorKind::StackUnderflow => "StackUnderflow",
            ErrorKind::CallDepthExceeded => "CallDepthExceeded",

            // Inference
            ErrorKind::InferenceFailed => "InferenceFailed",
            ErrorKind::ProviderUnavailable => "ProviderUnavailable",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::AuthenticationFailed => "AuthenticationFailed",

            // IO
            ErrorKind::FileNotFound => "FileNotFound",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::IoFailed => "IoFailed",
            ErrorKind::NetworkFailed => "NetworkFailed",

            // Parse
            ErrorKind::ParseFailed => "ParseFailed",
            ErrorKind::SerializationFailed => "SerializationFailed",
        }
    }

    /// Check if this error kind is retryable by default
    pub fn is_retryable(&self) -> bool {
        self.is_policy_fault()
            || matches!(
                self,
                ErrorKind::InferenceFailed
                    | ErrorKind::NetworkFailed
                    | ErrorKind::RateLimited
                    | ErrorKind::ProviderUnavailable
            )
    }

    /// Runtime failures of policy code. These are repaired by asking the
    /// collaborator for a new policy rather than by retrying the same call.
    pub fn is_policy_fault(&self) -> bool {
        matches!(
            self,
            ErrorKind::PolicyExecution
                | ErrorKind::BudgetExceeded
                | ErrorKind::StackOverflow
                | ErrorKind::StackUnderflow
                | ErrorKind::CallDepthExceeded
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
