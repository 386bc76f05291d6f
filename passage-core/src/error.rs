use thiserror::Error;

/// Fatal failure of a single flow operation.
///
/// These abort the current operation and are surfaced on the outer layer of a
/// [`crate::StepResult`]. Expected, recoverable outcomes (a wrong guess, an
/// unavailable MFA kind) never travel through this type; they are modeled as
/// flow-level `Err` values carrying the state to continue from.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The transport failed before a response was produced.
    #[error("transport failure: {0}")]
    Http(#[from] reqwest::Error),
    /// The response body could not be decoded into the expected shape.
    #[error("failed to decode identity provider response")]
    Deserialization,
    /// The permit expired or the supplied arguments violated a precondition,
    /// such as an exceeded attempt count.
    #[error("permit expired or a precondition on the request was violated")]
    Precondition,
    /// The request was malformed. The permit may still be usable.
    #[error("malformed request")]
    Request,
    /// The identity provider failed internally. The state of the permit is
    /// indeterminate.
    #[error("identity provider internal error")]
    Internal,
    /// The identity provider refused the transition. The permit held by the
    /// originating state is dead.
    #[error("attempted to transition to an unauthorized state")]
    State,
    /// Any status code outside the enumerated taxonomy.
    #[error("unexpected status code {status}")]
    General {
        /// The HTTP status code as received.
        status: u16,
    },
}

impl From<serde_json::Error> for RequestError {
    fn from(_: serde_json::Error) -> Self {
        RequestError::Deserialization
    }
}

/// A rejected password, reported in a fixed priority order: length first,
/// then the character set, then each missing class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PasswordError {
    /// Shorter than the 8-character minimum.
    #[error("password must be at least 8 characters, got {len}")]
    TooFewChars {
        /// Observed length in characters.
        len: usize,
    },
    /// Longer than the 72-character maximum.
    #[error("password must be at most 72 characters, got {len}")]
    TooManyChars {
        /// Observed length in characters.
        len: usize,
    },
    /// A character outside the allowed set (letters, digits, printable ASCII
    /// specials).
    #[error("password contains a character outside the allowed set")]
    IllegalCharacter,
    /// No uppercase letter.
    #[error("password must contain an uppercase letter")]
    MissingUppercase,
    /// No lowercase letter.
    #[error("password must contain a lowercase letter")]
    MissingLowercase,
    /// No decimal digit.
    #[error("password must contain a digit")]
    MissingDigit,
    /// No special character.
    #[error("password must contain a special character")]
    MissingSpecial,
}

/// A rejected one-time passcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OtpError {
    /// Wrong number of characters.
    #[error("expected {expected} digits, received {received}")]
    InvalidLength {
        /// Digits the passcode kind requires.
        expected: usize,
        /// Characters actually received.
        received: usize,
    },
    /// Right length, but something other than a decimal digit.
    #[error("one-time passcode may only contain decimal digits")]
    NonNumeric,
}

/// A string that names none of the known MFA kinds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown MFA kind: {0}")]
pub struct UnknownMfaKind(
    /// The raw string that failed to parse.
    pub String,
);

/// Rejected Base64 input. Carries no position information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Base64Error {
    /// The input is not valid Base64.
    #[error("invalid base64 encoding")]
    InvalidEncoding,
}
