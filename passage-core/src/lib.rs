//! # Passage Core
//!
//! `passage-core` provides the foundational types for the Passage identity SDK.
//! It defines the error taxonomy, the refined input types (passwords and
//! one-time passcodes), the constant-time Base64 codec used for credential
//! material, the asynchronous result algebra the flows are expressed in, and
//! the request envelope spoken with the identity provider.

#![warn(missing_docs)]

/// Constant-time Base64 encoding and decoding.
pub mod codec;

/// The request/response envelope and its response-to-result adapters.
pub mod envelope;

/// Errors that can occur while driving a flow or validating input.
pub mod error;

/// Validated input types: passwords, one-time passcodes, MFA kinds.
pub mod refined;

/// The synchronous and asynchronous result algebra.
pub mod result;

/// Route table and the dispatcher the flows speak through.
pub mod transport;

pub use error::{Base64Error, OtpError, PasswordError, RequestError, UnknownMfaKind};
pub use refined::{MfaKind, Password, SimpleOtp, Totp};
pub use result::{FutResult, ResultExt, StepResult};

pub use envelope::Permit;
pub use transport::{Dispatch, HttpTransport, RawReply, Route, TransportError};
