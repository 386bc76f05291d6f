//! # Passage
//!
//! A typed client SDK for identity providers that expose authentication,
//! signup, account recovery, account deletion and MFA updates as
//! server-authoritative, permit-gated state machines.
//!
//! The provider owns every decision; this crate owns making the protocol
//! impossible to hold wrong. Each flow is a family of state values whose
//! transitions consume the state, session tokens are affine and rotated on
//! every use, and credential material moves through a constant-time Base64
//! codec.
//!
//! ```no_run
//! use passage::{Passage, Password, Totp};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Passage::connect("idp.example.com", 443)?;
//!
//! let password = Password::parse("Password1234!")?;
//! let init = client.login().start("bob123", &password).await??;
//! let verify = init.totp().await?.map_err(|_| "totp unavailable")?;
//! let token = match verify.guess(Totp::parse("01234567")?).await? {
//!     Ok(token) => token,
//!     Err(_retry) => return Err("wrong code".into()),
//! };
//!
//! let peeked = client
//!     .check_token(token)
//!     .await?
//!     .map_err(|_| "token rejected")?;
//! println!("logged in as {}", peeked.user_id);
//! // peeked.token is the live session now; the old token is dead.
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub use passage_core::codec;
pub use passage_core::envelope::{self, Permit};
pub use passage_core::transport::{Dispatch, HttpTransport, RawReply, Route, TransportError};
pub use passage_core::{
    Base64Error, FutResult, MfaKind, OtpError, Password, PasswordError, RequestError, ResultExt,
    SimpleOtp, StepResult, Totp, UnknownMfaKind,
};
pub use passage_core::result::{Collapse, VoidErr};

pub use passage_token::{PeekedToken, SessionToken, Ticket};

pub use passage_flow::{client, delete, login, migrate, setup, signup, ticket, update_mfa};
pub use passage_flow::{Opaque, Passage, PassageBuilder, ResumeError, Snapshot};
