//! The signup flow.
//!
//! `start` claims a username, `SetPassword` fixes the password, and the rest
//! of the walk is the shared enrolment machinery from [`crate::setup`]: at
//! least one MFA method must be enrolled and verified before
//! [`NewMfaOrFinalize::finish`](crate::setup::NewMfaOrFinish::finish) issues
//! the first session token.

use crate::setup::{EnrolFlow, EnrolRecord, NewMfaOrFinish, SetupFirstMfa, VerifyOtpSetup, VerifyTotpSetup};
use crate::{ingress, require_permit, Empty, FlowCore, Snapshot};
use passage_core::envelope::Permit;
use passage_core::transport::{Dispatch, Route};
use passage_core::{FutResult, Password};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use thiserror::Error;

/// The requested username is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("username already exists")]
pub struct UsernameAlreadyExists;

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum SignupArgs<'a> {
    HelloSignup { username: &'a str },
    Password { password: &'a str },
}

#[derive(Deserialize)]
struct HelloSignupRet {
    username_exists: Option<bool>,
}

/// Ingress of the signup flow; obtained from [`Passage::signup`](crate::Passage::signup).
pub struct Signup {
    pub(crate) transport: Arc<dyn Dispatch>,
}

impl Signup {
    /// Claim a username.
    pub fn start(
        self,
        username: impl Into<String>,
    ) -> FutResult<'static, SetPassword, UsernameAlreadyExists> {
        let username = username.into();
        FutResult::new(async move {
            let args = SignupArgs::HelloSignup {
                username: &username,
            };
            let (ret, permit): (HelloSignupRet, _) =
                ingress(&self.transport, Route::Signup, &args, None).await?;
            match ret.username_exists {
                None => Ok(Ok(SetPassword {
                    core: FlowCore::new(self.transport, require_permit(permit)?),
                })),
                Some(_) => Ok(Err(UsernameAlreadyExists)),
            }
        })
    }
}

/// Fix the account password. Validation already happened in
/// [`Password::parse`], so the provider-side check cannot fail in an
/// expected way.
pub struct SetPassword {
    pub(crate) core: FlowCore,
}

impl SetPassword {
    /// Submit the validated password and move on to MFA enrolment.
    pub fn password(
        self,
        password: &Password,
    ) -> FutResult<'static, SetupFirstMfa<SignupFlow>, Infallible> {
        let password = password.clone();
        FutResult::new(async move {
            let args = SignupArgs::Password {
                password: password.expose(),
            };
            let (Empty {}, permit) = self.core.exchange(Route::Signup, &args).await?;
            Ok(Ok(SetupFirstMfa::new(self.core.advance(permit)?)))
        })
    }
}

impl Snapshot for SetPassword {
    type Record = SignupRecord;

    fn record(&self) -> SignupRecord {
        EnrolRecord {
            stage: SignupStage::Password,
            permit: self.core.permit.clone(),
            already_setup: Vec::new(),
            current_mfa: None,
        }
    }
}

/// Marker instantiating the shared enrolment states for signup.
pub enum SignupFlow {}

impl EnrolFlow for SignupFlow {
    const ROUTE: Route = Route::Signup;
    type Stage = SignupStage;
    const FIRST_MFA: SignupStage = SignupStage::SetupFirstMfa;
    const MFA_OR_FINISH: SignupStage = SignupStage::SetupMfaOrFinalize;
    const VERIFY_OTP: SignupStage = SignupStage::VerifyOtpSetup;
    const VERIFY_TOTP: SignupStage = SignupStage::VerifyTotpSetup;
}

/// Stage tags of the signup flow's serialized records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignupStage {
    /// Awaiting the account password.
    Password,
    /// Enrolling the first MFA method.
    SetupFirstMfa,
    /// Enrolling further methods, or concluding.
    SetupMfaOrFinalize,
    /// Verifying a delivered OTP.
    VerifyOtpSetup,
    /// Verifying an authenticator.
    VerifyTotpSetup,
}

/// Serializable snapshot of a signup flow state.
pub type SignupRecord = EnrolRecord<SignupStage>;

/// Enrol-more-or-conclude, instantiated for signup.
pub type NewMfaOrFinalize = NewMfaOrFinish<SignupFlow>;

/// A signup state reconstituted from a serialized record.
pub enum ResumedSignup {
    /// Back at password selection.
    Password(SetPassword),
    /// Back at first-method enrolment.
    SetupFirstMfa(SetupFirstMfa<SignupFlow>),
    /// Back at enrol-more-or-conclude.
    SetupMfaOrFinalize(NewMfaOrFinish<SignupFlow>),
    /// Back at delivered-OTP verification.
    VerifyOtpSetup(VerifyOtpSetup<SignupFlow>),
    /// Back at authenticator verification (bare sub-shape, no URI).
    VerifyTotpSetup(VerifyTotpSetup<SignupFlow>),
}
