//! The legacy-account migration flow.
//!
//! Same topology as signup minus the password step: the legacy password is
//! verified at ingress, and the walk ends in [`NewMfaOrLogin`] issuing a
//! session token. Accounts that already have MFA configured are refused
//! with [`LoginError::WrongFlow`] and must use the normal login.

use crate::login::LoginError;
use crate::setup::{EnrolFlow, EnrolRecord, NewMfaOrFinish, SetupFirstMfa, VerifyOtpSetup, VerifyTotpSetup};
use crate::{ingress, require_permit, FlowCore};
use passage_core::transport::{Dispatch, Route};
use passage_core::{FutResult, Password};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum MigrateArgs<'a> {
    HelloLogin { username: &'a str, password: &'a str },
}

#[derive(Deserialize)]
struct HelloRet {
    failure: Option<LoginError>,
}

/// Ingress of the migration flow; obtained from
/// [`Passage::migrate_login`](crate::Passage::migrate_login).
pub struct MigrateLogin {
    pub(crate) transport: Arc<dyn Dispatch>,
}

impl MigrateLogin {
    /// Verify the legacy password and begin MFA enrolment.
    pub fn start(
        self,
        username: impl Into<String>,
        password: &Password,
    ) -> FutResult<'static, SetupFirstMfa<MigrateFlow>, LoginError> {
        let username = username.into();
        let password = password.clone();
        FutResult::new(async move {
            let args = MigrateArgs::HelloLogin {
                username: &username,
                password: password.expose(),
            };
            let (ret, permit): (HelloRet, _) =
                ingress(&self.transport, Route::MigrateLogin, &args, None).await?;
            match ret.failure {
                None => Ok(Ok(SetupFirstMfa::new(FlowCore::new(
                    self.transport,
                    require_permit(permit)?,
                )))),
                Some(failure) => Ok(Err(failure)),
            }
        })
    }
}

/// Marker instantiating the shared enrolment states for migration.
pub enum MigrateFlow {}

impl EnrolFlow for MigrateFlow {
    const ROUTE: Route = Route::MigrateLogin;
    type Stage = MigrateStage;
    const FIRST_MFA: MigrateStage = MigrateStage::SetupFirstMfa;
    const MFA_OR_FINISH: MigrateStage = MigrateStage::NewMfaOrLogin;
    const VERIFY_OTP: MigrateStage = MigrateStage::VerifyOtpSetup;
    const VERIFY_TOTP: MigrateStage = MigrateStage::VerifyTotpSetup;
}

/// Stage tags of the migration flow's serialized records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrateStage {
    /// Enrolling the first MFA method.
    SetupFirstMfa,
    /// Enrolling further methods, or logging in.
    NewMfaOrLogin,
    /// Verifying a delivered OTP.
    VerifyOtpSetup,
    /// Verifying an authenticator.
    VerifyTotpSetup,
}

/// Serializable snapshot of a migration flow state.
pub type MigrateRecord = EnrolRecord<MigrateStage>;

/// Enrol-more-or-log-in, instantiated for migration. `finish` issues the
/// migrated account's first session token.
pub type NewMfaOrLogin = NewMfaOrFinish<MigrateFlow>;

/// A migration state reconstituted from a serialized record.
pub enum ResumedMigrateLogin {
    /// Back at first-method enrolment.
    SetupFirstMfa(SetupFirstMfa<MigrateFlow>),
    /// Back at enrol-more-or-log-in.
    NewMfaOrLogin(NewMfaOrFinish<MigrateFlow>),
    /// Back at delivered-OTP verification.
    VerifyOtpSetup(VerifyOtpSetup<MigrateFlow>),
    /// Back at authenticator verification (bare sub-shape, no URI).
    VerifyTotpSetup(VerifyTotpSetup<MigrateFlow>),
}
