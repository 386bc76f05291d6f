//! The login flow.
//!
//! ```text
//! start ── InitMfa ──┬─ sms/email ─ VerifyMfa ──┬─ guess ok ─ SessionToken
//!                    └─ totp ────── VerifyTotp ─┘     │
//!                            RetryInitMfa ◄───────────┘ guess wrong
//! ```
//!
//! A wrong guess is not a dead end: the provider issues a fresh permit and
//! the flow returns to MFA selection under the distinct `RetryInitMfa` stage
//! tag, so servers can apply a different policy to retries.

use crate::{decode_token, ingress, require_permit, Empty, FlowCore, Snapshot};
use passage_core::envelope::{two_slot, Permit};
use passage_core::transport::{Dispatch, Route};
use passage_core::{FutResult, MfaKind, Password, RequestError, SimpleOtp, Totp};
use passage_token::SessionToken;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Expected ways a login attempt can be refused at ingress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Error)]
pub enum LoginError {
    /// No account under that username.
    #[error("username not found")]
    UsernameNotFound,
    /// The password did not match.
    #[error("incorrect password")]
    IncorrectPassword,
    /// The account's MFA configuration cannot serve this flow.
    #[error("illegal MFA kinds for this account")]
    IllegalMfaKinds,
    /// The account must use a different flow (e.g. it has no MFA configured
    /// yet and should migrate).
    #[error("wrong flow for this account")]
    WrongFlow,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum LoginArgs<'a> {
    HelloLogin { username: &'a str, password: &'a str },
    InitMfa { kind: MfaKind },
    RetryInitMfa { kind: MfaKind },
    VerifyOtp { guess: &'a str },
    VerifyTotp { guess: &'a str },
}

#[derive(Deserialize)]
struct HelloRet {
    hello_login: Option<Vec<MfaKind>>,
    failure: Option<LoginError>,
}

#[derive(Deserialize)]
struct GuessRet {
    token: Option<String>,
    maybe_retry: Option<bool>,
}

/// Ingress of the login flow; obtained from [`Passage::login`](crate::Passage::login).
pub struct Login {
    pub(crate) transport: Arc<dyn Dispatch>,
}

impl Login {
    /// Present the first factor. On success the provider reports which MFA
    /// kinds the account can be challenged with.
    pub fn start(
        self,
        username: impl Into<String>,
        password: &Password,
    ) -> FutResult<'static, InitMfa, LoginError> {
        let username = username.into();
        let password = password.clone();
        FutResult::new(async move {
            let args = LoginArgs::HelloLogin {
                username: &username,
                password: password.expose(),
            };
            let (ret, permit): (HelloRet, _) =
                ingress(&self.transport, Route::Login, &args, None).await?;
            match two_slot(ret.hello_login, ret.failure)? {
                Ok(available) => Ok(Ok(InitMfa {
                    core: FlowCore::new(self.transport, require_permit(permit)?),
                    available,
                })),
                Err(failure) => Ok(Err(failure)),
            }
        })
    }
}

async fn request_kind(
    core: &FlowCore,
    kind: MfaKind,
    retry: bool,
) -> Result<Option<Permit>, RequestError> {
    let args = if retry {
        LoginArgs::RetryInitMfa { kind }
    } else {
        LoginArgs::InitMfa { kind }
    };
    let (Empty {}, permit) = core.exchange(Route::Login, &args).await?;
    Ok(permit)
}

/// First MFA selection after a successful password check.
///
/// Selecting a kind the account does not have is refused locally, returning
/// the state unchanged so another kind can be tried without a round-trip.
pub struct InitMfa {
    pub(crate) core: FlowCore,
    pub(crate) available: Vec<MfaKind>,
}

impl InitMfa {
    /// The complete set of kinds the provider reported for this account.
    pub fn available(&self) -> &[MfaKind] {
        &self.available
    }

    /// Request an OTP over SMS.
    pub fn sms(self) -> FutResult<'static, VerifyMfa, InitMfa> {
        if !self.available.contains(&MfaKind::Sms) {
            return FutResult::err(self);
        }
        FutResult::new(async move {
            let permit = request_kind(&self.core, MfaKind::Sms, false).await?;
            Ok(Ok(VerifyMfa {
                core: self.core.advance(permit)?,
                kind: MfaKind::Sms,
                available: self.available,
            }))
        })
    }

    /// Request an OTP over email.
    pub fn email(self) -> FutResult<'static, VerifyMfa, InitMfa> {
        if !self.available.contains(&MfaKind::Email) {
            return FutResult::err(self);
        }
        FutResult::new(async move {
            let permit = request_kind(&self.core, MfaKind::Email, false).await?;
            Ok(Ok(VerifyMfa {
                core: self.core.advance(permit)?,
                kind: MfaKind::Email,
                available: self.available,
            }))
        })
    }

    /// Answer with the authenticator app instead.
    pub fn totp(self) -> FutResult<'static, VerifyTotp, InitMfa> {
        if !self.available.contains(&MfaKind::Totp) {
            return FutResult::err(self);
        }
        FutResult::new(async move {
            let permit = request_kind(&self.core, MfaKind::Totp, false).await?;
            Ok(Ok(VerifyTotp {
                core: self.core.advance(permit)?,
                available: self.available,
            }))
        })
    }
}

/// MFA selection after a failed verification. Same surface as [`InitMfa`],
/// distinct stage tag so the provider can enforce a different policy.
pub struct RetryInitMfa {
    pub(crate) core: FlowCore,
    pub(crate) available: Vec<MfaKind>,
}

impl RetryInitMfa {
    /// The complete set of kinds the provider reported for this account.
    pub fn available(&self) -> &[MfaKind] {
        &self.available
    }

    /// Request an OTP over SMS.
    pub fn sms(self) -> FutResult<'static, VerifyMfa, RetryInitMfa> {
        if !self.available.contains(&MfaKind::Sms) {
            return FutResult::err(self);
        }
        FutResult::new(async move {
            let permit = request_kind(&self.core, MfaKind::Sms, true).await?;
            Ok(Ok(VerifyMfa {
                core: self.core.advance(permit)?,
                kind: MfaKind::Sms,
                available: self.available,
            }))
        })
    }

    /// Request an OTP over email.
    pub fn email(self) -> FutResult<'static, VerifyMfa, RetryInitMfa> {
        if !self.available.contains(&MfaKind::Email) {
            return FutResult::err(self);
        }
        FutResult::new(async move {
            let permit = request_kind(&self.core, MfaKind::Email, true).await?;
            Ok(Ok(VerifyMfa {
                core: self.core.advance(permit)?,
                kind: MfaKind::Email,
                available: self.available,
            }))
        })
    }

    /// Answer with the authenticator app instead.
    pub fn totp(self) -> FutResult<'static, VerifyTotp, RetryInitMfa> {
        if !self.available.contains(&MfaKind::Totp) {
            return FutResult::err(self);
        }
        FutResult::new(async move {
            let permit = request_kind(&self.core, MfaKind::Totp, true).await?;
            Ok(Ok(VerifyTotp {
                core: self.core.advance(permit)?,
                available: self.available,
            }))
        })
    }
}

/// Waiting for the user to relay the OTP that was delivered to them.
pub struct VerifyMfa {
    pub(crate) core: FlowCore,
    pub(crate) kind: MfaKind,
    pub(crate) available: Vec<MfaKind>,
}

impl VerifyMfa {
    /// Which delivery channel was chosen.
    pub fn kind(&self) -> MfaKind {
        self.kind
    }

    /// Present the delivered passcode. A wrong guess returns the flow to
    /// MFA selection under a fresh permit.
    pub fn guess(self, otp: SimpleOtp) -> FutResult<'static, SessionToken, RetryInitMfa> {
        FutResult::new(async move {
            let args = LoginArgs::VerifyOtp {
                guess: otp.as_str(),
            };
            let (ret, permit): (GuessRet, _) = self.core.exchange(Route::Login, &args).await?;
            match two_slot(ret.token, ret.maybe_retry)? {
                Ok(token) => Ok(Ok(decode_token(&token)?)),
                Err(_) => {
                    log::debug!("otp verification rejected; returning to mfa selection");
                    Ok(Err(RetryInitMfa {
                        core: self.core.advance(permit)?,
                        available: self.available,
                    }))
                }
            }
        })
    }
}

/// Waiting for the user to read a code off their authenticator app.
pub struct VerifyTotp {
    pub(crate) core: FlowCore,
    pub(crate) available: Vec<MfaKind>,
}

impl VerifyTotp {
    /// Present the authenticator code. A wrong guess returns the flow to
    /// MFA selection under a fresh permit.
    pub fn guess(self, code: Totp) -> FutResult<'static, SessionToken, RetryInitMfa> {
        FutResult::new(async move {
            let args = LoginArgs::VerifyTotp {
                guess: code.as_str(),
            };
            let (ret, permit): (GuessRet, _) = self.core.exchange(Route::Login, &args).await?;
            match two_slot(ret.token, ret.maybe_retry)? {
                Ok(token) => Ok(Ok(decode_token(&token)?)),
                Err(_) => {
                    log::debug!("totp verification rejected; returning to mfa selection");
                    Ok(Err(RetryInitMfa {
                        core: self.core.advance(permit)?,
                        available: self.available,
                    }))
                }
            }
        })
    }
}

/// Stage tags of the login flow's serialized records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoginStage {
    /// First MFA selection.
    InitMfa,
    /// MFA selection after a failed verification.
    RetryInitMfa,
    /// Awaiting a delivered OTP.
    VerifyOtp,
    /// Awaiting an authenticator code.
    VerifyTotp,
}

/// Serializable snapshot of a login flow state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRecord {
    /// Which state the record reconstitutes into.
    pub stage: LoginStage,
    /// The permit gating the next transition.
    pub permit: Permit,
    /// The kinds the provider reported for the account.
    pub available_mfa: Vec<MfaKind>,
    /// The chosen delivery channel; populated only at [`LoginStage::VerifyOtp`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MfaKind>,
}

impl Snapshot for InitMfa {
    type Record = LoginRecord;

    fn record(&self) -> LoginRecord {
        LoginRecord {
            stage: LoginStage::InitMfa,
            permit: self.core.permit.clone(),
            available_mfa: self.available.clone(),
            kind: None,
        }
    }
}

impl Snapshot for RetryInitMfa {
    type Record = LoginRecord;

    fn record(&self) -> LoginRecord {
        LoginRecord {
            stage: LoginStage::RetryInitMfa,
            permit: self.core.permit.clone(),
            available_mfa: self.available.clone(),
            kind: None,
        }
    }
}

impl Snapshot for VerifyMfa {
    type Record = LoginRecord;

    fn record(&self) -> LoginRecord {
        LoginRecord {
            stage: LoginStage::VerifyOtp,
            permit: self.core.permit.clone(),
            available_mfa: self.available.clone(),
            kind: Some(self.kind),
        }
    }
}

impl Snapshot for VerifyTotp {
    type Record = LoginRecord;

    fn record(&self) -> LoginRecord {
        LoginRecord {
            stage: LoginStage::VerifyTotp,
            permit: self.core.permit.clone(),
            available_mfa: self.available.clone(),
            kind: None,
        }
    }
}

/// A login state reconstituted from a serialized record.
pub enum ResumedLogin {
    /// Back at first MFA selection.
    InitMfa(InitMfa),
    /// Back at post-failure MFA selection.
    RetryInitMfa(RetryInitMfa),
    /// Back at OTP verification.
    VerifyOtp(VerifyMfa),
    /// Back at authenticator verification.
    VerifyTotp(VerifyTotp),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_serialize_to_the_wire_shapes() {
        assert_eq!(
            serde_json::to_string(&LoginArgs::HelloLogin {
                username: "bob123",
                password: "pw"
            })
            .unwrap(),
            r#"{"hello_login":{"username":"bob123","password":"pw"}}"#
        );
        assert_eq!(
            serde_json::to_string(&LoginArgs::InitMfa {
                kind: MfaKind::Totp
            })
            .unwrap(),
            r#"{"init_mfa":{"kind":"Totp"}}"#
        );
        assert_eq!(
            serde_json::to_string(&LoginArgs::RetryInitMfa {
                kind: MfaKind::Sms
            })
            .unwrap(),
            r#"{"retry_init_mfa":{"kind":"Sms"}}"#
        );
    }

    #[test]
    fn hello_failures_decode_from_their_wire_names() {
        let ret: HelloRet =
            serde_json::from_str(r#"{"failure":"UsernameNotFound"}"#).unwrap();
        assert_eq!(ret.failure, Some(LoginError::UsernameNotFound));
        let ret: HelloRet = serde_json::from_str(r#"{"hello_login":["Totp","Sms"]}"#).unwrap();
        assert_eq!(ret.hello_login, Some(vec![MfaKind::Totp, MfaKind::Sms]));
    }

    #[test]
    fn records_only_carry_kind_at_verify_otp() {
        let record = LoginRecord {
            stage: LoginStage::VerifyTotp,
            permit: Permit::new("p"),
            available_mfa: vec![MfaKind::Totp],
            kind: None,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("kind"));
        let back: LoginRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.stage, LoginStage::VerifyTotp);
    }
}
