//! MFA enrolment, shared by the signup and migrate-login flows.
//!
//! Both flows walk the same surface against different routes and stage
//! tags: enrol a first method, verify the user controls it, optionally
//! enrol more, then conclude for a session token. The states here are generic over
//! an [`EnrolFlow`] marker that supplies those per-flow constants, so each
//! flow instantiates the machinery instead of inheriting it.

use crate::{decode_token, Empty, FlowCore, NewMfa, Snapshot};
use passage_core::envelope::{ok_slot, Permit};
use passage_core::transport::Route;
use passage_core::{FutResult, MfaKind, SimpleOtp, Totp};
use passage_token::SessionToken;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::marker::PhantomData;

/// Per-flow constants for the shared enrolment states.
pub trait EnrolFlow: Send + Sync + 'static {
    /// Route the flow's requests are dispatched on.
    const ROUTE: Route;

    /// Stage-tag type of the flow's serialized records.
    type Stage: Copy + Serialize + DeserializeOwned + Send;

    /// Tag for the first-method state.
    const FIRST_MFA: Self::Stage;
    /// Tag for the enrol-more-or-conclude state.
    const MFA_OR_FINISH: Self::Stage;
    /// Tag for delivered-OTP verification.
    const VERIFY_OTP: Self::Stage;
    /// Tag for authenticator verification.
    const VERIFY_TOTP: Self::Stage;
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum EnrolArgs<'a> {
    SetupFirstMfa { kind: NewMfa<'a> },
    SetupMfa { kind: NewMfa<'a> },
    VerifySimpleOtp { guess: &'a str },
    VerifyTotp { guess: &'a str },
    Finalize {},
}

#[derive(Deserialize)]
struct TotpSetupRet {
    setup_totp: Option<String>,
}

#[derive(Deserialize)]
struct VerifySimpleRet {
    maybe_retry_simple: Option<bool>,
}

#[derive(Deserialize)]
struct VerifyTotpRet {
    maybe_retry_totp: Option<bool>,
}

#[derive(Deserialize)]
struct FinishRet {
    token: Option<String>,
}

/// Enrolment of the account's first MFA method; nothing is configured yet.
pub struct SetupFirstMfa<F: EnrolFlow> {
    pub(crate) core: FlowCore,
    pub(crate) _flow: PhantomData<F>,
}

impl<F: EnrolFlow> SetupFirstMfa<F> {
    pub(crate) fn new(core: FlowCore) -> Self {
        SetupFirstMfa {
            core,
            _flow: PhantomData,
        }
    }

    /// Enrol an authenticator app. The success payload carries the
    /// provisioning URI to render as a QR code.
    pub fn totp(self) -> FutResult<'static, VerifyTotpSetup<F>, Infallible> {
        FutResult::new(async move {
            let args = EnrolArgs::SetupFirstMfa {
                kind: NewMfa::Totp(()),
            };
            let (ret, permit): (TotpSetupRet, _) = self.core.exchange(F::ROUTE, &args).await?;
            let uri = ok_slot(ret.setup_totp)?;
            Ok(Ok(VerifyTotpSetup {
                core: self.core.advance(permit)?,
                already: Vec::new(),
                uri: Some(uri),
                _flow: PhantomData,
            }))
        })
    }

    /// Enrol a phone number for SMS delivery.
    pub fn sms(
        self,
        phone: impl Into<String>,
    ) -> FutResult<'static, VerifyOtpSetup<F>, Infallible> {
        let phone = phone.into();
        FutResult::new(async move {
            let args = EnrolArgs::SetupFirstMfa {
                kind: NewMfa::Sms(&phone),
            };
            let (Empty {}, permit) = self.core.exchange(F::ROUTE, &args).await?;
            Ok(Ok(VerifyOtpSetup {
                core: self.core.advance(permit)?,
                already: Vec::new(),
                current: MfaKind::Sms,
                _flow: PhantomData,
            }))
        })
    }

    /// Enrol an email address for OTP delivery.
    pub fn email(
        self,
        address: impl Into<String>,
    ) -> FutResult<'static, VerifyOtpSetup<F>, Infallible> {
        let address = address.into();
        FutResult::new(async move {
            let args = EnrolArgs::SetupFirstMfa {
                kind: NewMfa::Email(&address),
            };
            let (Empty {}, permit) = self.core.exchange(F::ROUTE, &args).await?;
            Ok(Ok(VerifyOtpSetup {
                core: self.core.advance(permit)?,
                already: Vec::new(),
                current: MfaKind::Email,
                _flow: PhantomData,
            }))
        })
    }
}

/// Enrol another method, or conclude the flow for a session token.
///
/// Re-selecting a kind that is already configured is refused locally,
/// returning the state unchanged.
pub struct NewMfaOrFinish<F: EnrolFlow> {
    pub(crate) core: FlowCore,
    pub(crate) already: Vec<MfaKind>,
    pub(crate) _flow: PhantomData<F>,
}

impl<F: EnrolFlow> NewMfaOrFinish<F> {
    /// The kinds enrolled so far, in enrolment order.
    pub fn already_setup(&self) -> &[MfaKind] {
        &self.already
    }

    /// Enrol an authenticator app as an additional method.
    pub fn totp(self) -> FutResult<'static, VerifyTotpSetup<F>, NewMfaOrFinish<F>> {
        if self.already.contains(&MfaKind::Totp) {
            return FutResult::err(self);
        }
        FutResult::new(async move {
            let args = EnrolArgs::SetupMfa {
                kind: NewMfa::Totp(()),
            };
            let (ret, permit): (TotpSetupRet, _) = self.core.exchange(F::ROUTE, &args).await?;
            let uri = ok_slot(ret.setup_totp)?;
            Ok(Ok(VerifyTotpSetup {
                core: self.core.advance(permit)?,
                already: self.already,
                uri: Some(uri),
                _flow: PhantomData,
            }))
        })
    }

    /// Enrol a phone number as an additional method.
    pub fn sms(self, phone: impl Into<String>) -> FutResult<'static, VerifyOtpSetup<F>, NewMfaOrFinish<F>> {
        if self.already.contains(&MfaKind::Sms) {
            return FutResult::err(self);
        }
        let phone = phone.into();
        FutResult::new(async move {
            let args = EnrolArgs::SetupMfa {
                kind: NewMfa::Sms(&phone),
            };
            let (Empty {}, permit) = self.core.exchange(F::ROUTE, &args).await?;
            Ok(Ok(VerifyOtpSetup {
                core: self.core.advance(permit)?,
                already: self.already,
                current: MfaKind::Sms,
                _flow: PhantomData,
            }))
        })
    }

    /// Enrol an email address as an additional method.
    pub fn email(
        self,
        address: impl Into<String>,
    ) -> FutResult<'static, VerifyOtpSetup<F>, NewMfaOrFinish<F>> {
        if self.already.contains(&MfaKind::Email) {
            return FutResult::err(self);
        }
        let address = address.into();
        FutResult::new(async move {
            let args = EnrolArgs::SetupMfa {
                kind: NewMfa::Email(&address),
            };
            let (Empty {}, permit) = self.core.exchange(F::ROUTE, &args).await?;
            Ok(Ok(VerifyOtpSetup {
                core: self.core.advance(permit)?,
                already: self.already,
                current: MfaKind::Email,
                _flow: PhantomData,
            }))
        })
    }

    /// Conclude the flow. The user is logged in with the returned token.
    pub fn finish(self) -> FutResult<'static, SessionToken, Infallible> {
        FutResult::new(async move {
            let (ret, _): (FinishRet, _) = self
                .core
                .exchange(F::ROUTE, &EnrolArgs::Finalize {})
                .await?;
            Ok(Ok(decode_token(&ok_slot(ret.token)?)?))
        })
    }
}

/// Confirm the user received the OTP sent to the method being enrolled.
pub struct VerifyOtpSetup<F: EnrolFlow> {
    pub(crate) core: FlowCore,
    pub(crate) already: Vec<MfaKind>,
    pub(crate) current: MfaKind,
    pub(crate) _flow: PhantomData<F>,
}

impl<F: EnrolFlow> VerifyOtpSetup<F> {
    /// The method currently being verified.
    pub fn current(&self) -> MfaKind {
        self.current
    }

    /// Present the delivered passcode. A wrong guess stays at verification
    /// under a fresh permit.
    pub fn guess(self, otp: SimpleOtp) -> FutResult<'static, NewMfaOrFinish<F>, VerifyOtpSetup<F>> {
        FutResult::new(async move {
            let args = EnrolArgs::VerifySimpleOtp {
                guess: otp.as_str(),
            };
            let (ret, permit): (VerifySimpleRet, _) = self.core.exchange(F::ROUTE, &args).await?;
            let core = self.core.advance(permit)?;
            match ret.maybe_retry_simple {
                None => {
                    let mut already = self.already;
                    already.push(self.current);
                    Ok(Ok(NewMfaOrFinish {
                        core,
                        already,
                        _flow: PhantomData,
                    }))
                }
                Some(_) => Ok(Err(VerifyOtpSetup {
                    core,
                    already: self.already,
                    current: self.current,
                    _flow: PhantomData,
                })),
            }
        })
    }
}

/// Confirm the user's authenticator accepted the TOTP secret.
///
/// The provisioning URI is present on the first attempt only; retry states
/// are the bare sub-shape, and a resumed record never carries the URI.
pub struct VerifyTotpSetup<F: EnrolFlow> {
    pub(crate) core: FlowCore,
    pub(crate) already: Vec<MfaKind>,
    pub(crate) uri: Option<String>,
    pub(crate) _flow: PhantomData<F>,
}

impl<F: EnrolFlow> VerifyTotpSetup<F> {
    /// The provisioning URI to render as a QR code, on the first attempt.
    pub fn provisioning_uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    /// Present the first code from the authenticator. A wrong guess stays at
    /// verification under a fresh permit, without the URI.
    pub fn guess(self, code: Totp) -> FutResult<'static, NewMfaOrFinish<F>, VerifyTotpSetup<F>> {
        FutResult::new(async move {
            let args = EnrolArgs::VerifyTotp {
                guess: code.as_str(),
            };
            let (ret, permit): (VerifyTotpRet, _) = self.core.exchange(F::ROUTE, &args).await?;
            let core = self.core.advance(permit)?;
            match ret.maybe_retry_totp {
                None => {
                    let mut already = self.already;
                    already.push(MfaKind::Totp);
                    Ok(Ok(NewMfaOrFinish {
                        core,
                        already,
                        _flow: PhantomData,
                    }))
                }
                Some(_) => Ok(Err(VerifyTotpSetup {
                    core,
                    already: self.already,
                    uri: None,
                    _flow: PhantomData,
                })),
            }
        })
    }
}

/// Serializable snapshot shared by the two enrolment flows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrolRecord<S> {
    /// Which state the record reconstitutes into.
    pub stage: S,
    /// The permit gating the next transition.
    pub permit: Permit,
    /// The kinds enrolled so far.
    #[serde(default = "Vec::new")]
    pub already_setup: Vec<MfaKind>,
    /// The method under verification; populated exactly at the verification
    /// stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_mfa: Option<MfaKind>,
}

impl<F: EnrolFlow> Snapshot for SetupFirstMfa<F> {
    type Record = EnrolRecord<F::Stage>;

    fn record(&self) -> Self::Record {
        EnrolRecord {
            stage: F::FIRST_MFA,
            permit: self.core.permit.clone(),
            already_setup: Vec::new(),
            current_mfa: None,
        }
    }
}

impl<F: EnrolFlow> Snapshot for NewMfaOrFinish<F> {
    type Record = EnrolRecord<F::Stage>;

    fn record(&self) -> Self::Record {
        EnrolRecord {
            stage: F::MFA_OR_FINISH,
            permit: self.core.permit.clone(),
            already_setup: self.already.clone(),
            current_mfa: None,
        }
    }
}

impl<F: EnrolFlow> Snapshot for VerifyOtpSetup<F> {
    type Record = EnrolRecord<F::Stage>;

    fn record(&self) -> Self::Record {
        EnrolRecord {
            stage: F::VERIFY_OTP,
            permit: self.core.permit.clone(),
            already_setup: self.already.clone(),
            current_mfa: Some(self.current),
        }
    }
}

impl<F: EnrolFlow> Snapshot for VerifyTotpSetup<F> {
    type Record = EnrolRecord<F::Stage>;

    fn record(&self) -> Self::Record {
        EnrolRecord {
            stage: F::VERIFY_TOTP,
            permit: self.core.permit.clone(),
            already_setup: self.already.clone(),
            current_mfa: Some(MfaKind::Totp),
        }
    }
}
