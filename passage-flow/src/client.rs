//! The top-level client handle.
//!
//! A [`Passage`] is stateless apart from its transport: it hands out ingress
//! states for the six flows, reconstitutes serialized states, and exposes
//! the token endpoints (`check_token`, `revoke_tokens`) and the health
//! probe. It is cheap to clone and safe to share across concurrently
//! progressing flows; the individual state values are not.

use crate::delete::{ConfirmDeletion, ConfirmPassword, DeleteRecord, DeleteStage, DeleteUser, ResumedDelete};
use crate::login::{
    InitMfa, Login, LoginRecord, LoginStage, ResumedLogin, RetryInitMfa, VerifyMfa, VerifyTotp,
};
use crate::migrate::{MigrateLogin, MigrateRecord, MigrateStage, ResumedMigrateLogin};
use crate::setup::{NewMfaOrFinish, SetupFirstMfa, VerifyOtpSetup, VerifyTotpSetup};
use crate::signup::{ResumedSignup, SetPassword, Signup, SignupRecord, SignupStage};
use crate::ticket::{
    CompleteRecovery, ResetPassword, ResumedTicket, SetupMfa, TicketRecord, TicketStage, Tickets,
    VerifiedTicket,
};
use crate::update_mfa::{
    CheckOtp, CheckTotp, Decide, EnsureOtpSetup, EnsureTotpSetup, FinalizeRemoval, FinalizeUpdate,
    ResumedUpdateMfa, StartUpdate, UpdateMfa, UpdateMfaRecord, UpdateMfaStage,
};
use crate::{decode_token, FlowCore};
use passage_core::envelope::{interpret_status, two_slot, Permit};
use passage_core::transport::{Dispatch, HttpTransport, Route, TransportError};
use passage_core::{Base64Error, FutResult, RequestError};
use passage_token::{PeekedToken, SessionToken};
use serde::Deserialize;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// A token check was refused. Deliberately detail-free: the endpoint is
/// reachable by unauthenticated callers, and the reason for a rejection is
/// nobody's business but the provider's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opaque;

/// A serialized state record could not be reconstituted.
#[derive(Debug, Error)]
pub enum ResumeError {
    /// The record is not valid JSON, or its shape is wrong.
    #[error("malformed state record: {0}")]
    Json(#[from] serde_json::Error),
    /// The record's stage requires a field it does not carry.
    #[error("state record is missing required field `{0}`")]
    MissingField(&'static str),
    /// The record carries a token that is not valid wire-form Base64.
    #[error("state record carries a malformed token")]
    Token(#[from] Base64Error),
}

#[derive(Deserialize)]
struct PeekRet {
    peeked: Option<PeekedToken>,
    denied: Option<bool>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RevokeRet {
    revoked: Option<bool>,
    token: Option<String>,
}

/// Process-wide handle bound to one identity provider.
#[derive(Clone)]
pub struct Passage {
    transport: Arc<dyn Dispatch>,
}

impl Passage {
    /// Connect to `https://host:port` with the default transport.
    pub fn connect(host: &str, port: u16) -> Result<Self, TransportError> {
        Ok(Passage {
            transport: Arc::new(HttpTransport::new(host, port)?),
        })
    }

    /// Start configuring a client.
    pub fn builder() -> PassageBuilder {
        PassageBuilder::default()
    }

    /// Bring your own dispatcher.
    pub fn with_transport(transport: Arc<dyn Dispatch>) -> Self {
        Passage { transport }
    }

    /// The login flow.
    pub fn login(&self) -> Login {
        Login {
            transport: self.transport.clone(),
        }
    }

    /// The signup flow.
    pub fn signup(&self) -> Signup {
        Signup {
            transport: self.transport.clone(),
        }
    }

    /// The legacy-account migration flow.
    pub fn migrate_login(&self) -> MigrateLogin {
        MigrateLogin {
            transport: self.transport.clone(),
        }
    }

    /// The account-deletion flow.
    pub fn delete_user(&self) -> DeleteUser {
        DeleteUser {
            transport: self.transport.clone(),
        }
    }

    /// The MFA-update flow.
    pub fn update_mfa(&self) -> UpdateMfa {
        UpdateMfa {
            transport: self.transport.clone(),
        }
    }

    /// Ticket issuance and redemption.
    pub fn ticket(&self) -> Tickets {
        Tickets {
            transport: self.transport.clone(),
        }
    }

    /// Verify-and-rotate ("peek") a session token. The passed token is dead
    /// afterwards; on success the replacement rides in the
    /// [`PeekedToken`].
    pub fn check_token(&self, token: SessionToken) -> FutResult<'static, PeekedToken, Opaque> {
        let transport = self.transport.clone();
        FutResult::new(async move {
            let raw = transport
                .dispatch(Route::Refresh, token.into_encoded())
                .await?;
            interpret_status(raw.status)?;
            let ret: PeekRet = serde_json::from_str(&raw.body)?;
            match two_slot(ret.peeked, ret.denied)? {
                Ok(peeked) => Ok(Ok(peeked)),
                Err(_) => Ok(Err(Opaque)),
            }
        })
    }

    /// Revoke every session of the token's account. On success no token
    /// comes back, since no session is left to speak for. On failure the
    /// provider may supply a replacement token, which must be used for any
    /// retry.
    pub fn revoke_tokens(
        &self,
        token: SessionToken,
    ) -> FutResult<'static, (), Option<SessionToken>> {
        let transport = self.transport.clone();
        FutResult::new(async move {
            let raw = transport
                .dispatch(Route::Revoke, token.into_encoded())
                .await?;
            interpret_status(raw.status)?;
            let ret: RevokeRet = if raw.body.is_empty() {
                RevokeRet::default()
            } else {
                serde_json::from_str(&raw.body)?
            };
            match (ret.revoked, ret.token) {
                (Some(_), None) => Ok(Ok(())),
                (None, Some(encoded)) => Ok(Err(Some(decode_token(&encoded)?))),
                (None, None) => Ok(Err(None)),
                (Some(_), Some(_)) => Err(RequestError::Deserialization),
            }
        })
    }

    /// Probe the provider's health endpoint, bounded by `timeout_secs`.
    pub async fn is_healthy(&self, timeout_secs: u64) -> bool {
        let probe = self
            .transport
            .dispatch_timeout(
                Route::Health,
                String::new(),
                Duration::from_secs(timeout_secs),
            )
            .await;
        match probe {
            Ok(raw) => raw.status == 200,
            Err(error) => {
                log::debug!("health probe failed: {error}");
                false
            }
        }
    }

    fn core(&self, permit: Permit) -> FlowCore {
        FlowCore::new(self.transport.clone(), permit)
    }

    /// Reconstitute a login state from its record.
    pub fn resume_login(&self, record: LoginRecord) -> Result<ResumedLogin, ResumeError> {
        let core = self.core(record.permit);
        Ok(match record.stage {
            LoginStage::InitMfa => ResumedLogin::InitMfa(InitMfa {
                core,
                available: record.available_mfa,
            }),
            LoginStage::RetryInitMfa => ResumedLogin::RetryInitMfa(RetryInitMfa {
                core,
                available: record.available_mfa,
            }),
            LoginStage::VerifyOtp => {
                let kind = record.kind.ok_or(ResumeError::MissingField("kind"))?;
                ResumedLogin::VerifyOtp(VerifyMfa {
                    core,
                    kind,
                    available: record.available_mfa,
                })
            }
            LoginStage::VerifyTotp => ResumedLogin::VerifyTotp(VerifyTotp {
                core,
                available: record.available_mfa,
            }),
        })
    }

    /// Reconstitute a login state from its JSON form.
    pub fn resume_login_str(&self, json: &str) -> Result<ResumedLogin, ResumeError> {
        self.resume_login(serde_json::from_str(json)?)
    }

    /// Reconstitute a signup state from its record.
    pub fn resume_signup(&self, record: SignupRecord) -> Result<ResumedSignup, ResumeError> {
        let core = self.core(record.permit);
        Ok(match record.stage {
            SignupStage::Password => ResumedSignup::Password(SetPassword { core }),
            SignupStage::SetupFirstMfa => {
                ResumedSignup::SetupFirstMfa(SetupFirstMfa::new(core))
            }
            SignupStage::SetupMfaOrFinalize => ResumedSignup::SetupMfaOrFinalize(NewMfaOrFinish {
                core,
                already: record.already_setup,
                _flow: PhantomData,
            }),
            SignupStage::VerifyOtpSetup => {
                let current = record
                    .current_mfa
                    .ok_or(ResumeError::MissingField("current_mfa"))?;
                ResumedSignup::VerifyOtpSetup(VerifyOtpSetup {
                    core,
                    already: record.already_setup,
                    current,
                    _flow: PhantomData,
                })
            }
            SignupStage::VerifyTotpSetup => ResumedSignup::VerifyTotpSetup(VerifyTotpSetup {
                core,
                already: record.already_setup,
                uri: None,
                _flow: PhantomData,
            }),
        })
    }

    /// Reconstitute a signup state from its JSON form.
    pub fn resume_signup_str(&self, json: &str) -> Result<ResumedSignup, ResumeError> {
        self.resume_signup(serde_json::from_str(json)?)
    }

    /// Reconstitute a migration state from its record.
    pub fn resume_migrate_login(
        &self,
        record: MigrateRecord,
    ) -> Result<ResumedMigrateLogin, ResumeError> {
        let core = self.core(record.permit);
        Ok(match record.stage {
            MigrateStage::SetupFirstMfa => {
                ResumedMigrateLogin::SetupFirstMfa(SetupFirstMfa::new(core))
            }
            MigrateStage::NewMfaOrLogin => ResumedMigrateLogin::NewMfaOrLogin(NewMfaOrFinish {
                core,
                already: record.already_setup,
                _flow: PhantomData,
            }),
            MigrateStage::VerifyOtpSetup => {
                let current = record
                    .current_mfa
                    .ok_or(ResumeError::MissingField("current_mfa"))?;
                ResumedMigrateLogin::VerifyOtpSetup(VerifyOtpSetup {
                    core,
                    already: record.already_setup,
                    current,
                    _flow: PhantomData,
                })
            }
            MigrateStage::VerifyTotpSetup => {
                ResumedMigrateLogin::VerifyTotpSetup(VerifyTotpSetup {
                    core,
                    already: record.already_setup,
                    uri: None,
                    _flow: PhantomData,
                })
            }
        })
    }

    /// Reconstitute a migration state from its JSON form.
    pub fn resume_migrate_login_str(&self, json: &str) -> Result<ResumedMigrateLogin, ResumeError> {
        self.resume_migrate_login(serde_json::from_str(json)?)
    }

    /// Reconstitute a deletion state from its record.
    pub fn resume_delete(&self, record: DeleteRecord) -> Result<ResumedDelete, ResumeError> {
        let token = SessionToken::from_encoded(&record.token)?;
        let core = self.core(record.permit);
        Ok(match record.stage {
            DeleteStage::ConfirmPassword => {
                ResumedDelete::ConfirmPassword(ConfirmPassword { core, token })
            }
            DeleteStage::ConfirmDeletion => {
                ResumedDelete::ConfirmDeletion(ConfirmDeletion { core, token })
            }
        })
    }

    /// Reconstitute a deletion state from its JSON form.
    pub fn resume_delete_str(&self, json: &str) -> Result<ResumedDelete, ResumeError> {
        self.resume_delete(serde_json::from_str(json)?)
    }

    /// Reconstitute an MFA-update state from its record.
    pub fn resume_update_mfa(
        &self,
        record: UpdateMfaRecord,
    ) -> Result<ResumedUpdateMfa, ResumeError> {
        let core = self.core(record.permit);
        let old = record.old_mfa;
        Ok(match record.stage {
            UpdateMfaStage::StartUpdate => {
                ResumedUpdateMfa::StartUpdate(StartUpdate { core, old })
            }
            UpdateMfaStage::CheckOtp => {
                let kind = record.kind.ok_or(ResumeError::MissingField("kind"))?;
                ResumedUpdateMfa::CheckOtp(CheckOtp { core, old, kind })
            }
            UpdateMfaStage::CheckTotp => ResumedUpdateMfa::CheckTotp(CheckTotp { core, old }),
            UpdateMfaStage::Decide => ResumedUpdateMfa::Decide(Decide { core, old }),
            UpdateMfaStage::FinalizeRemoval => {
                ResumedUpdateMfa::FinalizeRemoval(FinalizeRemoval { core, old })
            }
            UpdateMfaStage::EnsureOtpSetup => {
                let kind = record.kind.ok_or(ResumeError::MissingField("kind"))?;
                ResumedUpdateMfa::EnsureOtpSetup(EnsureOtpSetup { core, old, kind })
            }
            UpdateMfaStage::EnsureTotpSetup => {
                ResumedUpdateMfa::EnsureTotpSetup(EnsureTotpSetup {
                    core,
                    old,
                    uri: None,
                })
            }
            UpdateMfaStage::FinalizeUpdate => {
                ResumedUpdateMfa::FinalizeUpdate(FinalizeUpdate { core, old })
            }
        })
    }

    /// Reconstitute an MFA-update state from its JSON form.
    pub fn resume_update_mfa_str(&self, json: &str) -> Result<ResumedUpdateMfa, ResumeError> {
        self.resume_update_mfa(serde_json::from_str(json)?)
    }

    /// Reconstitute a recovery state from its record.
    pub fn resume_ticket(&self, record: TicketRecord) -> Result<ResumedTicket, ResumeError> {
        let core = self.core(record.permit);
        let operation = record.operation;
        Ok(match record.stage {
            TicketStage::VerifiedTicket => {
                ResumedTicket::VerifiedTicket(VerifiedTicket { core, operation })
            }
            TicketStage::ResetPassword => {
                ResumedTicket::ResetPassword(ResetPassword { core, operation })
            }
            TicketStage::SetupMfa => ResumedTicket::SetupMfa(SetupMfa { core, operation }),
            TicketStage::CompleteRecovery => {
                ResumedTicket::CompleteRecovery(CompleteRecovery { core, operation })
            }
        })
    }

    /// Reconstitute a recovery state from its JSON form.
    pub fn resume_ticket_str(&self, json: &str) -> Result<ResumedTicket, ResumeError> {
        self.resume_ticket(serde_json::from_str(json)?)
    }
}

/// Builder for a [`Passage`] client.
pub struct PassageBuilder {
    host: String,
    port: u16,
    base: Option<Url>,
    timeout: Option<Duration>,
}

impl Default for PassageBuilder {
    fn default() -> Self {
        PassageBuilder {
            host: "localhost".into(),
            port: 443,
            base: None,
            timeout: None,
        }
    }
}

impl PassageBuilder {
    /// Set the provider host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the provider port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Point at a full base URL instead of `https://host:port`. Useful for
    /// plain-HTTP targets in tests and local development.
    pub fn base_url(mut self, base: Url) -> Self {
        self.base = Some(base);
        self
    }

    /// Cap every request at `timeout`. The health probe's caller-supplied
    /// deadline overrides this.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<Passage, TransportError> {
        let client = match self.timeout {
            Some(timeout) => reqwest::Client::builder().timeout(timeout).build()?,
            None => reqwest::Client::new(),
        };
        let base = match self.base {
            Some(base) => base,
            None => Url::parse(&format!("https://{}:{}/", self.host, self.port))?,
        };
        Ok(Passage {
            transport: Arc::new(HttpTransport::with_client(client, base)),
        })
    }
}
