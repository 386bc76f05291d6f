//! The account-deletion flow.
//!
//! `ask` opens the flow, `ConfirmPassword` re-authenticates, and
//! `ConfirmDeletion` schedules the deletion (deferred by provider policy).
//! Every step consumes the session token and rotates it: on success the new
//! token rides inside the next state, on an expected failure it rides in
//! [`DeleteError`], so a mistake on the deletion path never logs the user
//! out. The error is must-use for exactly that reason.

use crate::{decode_token, ingress, require_permit, FlowCore, Snapshot};
use passage_core::envelope::{two_slot, Permit};
use passage_core::transport::{Dispatch, Route};
use passage_core::{FutResult, Password};
use passage_token::SessionToken;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Why a deletion step was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteFailure {
    /// The supplied username does not match the token's account.
    InvalidUsername,
    /// The password re-check failed.
    IncorrectPassword,
    /// The provider declined to schedule the deletion.
    Rejected,
}

impl fmt::Display for DeleteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeleteFailure::InvalidUsername => "invalid username",
            DeleteFailure::IncorrectPassword => "incorrect password",
            DeleteFailure::Rejected => "deletion rejected",
        })
    }
}

/// A refused deletion step. Carries the replacement session token; the user
/// is still logged in and the token must be used for whatever comes next.
#[must_use = "carries the replacement session token; dropping it unobserved ends the session"]
#[derive(Debug, Error)]
#[error("account deletion refused: {reason}")]
pub struct DeleteError {
    /// What the provider objected to.
    pub reason: DeleteFailure,
    /// The rotated session token.
    pub token: SessionToken,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum DeleteArgs<'a> {
    AskDelete { token: &'a str, username: &'a str },
    ConfirmPassword { guess: &'a str, token: &'a str },
    ConfirmDeletion { token: &'a str },
}

#[derive(Deserialize)]
struct AskRet {
    ask_delete: Option<String>,
    invalid_username: Option<String>,
}

#[derive(Deserialize)]
struct ConfirmPasswordRet {
    confirm_password: Option<String>,
    incorrect_password: Option<String>,
}

#[derive(Deserialize)]
struct ConfirmDeletionRet {
    deleted: Option<bool>,
    rejected: Option<String>,
}

/// Ingress of the deletion flow; obtained from
/// [`Passage::delete_user`](crate::Passage::delete_user).
pub struct DeleteUser {
    pub(crate) transport: Arc<dyn Dispatch>,
}

impl DeleteUser {
    /// Open the deletion flow. The username is re-stated explicitly as a
    /// deliberate friction step; a mismatch costs the attempt but not the
    /// session.
    pub fn ask(
        self,
        token: SessionToken,
        username: impl Into<String>,
    ) -> FutResult<'static, ConfirmPassword, DeleteError> {
        let username = username.into();
        FutResult::new(async move {
            let encoded = token.into_encoded();
            let args = DeleteArgs::AskDelete {
                token: &encoded,
                username: &username,
            };
            let (ret, permit): (AskRet, _) =
                ingress(&self.transport, Route::Delete, &args, None).await?;
            match two_slot(ret.ask_delete, ret.invalid_username)? {
                Ok(rotated) => Ok(Ok(ConfirmPassword {
                    core: FlowCore::new(self.transport, require_permit(permit)?),
                    token: decode_token(&rotated)?,
                })),
                Err(rotated) => Ok(Err(DeleteError {
                    reason: DeleteFailure::InvalidUsername,
                    token: decode_token(&rotated)?,
                })),
            }
        })
    }
}

/// Re-authenticate with the account password before the point of no return.
pub struct ConfirmPassword {
    pub(crate) core: FlowCore,
    pub(crate) token: SessionToken,
}

impl ConfirmPassword {
    /// Present the account password.
    pub fn password(self, password: &Password) -> FutResult<'static, ConfirmDeletion, DeleteError> {
        let password = password.clone();
        FutResult::new(async move {
            let encoded = self.token.into_encoded();
            let args = DeleteArgs::ConfirmPassword {
                guess: password.expose(),
                token: &encoded,
            };
            let (ret, permit): (ConfirmPasswordRet, _) =
                self.core.exchange(Route::Delete, &args).await?;
            match two_slot(ret.confirm_password, ret.incorrect_password)? {
                Ok(rotated) => Ok(Ok(ConfirmDeletion {
                    core: self.core.advance(permit)?,
                    token: decode_token(&rotated)?,
                })),
                Err(rotated) => Ok(Err(DeleteError {
                    reason: DeleteFailure::IncorrectPassword,
                    token: decode_token(&rotated)?,
                })),
            }
        })
    }
}

/// The point of no return.
pub struct ConfirmDeletion {
    pub(crate) core: FlowCore,
    pub(crate) token: SessionToken,
}

impl ConfirmDeletion {
    /// Schedule the deletion. Success consumes the session; by default the
    /// provider defers the actual wipe by a week.
    pub fn confirm(self) -> FutResult<'static, (), DeleteError> {
        FutResult::new(async move {
            let encoded = self.token.into_encoded();
            let args = DeleteArgs::ConfirmDeletion { token: &encoded };
            let (ret, _): (ConfirmDeletionRet, _) =
                self.core.exchange(Route::Delete, &args).await?;
            match two_slot(ret.deleted, ret.rejected)? {
                Ok(_) => Ok(Ok(())),
                Err(rotated) => Ok(Err(DeleteError {
                    reason: DeleteFailure::Rejected,
                    token: decode_token(&rotated)?,
                })),
            }
        })
    }
}

/// Stage tags of the deletion flow's serialized records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteStage {
    /// Awaiting the password re-check.
    ConfirmPassword,
    /// Awaiting the final confirmation.
    ConfirmDeletion,
}

/// Serializable snapshot of a deletion flow state. Unlike the other flows
/// this record carries the rotated session token, because the live state
/// does.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteRecord {
    /// Which state the record reconstitutes into.
    pub stage: DeleteStage,
    /// The permit gating the next transition.
    pub permit: Permit,
    /// The session token as rotated by the previous step, in wire form.
    pub token: String,
}

impl Snapshot for ConfirmPassword {
    type Record = DeleteRecord;

    fn record(&self) -> DeleteRecord {
        DeleteRecord {
            stage: DeleteStage::ConfirmPassword,
            permit: self.core.permit.clone(),
            token: self.token.encoded(),
        }
    }
}

impl Snapshot for ConfirmDeletion {
    type Record = DeleteRecord;

    fn record(&self) -> DeleteRecord {
        DeleteRecord {
            stage: DeleteStage::ConfirmDeletion,
            permit: self.core.permit.clone(),
            token: self.token.encoded(),
        }
    }
}

/// A deletion state reconstituted from a serialized record.
pub enum ResumedDelete {
    /// Back at the password re-check.
    ConfirmPassword(ConfirmPassword),
    /// Back at the final confirmation.
    ConfirmDeletion(ConfirmDeletion),
}
