//! The wire envelope spoken with the identity provider.
//!
//! Every permit-gated request has the shape `{ "args": ..., "permit": ... }`
//! and every response `{ "ret": ..., "permit": ... }`. Ingress requests omit
//! the permit; ticket redemption supplies it from the ticket instead of from
//! a state. Status codes are interpreted here, exhaustively, into the
//! [`RequestError`] taxonomy.

use crate::error::RequestError;
use crate::transport::{Dispatch, Route};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A per-step continuation token issued by the identity provider.
///
/// Opaque and tamper-evident on the server side; the client only carries it
/// between a response and the next request of the same flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permit(String);

impl Permit {
    /// Wrap a raw permit string.
    pub fn new(raw: impl Into<String>) -> Self {
        Permit(raw.into())
    }

    /// The raw permit string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Request body: flow arguments plus the permit gating the transition.
#[derive(Debug, Serialize)]
pub struct Envelope<'a, A: Serialize> {
    /// State-specific arguments.
    pub args: &'a A,
    /// Permit for this transition; absent on ingress requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permit: Option<&'a Permit>,
}

/// Response body: the optional return payload plus the successor permit.
#[derive(Debug, Deserialize)]
pub struct Reply<R> {
    /// Step-specific return payload.
    pub ret: Option<R>,
    /// Permit for the next transition, when the flow continues.
    #[serde(default)]
    pub permit: Option<Permit>,
}

/// Map an HTTP status into the error taxonomy. `200` is the only success.
pub fn interpret_status(status: u16) -> Result<(), RequestError> {
    match status {
        200 => Ok(()),
        400 => Err(RequestError::Request),
        401 => Err(RequestError::State),
        412 => Err(RequestError::Precondition),
        500 => Err(RequestError::Internal),
        status => Err(RequestError::General { status }),
    }
}

/// One enveloped exchange: serialize, dispatch, interpret status, decode.
pub async fn call<A, R>(
    transport: &dyn Dispatch,
    route: Route,
    args: &A,
    permit: Option<&Permit>,
) -> Result<Reply<R>, RequestError>
where
    A: Serialize + Sync,
    R: DeserializeOwned,
{
    let body = serde_json::to_string(&Envelope { args, permit })?;
    let raw = transport.dispatch(route, body).await?;
    interpret_status(raw.status)?;
    Ok(serde_json::from_str(&raw.body)?)
}

/// Adapt a response carrying at most one of an ok-slot and an error-slot
/// into the flow outcome. Zero or two populated slots mean the provider
/// broke the contract.
pub fn two_slot<T, E>(ok: Option<T>, err: Option<E>) -> Result<Result<T, E>, RequestError> {
    match (ok, err) {
        (Some(value), None) => Ok(Ok(value)),
        (None, Some(error)) => Ok(Err(error)),
        _ => Err(RequestError::Deserialization),
    }
}

/// Adapt a response whose only declared slot is the ok-slot.
pub fn ok_slot<T>(ok: Option<T>) -> Result<T, RequestError> {
    ok.ok_or(RequestError::Deserialization)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    #[serde(rename_all = "snake_case")]
    enum Args<'a> {
        HelloLogin { username: &'a str, password: &'a str },
    }

    #[test]
    fn envelope_wraps_args_and_permit() {
        let permit = Permit::new("p-1");
        let body = serde_json::to_string(&Envelope {
            args: &Args::HelloLogin {
                username: "bob123",
                password: "Password1234!",
            },
            permit: Some(&permit),
        })
        .unwrap();
        assert_eq!(
            body,
            r#"{"args":{"hello_login":{"username":"bob123","password":"Password1234!"}},"permit":"p-1"}"#
        );
    }

    #[test]
    fn ingress_envelope_omits_the_permit() {
        let body = serde_json::to_string(&Envelope {
            args: &Args::HelloLogin {
                username: "bob123",
                password: "pw",
            },
            permit: None,
        })
        .unwrap();
        assert!(!body.contains("permit"));
    }

    #[test]
    fn reply_tolerates_missing_fields() {
        let reply: Reply<serde_json::Value> = serde_json::from_str("{}").unwrap();
        assert!(reply.ret.is_none());
        assert!(reply.permit.is_none());

        let reply: Reply<serde_json::Value> =
            serde_json::from_str(r#"{"ret":{},"permit":"p-2"}"#).unwrap();
        assert_eq!(reply.permit.unwrap().as_str(), "p-2");
    }

    #[test]
    fn status_taxonomy_is_exhaustive() {
        assert!(interpret_status(200).is_ok());
        assert!(matches!(interpret_status(400), Err(RequestError::Request)));
        assert!(matches!(interpret_status(401), Err(RequestError::State)));
        assert!(matches!(
            interpret_status(412),
            Err(RequestError::Precondition)
        ));
        assert!(matches!(interpret_status(500), Err(RequestError::Internal)));
        assert!(matches!(
            interpret_status(503),
            Err(RequestError::General { status: 503 })
        ));
    }

    #[test]
    fn two_slot_requires_exactly_one_side() {
        assert_eq!(two_slot::<_, ()>(Some(1), None).unwrap(), Ok(1));
        assert_eq!(two_slot::<(), _>(None, Some("e")).unwrap(), Err("e"));
        assert!(matches!(
            two_slot::<(), ()>(None, None),
            Err(RequestError::Deserialization)
        ));
        assert!(matches!(
            two_slot(Some(1), Some("e")),
            Err(RequestError::Deserialization)
        ));
    }
}
