//! # Passage Token
//!
//! Session tokens and recovery tickets for the Passage identity SDK.
//!
//! Both are opaque blobs sealed by the identity provider; the client never
//! inspects their contents. What the client does enforce is *affinity*:
//! neither type is `Clone`, and every SDK operation that accepts one takes
//! it by value, so a consumed credential cannot be observed again without
//! the compiler objecting. The provider rotates the session token on every
//! use ("peek"); tickets are stronger, invalidated server-side on first
//! redemption.
//!
//! On the wire both are unpadded Base64, moved through the constant-time
//! codec in both directions.

use passage_core::codec;
use passage_core::Base64Error;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A live login session, sealed by the identity provider.
///
/// Affine: every operation that accepts a token consumes it and yields a
/// replacement, either in its success payload or riding on the error. A
/// token that was passed to an operation is dead regardless of the outcome.
#[must_use = "a session token is invalidated by use; dropping it unobserved ends the session"]
pub struct SessionToken {
    sealed: Vec<u8>,
}

impl SessionToken {
    /// Rebuild a token from its unpadded-Base64 wire form.
    pub fn from_encoded(encoded: &str) -> Result<Self, Base64Error> {
        codec::decode_ct(encoded).map(|sealed| SessionToken { sealed })
    }

    /// The wire form, without consuming the token. Exists for serialization;
    /// a serialized copy stands in for the original and inherits its
    /// one-use contract.
    pub fn encoded(&self) -> String {
        codec::encode_ct(&self.sealed)
    }

    /// Consume the token, producing its wire form.
    pub fn into_encoded(self) -> String {
        self.encoded()
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(..)")
    }
}

impl Serialize for SessionToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encoded())
    }
}

impl<'de> Deserialize<'de> for SessionToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(EncodedVisitor).map(|sealed| SessionToken { sealed })
    }
}

/// A single-use recovery permit, issued by a privileged user so that a
/// target user can reset their password and/or MFA configuration.
///
/// Structurally a [`SessionToken`], but affine in a stronger sense: the
/// provider invalidates it on redemption, across processes.
#[must_use = "a recovery ticket is single-use; dropping it unobserved wastes it"]
pub struct Ticket {
    sealed: Vec<u8>,
}

impl Ticket {
    /// Rebuild a ticket from its unpadded-Base64 wire form.
    pub fn from_encoded(encoded: &str) -> Result<Self, Base64Error> {
        codec::decode_ct(encoded).map(|sealed| Ticket { sealed })
    }

    /// The wire form, without consuming the ticket. Serialization only.
    pub fn encoded(&self) -> String {
        codec::encode_ct(&self.sealed)
    }

    /// Consume the ticket, producing its wire form.
    pub fn into_encoded(self) -> String {
        self.encoded()
    }
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Ticket(..)")
    }
}

impl Serialize for Ticket {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encoded())
    }
}

impl<'de> Deserialize<'de> for Ticket {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(EncodedVisitor).map(|sealed| Ticket { sealed })
    }
}

struct EncodedVisitor;

impl Visitor<'_> for EncodedVisitor {
    type Value = Vec<u8>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an unpadded base64 string")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        codec::decode_ct(value).map_err(de::Error::custom)
    }
}

/// The result of checking a session token.
///
/// The checked token is dead; `token` is its replacement and must be used
/// for any subsequent request. Ignoring it silently logs the user out on
/// the next check.
#[must_use = "the rotated token must replace the one that was checked"]
#[derive(Debug, Deserialize)]
pub struct PeekedToken {
    /// The account the token belongs to.
    pub user_id: String,
    /// The replacement session token.
    pub token: SessionToken,
}
