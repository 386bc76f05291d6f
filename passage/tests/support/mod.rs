//! Shared scaffolding for the mock-provider tests.

// Each test binary compiles its own copy; not every binary uses every helper.
#![allow(dead_code)]

use passage::{Passage, SessionToken};
use serde_json::{json, Value};
use url::Url;
use wiremock::{MockServer, ResponseTemplate};

/// Unpadded wire forms of a few recognizable tokens.
pub const TOKEN_A: &str = "dG9rZW4tYQ";
pub const TOKEN_B: &str = "dG9rZW4tYg";
pub const TOKEN_C: &str = "dG9rZW4tYw";
pub const TICKET: &str = "dGlja2V0LTE";

/// A client pointed at the mock provider.
pub fn client_for(server: &MockServer) -> Passage {
    Passage::builder()
        .base_url(Url::parse(&server.uri()).expect("mock server uri"))
        .build()
        .expect("client construction")
}

/// A `200` reply in the provider envelope.
pub fn enveloped(ret: Value, permit: Option<&str>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "ret": ret, "permit": permit }))
}

pub fn token(encoded: &str) -> SessionToken {
    SessionToken::from_encoded(encoded).expect("wire-form token")
}
