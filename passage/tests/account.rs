mod support;

use passage::delete::{DeleteFailure, ResumedDelete};
use passage::ticket::{AfterPassword, RecoveryPath, ResumedTicket, RecoveryOp, TicketKind};
use passage::update_mfa::{CannotRemoveReason, ResumedUpdateMfa};
use passage::{MfaKind, Opaque, Password, SimpleOtp, Totp, VoidErr};
use serde_json::json;
use support::{client_for, enveloped, token, TICKET, TOKEN_A, TOKEN_B, TOKEN_C};
use wiremock::matchers::{body_json, body_string, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn wrong_delete_password_keeps_the_user_logged_in() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/delete"))
        .and(body_json(json!({
            "args": {"ask_delete": {"token": TOKEN_A, "username": "bob123"}}
        })))
        .respond_with(enveloped(json!({"ask_delete": TOKEN_B}), Some("p1")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/delete"))
        .and(body_json(json!({
            "args": {"confirm_password": {"guess": "WrongGuess99!", "token": TOKEN_B}},
            "permit": "p1"
        })))
        .respond_with(enveloped(json!({"incorrect_password": TOKEN_C}), None))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/refresh"))
        .and(body_string(TOKEN_C))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "peeked": {"user_id": "u-1", "token": TOKEN_A}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let Ok(confirm) = client
        .delete_user()
        .ask(token(TOKEN_A), "bob123")
        .await
        .unwrap()
    else {
        panic!("username matches");
    };

    let wrong = Password::parse("WrongGuess99!").unwrap();
    let Err(refused) = confirm.password(&wrong).await.unwrap() else {
        panic!("wrong password must not advance");
    };
    assert_eq!(refused.reason, DeleteFailure::IncorrectPassword);

    // The replacement token is live: the session survived the mistake.
    let Ok(peeked) = client.check_token(refused.token).await.unwrap() else {
        panic!("replacement token must be accepted");
    };
    assert_eq!(peeked.user_id, "u-1");
}

#[tokio::test]
async fn deletion_is_scheduled_after_both_confirmations() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/delete"))
        .and(body_json(json!({
            "args": {"ask_delete": {"token": TOKEN_A, "username": "bob123"}}
        })))
        .respond_with(enveloped(json!({"ask_delete": TOKEN_B}), Some("p1")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/delete"))
        .and(body_json(json!({
            "args": {"confirm_password": {"guess": "Password1234!", "token": TOKEN_B}},
            "permit": "p1"
        })))
        .respond_with(enveloped(json!({"confirm_password": TOKEN_C}), Some("p2")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/delete"))
        .and(body_json(json!({
            "args": {"confirm_deletion": {"token": TOKEN_C}}, "permit": "p2"
        })))
        .respond_with(enveloped(json!({"deleted": true}), None))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let Ok(confirm) = client
        .delete_user()
        .ask(token(TOKEN_A), "bob123")
        .await
        .unwrap()
    else {
        panic!("username matches");
    };
    let password = Password::parse("Password1234!").unwrap();
    let Ok(point_of_no_return) = confirm.password(&password).await.unwrap() else {
        panic!("correct password");
    };
    let Ok(()) = point_of_no_return.confirm().await.unwrap() else {
        panic!("deletion must be scheduled");
    };
}

#[tokio::test]
async fn mfa_removal_commits_only_at_finalization() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upMfa"))
        .and(body_json(json!({
            "args": {"hello_update": {"token": TOKEN_A}}
        })))
        .respond_with(enveloped(
            json!({"hello_update": {"token": TOKEN_B, "old_mfa": ["Totp", "Sms"]}}),
            Some("p1"),
        ))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upMfa"))
        .and(body_json(json!({
            "args": {"request_check": {"kind": "Totp"}}, "permit": "p1"
        })))
        .respond_with(enveloped(json!({}), Some("p2")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upMfa"))
        .and(body_json(json!({
            "args": {"check_totp": {"guess": "01234567"}}, "permit": "p2"
        })))
        .respond_with(enveloped(json!({}), Some("p3")))
        .mount(&server)
        .await;
    // A successful removal: the reply carries no `invalid_mfa` slot.
    Mock::given(method("POST"))
        .and(path("/upMfa"))
        .and(body_json(json!({
            "args": {"remove_mfa": {"kind": "Sms"}}, "permit": "p3"
        })))
        .respond_with(enveloped(json!({}), Some("p4")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upMfa"))
        .and(body_json(json!({
            "args": {"finalize_removal": {"token": TOKEN_B}}, "permit": "p4"
        })))
        .respond_with(enveloped(json!({"token": TOKEN_C}), None))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let Ok((start, session)) = client.update_mfa().hello(token(TOKEN_A)).await.unwrap() else {
        unreachable!("hello is infallible in the flow plane");
    };
    assert_eq!(start.old_mfa(), [MfaKind::Totp, MfaKind::Sms]);
    assert_eq!(session.encoded(), TOKEN_B);

    let Ok(check) = start.totp().await.unwrap() else {
        panic!("totp is configured");
    };
    let Ok(decide) = check.guess(Totp::parse("01234567").unwrap()).await.unwrap() else {
        panic!("correct guess");
    };

    let Ok(finalize) = decide.remove(MfaKind::Sms).await.unwrap() else {
        panic!("removal of a secondary kind must be accepted");
    };
    let Ok(rotated) = finalize.finalize(session).await.unwrap() else {
        panic!("finalization must commit");
    };
    assert_eq!(rotated.into_encoded(), TOKEN_C);
}

#[tokio::test]
async fn removal_guards_hold_the_flow_at_decide() {
    let server = MockServer::start().await;
    let client = client_for(&server);

    // Local guards: neither request may reach the provider.
    let record = json!({
        "stage": "Decide", "permit": "p3", "old_mfa": ["Totp"]
    });
    let ResumedUpdateMfa::Decide(decide) =
        client.resume_update_mfa_str(&record.to_string()).unwrap()
    else {
        panic!("stage tag drives the dispatch");
    };
    let Err(refused) = decide.remove(MfaKind::Totp).await.unwrap() else {
        panic!("the only configured kind must not be removable");
    };
    assert_eq!(refused.reason, CannotRemoveReason::IsOnlyMfaKind);

    let Err(refused) = refused.state.remove(MfaKind::Email).await.unwrap() else {
        panic!("an unconfigured kind must not be removable");
    };
    assert_eq!(refused.reason, CannotRemoveReason::NotSetUp);
}

#[tokio::test]
async fn provider_side_removal_rejection_is_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upMfa"))
        .and(body_json(json!({
            "args": {"remove_mfa": {"kind": "Sms"}}, "permit": "p3"
        })))
        .respond_with(enveloped(json!({"invalid_mfa": true}), Some("p4")))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let record = json!({
        "stage": "Decide", "permit": "p3", "old_mfa": ["Totp", "Sms"]
    });
    let ResumedUpdateMfa::Decide(decide) =
        client.resume_update_mfa_str(&record.to_string()).unwrap()
    else {
        panic!("stage tag drives the dispatch");
    };
    let Err(refused) = decide.remove(MfaKind::Sms).await.unwrap() else {
        panic!("the provider said no");
    };
    assert_eq!(refused.reason, CannotRemoveReason::Upstream);
}

#[tokio::test]
async fn enrolling_a_new_method_verifies_before_committing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upMfa"))
        .and(body_json(json!({
            "args": {"setup_mfa": {"kind": {"Email": "bob@example.com"}}}, "permit": "p3"
        })))
        .respond_with(enveloped(json!({}), Some("p4")))
        .mount(&server)
        .await;
    // First guess wrong: the ensure state loops on itself.
    Mock::given(method("POST"))
        .and(path("/upMfa"))
        .and(body_json(json!({
            "args": {"verify_simple_otp": {"guess": "999999"}}, "permit": "p4"
        })))
        .respond_with(enveloped(json!({"maybe_retry_simple": true}), Some("p5")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upMfa"))
        .and(body_json(json!({
            "args": {"verify_simple_otp": {"guess": "123456"}}, "permit": "p5"
        })))
        .respond_with(enveloped(json!({}), Some("p6")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upMfa"))
        .and(body_json(json!({
            "args": {"finalize_update": {"token": TOKEN_B}}, "permit": "p6"
        })))
        .respond_with(enveloped(json!({"token": TOKEN_C}), None))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let record = json!({
        "stage": "Decide", "permit": "p3", "old_mfa": ["Totp"]
    });
    let ResumedUpdateMfa::Decide(decide) =
        client.resume_update_mfa_str(&record.to_string()).unwrap()
    else {
        panic!("stage tag drives the dispatch");
    };

    let Ok(ensure) = decide.email("bob@example.com").await.unwrap() else {
        panic!("email is not configured yet");
    };
    let Err(ensure) = ensure.guess(SimpleOtp::parse("999999").unwrap()).await.unwrap() else {
        panic!("wrong guess must loop");
    };
    let Ok(finalize) = ensure.guess(SimpleOtp::parse("123456").unwrap()).await.unwrap() else {
        panic!("correct guess");
    };
    let Ok(rotated) = finalize.finalize(token(TOKEN_B)).await.unwrap() else {
        panic!("finalization must commit");
    };
    assert_eq!(rotated.into_encoded(), TOKEN_C);
}

#[tokio::test]
async fn ticket_recovery_resets_a_password() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/recover"))
        .and(body_json(json!({
            "args": {"issue_ticket": {
                "username": "bob123",
                "kind": "Mutual",
                "reason": "lost phone",
                "token": TOKEN_A
            }}
        })))
        .respond_with(enveloped(json!({"ticket": TICKET, "token": TOKEN_B}), None))
        .mount(&server)
        .await;
    // Redemption sends the ticket as the permit.
    Mock::given(method("POST"))
        .and(path("/recover"))
        .and(body_json(json!({
            "args": {"redeem_ticket": {"operation": "ResetPassword"}}, "permit": TICKET
        })))
        .respond_with(enveloped(json!({}), Some("p1")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/recover"))
        .and(body_json(json!({
            "args": {"reset_password": {"password": "NewPassword99!"}}, "permit": "p1"
        })))
        .respond_with(enveloped(json!({}), Some("p2")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/recover"))
        .and(body_json(json!({
            "args": {"complete_recovery": {}}, "permit": "p2"
        })))
        .respond_with(enveloped(json!({"token": TOKEN_C}), None))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let Ok((ticket, admin_session)) = client
        .ticket()
        .issue(token(TOKEN_A), "bob123", TicketKind::Mutual, "lost phone")
        .await
        .unwrap()
    else {
        panic!("issuer is privileged");
    };
    assert_eq!(admin_session.into_encoded(), TOKEN_B);

    let Ok(verified) = client
        .ticket()
        .redeem(ticket, RecoveryOp::ResetPassword)
        .await
        .unwrap()
    else {
        panic!("ticket is valid");
    };
    assert_eq!(verified.operation(), RecoveryOp::ResetPassword);

    let RecoveryPath::Password(reset) = verified.proceed() else {
        panic!("a password reset routes through the password step");
    };
    let new_password = Password::parse("NewPassword99!").unwrap();
    let after = reset.password(&new_password).await.unwrap().void_err();
    let AfterPassword::Done(complete) = after else {
        panic!("a plain password reset concludes immediately");
    };

    let Ok(session) = complete.complete().await.unwrap() else {
        unreachable!("complete is infallible in the flow plane");
    };
    assert_eq!(session.into_encoded(), TOKEN_C);
}

#[tokio::test]
async fn deletion_states_resume_with_their_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/delete"))
        .and(body_json(json!({
            "args": {"confirm_deletion": {"token": TOKEN_C}}, "permit": "p2"
        })))
        .respond_with(enveloped(json!({"deleted": true}), None))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let record = json!({"stage": "ConfirmDeletion", "permit": "p2", "token": TOKEN_C});
    let ResumedDelete::ConfirmDeletion(state) =
        client.resume_delete_str(&record.to_string()).unwrap()
    else {
        panic!("stage tag drives the dispatch");
    };
    let Ok(()) = state.confirm().await.unwrap() else {
        panic!("deletion must be scheduled");
    };
}

#[tokio::test]
async fn recovery_states_resume_with_their_operation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/recover"))
        .and(body_json(json!({
            "args": {"setup_mfa": {"kind": {"Totp": null}}}, "permit": "p5"
        })))
        .respond_with(enveloped(json!({"setup_totp": "otpauth://totp/x"}), Some("p6")))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let record = json!({"stage": "SetupMfa", "permit": "p5", "operation": "ResetMfa"});
    let ResumedTicket::SetupMfa(state) = client.resume_ticket_str(&record.to_string()).unwrap()
    else {
        panic!("stage tag drives the dispatch");
    };
    let (uri, complete) = state.totp().await.unwrap().void_err();
    assert_eq!(uri, "otpauth://totp/x");
    assert_eq!(complete.operation(), RecoveryOp::ResetMfa);
}

#[tokio::test]
async fn peeking_rotates_the_session_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/refresh"))
        .and(body_string(TOKEN_A))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "peeked": {"user_id": "u-1", "token": TOKEN_B}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let Ok(peeked) = client.check_token(token(TOKEN_A)).await.unwrap() else {
        panic!("token is live");
    };
    assert_eq!(peeked.user_id, "u-1");
    assert_eq!(peeked.token.into_encoded(), TOKEN_B);
}

#[tokio::test]
async fn rejected_peeks_carry_no_detail() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"denied": true})))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let Err(opaque) = client.check_token(token(TOKEN_A)).await.unwrap() else {
        panic!("the check must be refused");
    };
    assert_eq!(opaque, Opaque);
}

#[tokio::test]
async fn revocation_success_returns_no_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/revoke"))
        .and(body_string(TOKEN_A))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"revoked": true})))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let Ok(()) = client.revoke_tokens(token(TOKEN_A)).await.unwrap() else {
        panic!("revocation must succeed");
    };
}

#[tokio::test]
async fn revocation_failure_may_carry_a_replacement() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/revoke"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": TOKEN_B})))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let Err(replacement) = client.revoke_tokens(token(TOKEN_A)).await.unwrap() else {
        panic!("revocation must fail");
    };
    assert_eq!(replacement.expect("replacement token").into_encoded(), TOKEN_B);
}

#[tokio::test]
async fn health_probe_reflects_the_provider() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client.is_healthy(2).await);

    let dead = MockServer::start().await;
    // No /health mock mounted: the probe sees a 404 and reports unhealthy.
    assert!(!client_for(&dead).is_healthy(2).await);
}
