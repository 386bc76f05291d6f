mod support;

use passage::login::LoginError;
use passage::signup::ResumedSignup;
use passage::{MfaKind, Password, SimpleOtp, Snapshot, Totp, VoidErr};
use serde_json::json;
use support::{client_for, enveloped, TOKEN_A};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer};

#[tokio::test]
async fn signup_happy_path_with_totp() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/signup"))
        .and(body_json(json!({
            "args": {"hello_signup": {"username": "bob123"}}
        })))
        .respond_with(enveloped(json!({}), Some("p1")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/signup"))
        .and(body_json(json!({
            "args": {"password": {"password": "Password1234!"}}, "permit": "p1"
        })))
        .respond_with(enveloped(json!({}), Some("p2")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/signup"))
        .and(body_json(json!({
            "args": {"setup_first_mfa": {"kind": {"Totp": null}}}, "permit": "p2"
        })))
        .respond_with(enveloped(
            json!({"setup_totp": "otpauth://totp/idp:bob123?secret=JBSWY3DP"}),
            Some("p3"),
        ))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/signup"))
        .and(body_json(json!({
            "args": {"verify_totp": {"guess": "01234567"}}, "permit": "p3"
        })))
        .respond_with(enveloped(json!({}), Some("p4")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/signup"))
        .and(body_json(json!({
            "args": {"finalize": {}}, "permit": "p4"
        })))
        .respond_with(enveloped(json!({"token": TOKEN_A}), None))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let Ok(set_password) = client.signup().start("bob123").await.unwrap() else {
        panic!("username is free");
    };

    let password = Password::parse("Password1234!").unwrap();
    let first_mfa = set_password.password(&password).await.unwrap().void_err();

    let verify = first_mfa.totp().await.unwrap().void_err();
    assert_eq!(
        verify.provisioning_uri(),
        Some("otpauth://totp/idp:bob123?secret=JBSWY3DP")
    );

    let Ok(or_finish) = verify.guess(Totp::parse("01234567").unwrap()).await.unwrap() else {
        panic!("correct guess");
    };
    assert_eq!(or_finish.already_setup(), [MfaKind::Totp]);

    let session = or_finish.finish().await.unwrap().void_err();
    assert_eq!(session.into_encoded(), TOKEN_A);
}

#[tokio::test]
async fn taken_usernames_are_reported_synchronously_in_the_flow_plane() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/signup"))
        .respond_with(enveloped(json!({"username_exists": true}), None))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client.signup().start("bob123").await.unwrap().is_err());
}

#[tokio::test]
async fn totp_retries_drop_the_provisioning_uri() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/signup"))
        .and(body_json(json!({
            "args": {"hello_signup": {"username": "bob123"}}
        })))
        .respond_with(enveloped(json!({}), Some("p1")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/signup"))
        .and(body_json(json!({
            "args": {"password": {"password": "Password1234!"}}, "permit": "p1"
        })))
        .respond_with(enveloped(json!({}), Some("p2")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/signup"))
        .and(body_json(json!({
            "args": {"setup_first_mfa": {"kind": {"Totp": null}}}, "permit": "p2"
        })))
        .respond_with(enveloped(json!({"setup_totp": "otpauth://totp/x"}), Some("p3")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/signup"))
        .and(body_json(json!({
            "args": {"verify_totp": {"guess": "99999999"}}, "permit": "p3"
        })))
        .respond_with(enveloped(json!({"maybe_retry_totp": true}), Some("p4")))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let Ok(set_password) = client.signup().start("bob123").await.unwrap() else {
        panic!("username is free");
    };
    let password = Password::parse("Password1234!").unwrap();
    let first_mfa = set_password.password(&password).await.unwrap().void_err();
    let verify = first_mfa.totp().await.unwrap().void_err();
    assert!(verify.provisioning_uri().is_some());

    let Err(retry) = verify.guess(Totp::parse("99999999").unwrap()).await.unwrap() else {
        panic!("wrong guess must not advance");
    };
    assert_eq!(retry.provisioning_uri(), None);
}

#[tokio::test]
async fn signup_states_resume_by_stage_tag() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/signup"))
        .and(body_json(json!({
            "args": {"verify_simple_otp": {"guess": "123456"}}, "permit": "p9"
        })))
        .respond_with(enveloped(json!({}), Some("p10")))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let record = serde_json::json!({
        "stage": "VerifyOtpSetup",
        "permit": "p9",
        "already_setup": ["Totp"],
        "current_mfa": "Sms"
    });
    let ResumedSignup::VerifyOtpSetup(resumed) =
        client.resume_signup_str(&record.to_string()).unwrap()
    else {
        panic!("stage tag drives the dispatch");
    };
    assert_eq!(resumed.current(), MfaKind::Sms);

    let Ok(or_finish) = resumed.guess(SimpleOtp::parse("123456").unwrap()).await.unwrap() else {
        panic!("correct guess");
    };
    assert_eq!(or_finish.already_setup(), [MfaKind::Totp, MfaKind::Sms]);
    assert!(or_finish.serialize().unwrap().contains("SetupMfaOrFinalize"));
}

#[tokio::test]
async fn migration_with_existing_mfa_is_redirected_to_login() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mLogin"))
        .and(body_json(json!({
            "args": {"hello_login": {"username": "old-bob", "password": "Password1234!"}}
        })))
        .respond_with(enveloped(json!({"failure": "WrongFlow"}), None))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let password = Password::parse("Password1234!").unwrap();
    let Err(failure) = client
        .migrate_login()
        .start("old-bob", &password)
        .await
        .unwrap()
    else {
        panic!("migration must be refused");
    };
    assert_eq!(failure, LoginError::WrongFlow);
}

#[tokio::test]
async fn migration_happy_path_over_sms() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mLogin"))
        .and(body_json(json!({
            "args": {"hello_login": {"username": "old-bob", "password": "Password1234!"}}
        })))
        .respond_with(enveloped(json!({}), Some("p1")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mLogin"))
        .and(body_json(json!({
            "args": {"setup_first_mfa": {"kind": {"Sms": "+15550100"}}}, "permit": "p1"
        })))
        .respond_with(enveloped(json!({}), Some("p2")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mLogin"))
        .and(body_json(json!({
            "args": {"verify_simple_otp": {"guess": "123456"}}, "permit": "p2"
        })))
        .respond_with(enveloped(json!({}), Some("p3")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mLogin"))
        .and(body_json(json!({
            "args": {"finalize": {}}, "permit": "p3"
        })))
        .respond_with(enveloped(json!({"token": TOKEN_A}), None))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let password = Password::parse("Password1234!").unwrap();
    let Ok(first_mfa) = client
        .migrate_login()
        .start("old-bob", &password)
        .await
        .unwrap()
    else {
        panic!("legacy password is correct");
    };

    let verify = first_mfa.sms("+15550100").await.unwrap().void_err();
    let Ok(or_login) = verify.guess(SimpleOtp::parse("123456").unwrap()).await.unwrap() else {
        panic!("correct guess");
    };
    let session = or_login.finish().await.unwrap().void_err();
    assert_eq!(session.into_encoded(), TOKEN_A);
}
