//! Integration tests for the email-send endpoint.

mod common;

use common::{TestOptions, TestServer, TEST_API_KEY};
use reqwest::{header, StatusCode};
use serde_json::{json, Value};

#[tokio::test]
async fn test_send_requires_api_key() {
    let server = TestServer::start().await;
    let client = server.client();
    let body = json!({ "template": "welcome", "email": "ada@example.com" });

    let response = client
        .post(server.url("/api/email/send"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");

    let response = client
        .post(server.url("/api/email/send"))
        .bearer_auth("wrong-key")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // A session does not stand in for an API key
    let (_, token) = server.sign_in("ada@example.com");
    let response = client
        .post(server.url("/api/email/send"))
        .header(header::COOKIE, common::session_cookie(&token))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert!(server.outbox.messages().is_empty());
}

#[tokio::test]
async fn test_send_welcome_email() {
    let server = TestServer::start().await;

    let response = server
        .client()
        .post(server.url("/api/email/send"))
        .bearer_auth(TEST_API_KEY)
        .json(&json!({ "template": "welcome", "email": " Ada@Example.com", "name": "Ada" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["template"], "welcome");
    assert_eq!(body["email"], "ada@example.com");
    assert!(body["jobId"].as_str().is_some());

    let messages = server.wait_for_emails(1).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].to, "ada@example.com");
    assert_eq!(messages[0].from, "noreply@example.com");
    assert!(messages[0].text.contains("Welcome, Ada!"));
}

#[tokio::test]
async fn test_send_with_x_api_key_header() {
    let server = TestServer::start().await;

    let response = server
        .client()
        .post(server.url("/api/email/send"))
        .header("x-api-key", TEST_API_KEY)
        .json(&json!({
            "template": "upload_complete",
            "email": "ada@example.com",
            "filename": "report.pdf"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let messages = server.wait_for_emails(1).await;
    assert_eq!(messages[0].subject, "Upload finished: report.pdf");
}

#[tokio::test]
async fn test_send_rejects_unknown_template() {
    let server = TestServer::start().await;

    let response = server
        .client()
        .post(server.url("/api/email/send"))
        .bearer_auth(TEST_API_KEY)
        .json(&json!({ "template": "newsletter", "email": "ada@example.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn test_send_rejects_missing_props() {
    let server = TestServer::start().await;

    let response = server
        .client()
        .post(server.url("/api/email/send"))
        .bearer_auth(TEST_API_KEY)
        .json(&json!({ "template": "magic_link", "email": "ada@example.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_send_rejects_invalid_recipient() {
    let server = TestServer::start().await;

    let response = server
        .client()
        .post(server.url("/api/email/send"))
        .bearer_auth(TEST_API_KEY)
        .json(&json!({ "template": "welcome", "email": "nobody" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_send_is_rate_limited_per_key() {
    let server = TestServer::start_with(TestOptions {
        rate_limit_enabled: true,
        rate_limit: 1,
    })
    .await;
    let client = server.client();

    let send = |ip: &'static str| {
        client
            .post(server.url("/api/email/send"))
            .bearer_auth(TEST_API_KEY)
            .header("x-forwarded-for", ip)
            .json(&json!({ "template": "welcome", "email": "ada@example.com" }))
            .send()
    };

    assert_eq!(send("192.0.2.1").await.unwrap().status(), StatusCode::ACCEPTED);
    assert_eq!(
        send("192.0.2.2").await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}
