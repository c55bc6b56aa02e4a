//! Phonebook endpoint behavior.

mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

use common::{pubkey_hex, request, sign_hex, signing_key, test_env};
use gridbroker_core::phonebook::User;

#[tokio::test]
async fn create_get_and_duplicate() {
    let env = test_env();
    let key = signing_key(1);

    let (status, _, created) = request(
        &env.router,
        Method::POST,
        "/users",
        Some(json!({
            "name": "alice",
            "email": "alice@example.com",
            "pubkey": pubkey_hex(&key),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let tid = created["id"].as_i64().unwrap();

    let (status, _, fetched) =
        request(&env.router, Method::GET, &format!("/users/{tid}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "alice");

    // a user with the same name already exists
    let (status, _, _) = request(
        &env.router,
        Method::POST,
        "/users",
        Some(json!({
            "name": "alice",
            "email": "other@example.com",
            "pubkey": pubkey_hex(&key),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn create_validates_the_record() {
    let env = test_env();
    let key = signing_key(1);

    for (name, pubkey) in [
        ("", pubkey_hex(&key)),              // empty name
        ("Alice", pubkey_hex(&key)),         // upper case
        ("al", pubkey_hex(&key)),            // too short
        ("alice", "not-hex".to_string()),    // bad key material
    ] {
        let (status, _, _) = request(
            &env.router,
            Method::POST,
            "/users",
            Some(json!({"name": name, "pubkey": pubkey})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "accepted name={name}");
    }
}

#[tokio::test]
async fn update_requires_the_current_key() {
    let env = test_env();
    let current_key = signing_key(1);
    let next_key = signing_key(2);

    let (_, _, created) = request(
        &env.router,
        Method::POST,
        "/users",
        Some(json!({
            "name": "alice",
            "email": "alice@example.com",
            "pubkey": pubkey_hex(&current_key),
        })),
    )
    .await;
    let tid = created["id"].as_i64().unwrap();

    // rotate the key and change the email, signed with the current key
    let update = User {
        id: tid,
        email: "new@example.com".to_string(),
        pubkey: pubkey_hex(&next_key),
        ..Default::default()
    };
    let signature = sign_hex(&current_key, &update.encode());

    let (status, _, body) = request(
        &env.router,
        Method::PUT,
        &format!("/users/{tid}"),
        Some(json!({
            "email": update.email,
            "pubkey": update.pubkey,
            "signature": signature,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "update failed: {body}");

    let (_, _, fetched) =
        request(&env.router, Method::GET, &format!("/users/{tid}"), None).await;
    assert_eq!(fetched["email"], "new@example.com");
    assert_eq!(fetched["pubkey"], pubkey_hex(&next_key));

    // the old key no longer authorizes updates
    let update = User {
        id: tid,
        email: "hijack@example.com".to_string(),
        ..Default::default()
    };
    let stale_signature = sign_hex(&current_key, &update.encode());
    let (status, _, _) = request(
        &env.router,
        Method::PUT,
        &format!("/users/{tid}"),
        Some(json!({
            "email": update.email,
            "signature": stale_signature,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn list_filters_by_name() {
    let env = test_env();
    let key = signing_key(1);

    for name in ["alice", "bob"] {
        request(
            &env.router,
            Method::POST,
            "/users",
            Some(json!({"name": name, "pubkey": pubkey_hex(&key)})),
        )
        .await;
    }

    let (status, _, listed) =
        request(&env.router, Method::GET, "/users?name=bob", None).await;
    assert_eq!(status, StatusCode::OK);
    let users = listed.as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["name"], "bob");
}
