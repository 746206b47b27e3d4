#![allow(dead_code)]

use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use storefront::{
    config::{AppConfig, SecurityConfig},
    middleware::auth::{AuthUser, SessionContext},
    services::{auth_service::NewUser, auth_service::UserStore, cart_service::SessionStore, memory::MemoryStore},
    state::AppState,
};
use uuid::Uuid;

pub const JWT_SECRET: &str = "test-secret";

pub fn test_config(checkout_timeout: Duration) -> AppConfig {
    AppConfig {
        database_url: String::new(),
        host: "127.0.0.1".to_string(),
        port: 0,
        security: SecurityConfig {
            jwt_secret: JWT_SECRET.to_string(),
            session_ttl: chrono::Duration::hours(12),
            remember_me_ttl: chrono::Duration::days(30),
            anonymous_ttl: chrono::Duration::days(7),
        },
        checkout_timeout,
        session_purge_interval: Duration::from_secs(3600),
    }
}

pub fn memory_state(store: &MemoryStore) -> AppState {
    AppState::in_memory(store.clone(), &test_config(Duration::from_secs(2)))
}

pub fn price(raw: &str) -> Decimal {
    raw.parse().expect("decimal literal")
}

/// A user with a live session, skipping password hashing.
pub async fn logged_in(store: &MemoryStore, username: &str) -> AuthUser {
    let user = store
        .create(NewUser {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password_hash: String::new(),
        })
        .await
        .expect("create user");
    let session_id = Uuid::new_v4();
    store
        .bind_user(session_id, user.id, Utc::now() + chrono::Duration::hours(1))
        .await
        .expect("bind session");
    AuthUser {
        user_id: user.id,
        session_id,
    }
}

pub fn session_of(user: &AuthUser) -> SessionContext {
    SessionContext {
        session_id: user.session_id,
        user_id: Some(user.user_id),
    }
}
