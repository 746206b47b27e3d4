use argon2::{
    Argon2, PasswordHasher,
    password_hash::{PasswordHash, PasswordVerifier, SaltString},
};
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use password_hash::rand_core::OsRng;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set, SqlErr,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::auth::{Claims, LoginRequest, LoginResponse, Profile, SignupRequest},
    entity::users::{ActiveModel as UserActive, Column as UserCol, Entity as Users, Model as UserModel},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, SessionContext},
    models::User,
    response::ApiResponse,
    state::AppState,
};

pub const MIN_PASSWORD_LEN: usize = 8;
const MAX_USERNAME_LEN: usize = 150;

#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> AppResult<Option<User>>;

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<User>>;

    /// Fails with `Conflict` when the username is taken.
    async fn create(&self, user: NewUser) -> AppResult<User>;
}

#[derive(Clone)]
pub struct SeaOrmUserStore {
    orm: DatabaseConnection,
}

impl SeaOrmUserStore {
    pub fn new(orm: DatabaseConnection) -> Self {
        Self { orm }
    }
}

#[async_trait]
impl UserStore for SeaOrmUserStore {
    async fn find_by_username(&self, username: &str) -> AppResult<Option<User>> {
        let user = Users::find()
            .filter(UserCol::Username.eq(username))
            .one(&self.orm)
            .await?;
        Ok(user.map(user_from_entity))
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        let user = Users::find_by_id(id).one(&self.orm).await?;
        Ok(user.map(user_from_entity))
    }

    async fn create(&self, user: NewUser) -> AppResult<User> {
        let inserted = UserActive {
            id: Set(user.id),
            username: Set(user.username),
            email: Set(user.email),
            password_hash: Set(user.password_hash),
            bio: Set(String::new()),
            created_at: NotSet,
        }
        .insert(&self.orm)
        .await;

        match inserted {
            Ok(model) => Ok(user_from_entity(model)),
            Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Err(AppError::Conflict("Username is already taken".into()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn validate_signup(payload: &SignupRequest) -> AppResult<()> {
    let username = payload.username.trim();
    if username.is_empty() || username.len() > MAX_USERNAME_LEN {
        return Err(AppError::Validation(format!(
            "username must be between 1 and {MAX_USERNAME_LEN} characters"
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || "@.+-_".contains(c))
    {
        return Err(AppError::Validation(
            "username may only contain letters, digits and @.+-_".into(),
        ));
    }
    let email = payload.email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
        _ => return Err(AppError::Validation("email address is not valid".into())),
    }
    if payload.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if payload.password != payload.password_confirm {
        return Err(AppError::Validation("Passwords do not match".into()));
    }
    Ok(())
}

pub async fn signup(state: &AppState, payload: SignupRequest) -> AppResult<ApiResponse<User>> {
    validate_signup(&payload)?;
    let SignupRequest {
        username,
        email,
        password,
        ..
    } = payload;
    let username = username.trim().to_string();

    if state.users.find_by_username(&username).await?.is_some() {
        return Err(AppError::Conflict("Username is already taken".into()));
    }

    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?
        .to_string();

    let user = state
        .users
        .create(NewUser {
            id: Uuid::new_v4(),
            username,
            email: email.trim().to_string(),
            password_hash,
        })
        .await?;

    if let Err(err) = log_audit(
        state.audit.as_ref(),
        Some(user.id),
        "user_signup",
        Some("users"),
        Some(serde_json::json!({ "user_id": user.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }
    Ok(ApiResponse::plain("Account created", user))
}

/// Verifies credentials, then moves the caller's cart into a freshly minted,
/// user-bound session. The previous session id stops being valid.
pub async fn login(
    state: &AppState,
    session: &SessionContext,
    payload: LoginRequest,
) -> AppResult<ApiResponse<LoginResponse>> {
    let LoginRequest {
        username,
        password,
        remember_me,
    } = payload;
    let user = match state.users.find_by_username(username.trim()).await? {
        Some(u) => u,
        None => return Err(AppError::Validation("Invalid username or password".into())),
    };

    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("Invalid password hash")))?;

    let argon2 = Argon2::default();
    if argon2
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_err()
    {
        return Err(AppError::Validation("Invalid username or password".into()));
    }

    let ttl = if remember_me {
        state.security.remember_me_ttl
    } else {
        state.security.session_ttl
    };
    let expires_at = Utc::now()
        .checked_add_signed(ttl)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to set expiration")))?;

    let carried = state.sessions.load_cart(session.session_id).await?;
    let session_id = Uuid::new_v4();
    if !carried.cart.is_empty() {
        state
            .sessions
            .store_cart(session_id, &carried.cart, 0, expires_at)
            .await?;
    }
    state
        .sessions
        .bind_user(session_id, user.id, expires_at)
        .await?;
    state.sessions.end_session(session.session_id).await?;

    let claims = Claims {
        sub: user.id.to_string(),
        sid: session_id.to_string(),
        exp: expires_at.timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(state.security.jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?;

    if let Err(err) = log_audit(
        state.audit.as_ref(),
        Some(user.id),
        "user_login",
        Some("users"),
        Some(serde_json::json!({ "user_id": user.id, "remember_me": remember_me })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let resp = LoginResponse {
        token: format!("Bearer {}", token),
        session_id,
        expires_at,
    };
    Ok(ApiResponse::plain("Logged in", resp))
}

pub async fn logout(
    state: &AppState,
    session: &SessionContext,
) -> AppResult<ApiResponse<serde_json::Value>> {
    state.sessions.end_session(session.session_id).await?;

    if let Some(user_id) = session.user_id {
        if let Err(err) = log_audit(
            state.audit.as_ref(),
            Some(user_id),
            "user_logout",
            Some("sessions"),
            None,
        )
        .await
        {
            tracing::warn!(error = %err, "audit log failed");
        }
    }

    Ok(ApiResponse::plain("Logged out", serde_json::json!({})))
}

pub async fn profile(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<Profile>> {
    let found = state
        .users
        .find_by_id(user.user_id)
        .await?
        .ok_or(AppError::Unauthenticated)?;
    let profile = Profile {
        id: found.id,
        username: found.username,
        email: found.email,
        bio: found.bio,
        created_at: found.created_at,
    };
    Ok(ApiResponse::plain("Profile", profile))
}

fn user_from_entity(model: UserModel) -> User {
    User {
        id: model.id,
        username: model.username,
        email: model.email,
        password_hash: model.password_hash,
        bio: model.bio,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
