use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait, QueryFilter,
    Statement,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    cart::{Cart, MalformedEntry},
    dto::cart::{AddToCartForm, SetCartItemRequest},
    entity::sessions::{Column as SessionCol, Entity as Sessions},
    error::{AppError, AppResult},
    middleware::auth::SessionContext,
    pricing::{CartView, PricingMode, price_cart},
    response::{ApiResponse, Meta},
    state::AppState,
};

/// Attempts at a compare-and-set cart write before giving up with `Conflict`.
const CART_WRITE_ATTEMPTS: usize = 3;

/// A cart as read from session storage, with the version it was read at.
#[derive(Debug, Clone, Default)]
pub struct CartSnapshot {
    pub cart: Cart,
    pub version: i64,
    pub skipped: Vec<MalformedEntry>,
}

impl CartSnapshot {
    pub fn from_stored(cart: &serde_json::Value, version: i64) -> Self {
        let (cart, skipped) = Cart::from_session_value(cart);
        Self {
            cart,
            version,
            skipped,
        }
    }
}

/// Session persistence behind the account/session boundary.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The session's cart; an unknown session has an empty cart at version 0.
    async fn load_cart(&self, session_id: Uuid) -> AppResult<CartSnapshot>;

    /// Writes `cart` only if the stored version is still `expected_version`.
    /// Returns the new version, or `Conflict` when another write got there first.
    ///
    /// A session with no user moves its expiry to `anonymous_expiry`; a bound
    /// session keeps the expiry it got at login.
    async fn store_cart(
        &self,
        session_id: Uuid,
        cart: &Cart,
        expected_version: i64,
        anonymous_expiry: DateTime<Utc>,
    ) -> AppResult<i64>;

    async fn bind_user(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> AppResult<()>;

    /// The user bound to an unexpired session.
    async fn session_user(&self, session_id: Uuid) -> AppResult<Option<Uuid>>;

    /// The user a session was ever bound to, expired or not.
    async fn session_owner(&self, session_id: Uuid) -> AppResult<Option<Uuid>>;

    async fn end_session(&self, session_id: Uuid) -> AppResult<()>;

    /// Deletes sessions past their expiry; returns how many went.
    async fn purge_expired(&self) -> AppResult<u64>;
}

#[derive(Clone)]
pub struct SeaOrmSessionStore {
    orm: DatabaseConnection,
}

impl SeaOrmSessionStore {
    pub fn new(orm: DatabaseConnection) -> Self {
        Self { orm }
    }
}

#[async_trait]
impl SessionStore for SeaOrmSessionStore {
    async fn load_cart(&self, session_id: Uuid) -> AppResult<CartSnapshot> {
        let session = Sessions::find_by_id(session_id).one(&self.orm).await?;
        Ok(match session {
            Some(s) if s.expires_at.is_some_and(|at| at <= Utc::now()) => CartSnapshot {
                version: s.version,
                ..CartSnapshot::default()
            },
            Some(s) => CartSnapshot::from_stored(&s.cart, s.version),
            None => CartSnapshot::default(),
        })
    }

    async fn store_cart(
        &self,
        session_id: Uuid,
        cart: &Cart,
        expected_version: i64,
        anonymous_expiry: DateTime<Utc>,
    ) -> AppResult<i64> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            INSERT INTO sessions (id, cart, version, expires_at)
            VALUES ($1, $2, 1, $4)
            ON CONFLICT (id) DO UPDATE
            SET cart = EXCLUDED.cart,
                version = sessions.version + 1,
                expires_at = CASE
                    WHEN sessions.user_id IS NULL THEN EXCLUDED.expires_at
                    ELSE sessions.expires_at
                END,
                updated_at = now()
            WHERE sessions.version = $3
            RETURNING version
            "#,
            [
                session_id.into(),
                cart.to_session_value().into(),
                expected_version.into(),
                anonymous_expiry.into(),
            ],
        );
        let row = self.orm.query_one(stmt).await?;
        match row {
            Some(row) => Ok(row.try_get::<i64>("", "version")?),
            None => Err(AppError::Conflict(
                "cart was modified by another request".to_string(),
            )),
        }
    }

    async fn bind_user(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            INSERT INTO sessions (id, user_id, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET user_id = EXCLUDED.user_id, expires_at = EXCLUDED.expires_at, updated_at = now()
            "#,
            [session_id.into(), user_id.into(), expires_at.into()],
        );
        self.orm.execute(stmt).await?;
        Ok(())
    }

    async fn session_user(&self, session_id: Uuid) -> AppResult<Option<Uuid>> {
        let session = Sessions::find_by_id(session_id)
            .filter(SessionCol::UserId.is_not_null())
            .filter(SessionCol::ExpiresAt.gt(Utc::now()))
            .one(&self.orm)
            .await?;
        Ok(session.and_then(|s| s.user_id))
    }

    async fn session_owner(&self, session_id: Uuid) -> AppResult<Option<Uuid>> {
        let session = Sessions::find_by_id(session_id).one(&self.orm).await?;
        Ok(session.and_then(|s| s.user_id))
    }

    async fn end_session(&self, session_id: Uuid) -> AppResult<()> {
        Sessions::delete_by_id(session_id).exec(&self.orm).await?;
        Ok(())
    }

    async fn purge_expired(&self) -> AppResult<u64> {
        let result = Sessions::delete_many()
            .filter(SessionCol::ExpiresAt.lte(Utc::now()))
            .exec(&self.orm)
            .await?;
        Ok(result.rows_affected)
    }
}

/// Expiry given to an anonymous session on each cart write.
pub fn anonymous_expiry(state: &AppState) -> AppResult<DateTime<Utc>> {
    Utc::now()
        .checked_add_signed(state.security.anonymous_ttl)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to set expiration")))
}

/// Removes expired sessions every `every` until the process exits.
pub async fn purge_sessions_periodically(sessions: Arc<dyn SessionStore>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match sessions.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => tracing::info!(purged, "expired sessions removed"),
            Err(err) => tracing::warn!(error = %err, "session purge failed"),
        }
    }
}

/// Load-modify-store with compare-and-set, retried against the fresh cart on a lost race.
async fn mutate_cart<F>(state: &AppState, session_id: Uuid, mut apply: F) -> AppResult<Cart>
where
    F: FnMut(&mut Cart) -> AppResult<()> + Send,
{
    let expires_at = anonymous_expiry(state)?;
    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut snapshot = state.sessions.load_cart(session_id).await?;
        apply(&mut snapshot.cart)?;
        match state
            .sessions
            .store_cart(session_id, &snapshot.cart, snapshot.version, expires_at)
            .await
        {
            Ok(_) => return Ok(snapshot.cart),
            Err(AppError::Conflict(reason)) if attempt < CART_WRITE_ATTEMPTS => {
                tracing::debug!(%session_id, attempt, %reason, "retrying cart write");
            }
            Err(err) => return Err(err),
        }
    }
}

async fn render(state: &AppState, cart: &Cart, message: &str) -> AppResult<ApiResponse<CartView>> {
    let view = price_cart(cart, state.catalog.as_ref(), PricingMode::Display).await?;
    let meta = Meta::counted(view.lines.len());
    Ok(ApiResponse::success(message, view, meta))
}

pub async fn view_cart(
    state: &AppState,
    session: &SessionContext,
) -> AppResult<ApiResponse<CartView>> {
    let snapshot = state.sessions.load_cart(session.session_id).await?;
    render(state, &snapshot.cart, "OK").await
}

pub async fn add_to_cart(
    state: &AppState,
    session: &SessionContext,
    slug: &str,
    form: AddToCartForm,
) -> AppResult<ApiResponse<CartView>> {
    let quantity = form.quantity()?;
    if quantity < 1 {
        return Err(AppError::Validation(
            "quantity must be at least 1".to_string(),
        ));
    }
    let product = state.catalog.get_product_by_slug(slug).await?;

    let cart = mutate_cart(state, session.session_id, |cart| {
        cart.add_item(product.id, quantity).map(|_| ())
    })
    .await?;

    if let Err(err) = log_audit(
        state.audit.as_ref(),
        session.user_id,
        "cart_add",
        Some("sessions"),
        Some(serde_json::json!({ "product_id": product.id, "quantity": quantity })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    render(state, &cart, "Added to cart").await
}

pub async fn set_cart_item(
    state: &AppState,
    session: &SessionContext,
    product_id: Uuid,
    payload: SetCartItemRequest,
) -> AppResult<ApiResponse<CartView>> {
    if payload.quantity > 0 {
        state.catalog.get_product(product_id).await?;
    }

    let cart = mutate_cart(state, session.session_id, |cart| {
        cart.set_item(product_id, payload.quantity)
    })
    .await?;

    render(state, &cart, "Cart updated").await
}

pub async fn remove_from_cart(
    state: &AppState,
    session: &SessionContext,
    product_id: Uuid,
) -> AppResult<ApiResponse<CartView>> {
    let cart = mutate_cart(state, session.session_id, |cart| {
        cart.remove_item(product_id);
        Ok(())
    })
    .await?;

    render(state, &cart, "Removed from cart").await
}

pub async fn clear_cart(
    state: &AppState,
    session: &SessionContext,
) -> AppResult<ApiResponse<CartView>> {
    let cart = mutate_cart(state, session.session_id, |cart| {
        cart.clear();
        Ok(())
    })
    .await?;

    render(state, &cart, "Cart cleared").await
}
