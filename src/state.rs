use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::{
    audit::{AuditLog, PgAuditLog},
    checkout::CheckoutOrchestrator,
    config::{AppConfig, SecurityConfig},
    db::DbPool,
    services::{
        auth_service::{SeaOrmUserStore, UserStore},
        cart_service::{SeaOrmSessionStore, SessionStore},
        catalog_service::{CatalogStore, SeaOrmCatalog},
        memory::MemoryStore,
        order_service::{OrderStore, SeaOrmOrderStore},
    },
};

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<dyn CatalogStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub orders: Arc<dyn OrderStore>,
    pub users: Arc<dyn UserStore>,
    pub audit: Arc<dyn AuditLog>,
    pub checkout: Arc<CheckoutOrchestrator>,
    pub security: Arc<SecurityConfig>,
}

impl AppState {
    pub fn postgres(orm: DatabaseConnection, pool: DbPool, config: &AppConfig) -> Self {
        let sessions: Arc<dyn SessionStore> = Arc::new(SeaOrmSessionStore::new(orm.clone()));
        let orders: Arc<dyn OrderStore> = Arc::new(SeaOrmOrderStore::new(orm.clone()));
        Self {
            catalog: Arc::new(SeaOrmCatalog::new(orm.clone())),
            users: Arc::new(SeaOrmUserStore::new(orm)),
            audit: Arc::new(PgAuditLog::new(pool)),
            checkout: Arc::new(CheckoutOrchestrator::new(
                sessions.clone(),
                orders.clone(),
                config.checkout_timeout,
            )),
            sessions,
            orders,
            security: Arc::new(config.security.clone()),
        }
    }

    pub fn in_memory(store: MemoryStore, config: &AppConfig) -> Self {
        let sessions: Arc<dyn SessionStore> = Arc::new(store.clone());
        let orders: Arc<dyn OrderStore> = Arc::new(store.clone());
        Self {
            catalog: Arc::new(store.clone()),
            users: Arc::new(store.clone()),
            audit: Arc::new(store),
            checkout: Arc::new(CheckoutOrchestrator::new(
                sessions.clone(),
                orders.clone(),
                config.checkout_timeout,
            )),
            sessions,
            orders,
            security: Arc::new(config.security.clone()),
        }
    }
}
