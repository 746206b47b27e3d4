use argon2::{
    Argon2, PasswordHasher,
    password_hash::{SaltString, rand_core::OsRng},
};
use rust_decimal::Decimal;
use storefront::{
    config::AppConfig,
    db::{create_orm_conn, create_pool, run_migrations},
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let orm = create_orm_conn(&config.database_url).await?;
    run_migrations(&orm).await?;
    let pool = create_pool(&config.database_url).await?;

    let alice = ensure_user(&pool, "alice", "alice@example.com", "wonderland1").await?;
    let bob = ensure_user(&pool, "bob", "bob@example.com", "builder123").await?;
    seed_products(&pool).await?;

    println!("Seed completed. alice: {alice}, bob: {bob}");
    Ok(())
}

async fn ensure_user(
    pool: &sqlx::PgPool,
    username: &str,
    email: &str,
    password: &str,
) -> anyhow::Result<Uuid> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?
        .to_string();

    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        INSERT INTO users (id, username, email, password_hash)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (username) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(username)
    .bind(email)
    .bind(password_hash)
    .fetch_optional(pool)
    .await?;

    // Existing users keep their password.
    let user_id = match row {
        Some((id,)) => id,
        None => {
            let existing: (Uuid,) = sqlx::query_as("SELECT id FROM users WHERE username = $1")
                .bind(username)
                .fetch_one(pool)
                .await?;
            existing.0
        }
    };

    println!("Ensured user {username}");
    Ok(user_id)
}

async fn seed_products(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let products = [
        ("ferris-mug", "Ferris Mug", "Coffee tastes better with Ferris", 1200, "kitchen"),
        ("axum-hoodie", "Axum Hoodie", "Warm hoodie for Rustaceans", 5500, "apparel"),
        ("sticker-pack", "Rust Sticker Pack", "Decorate your laptop", 500, "accessories"),
        ("async-ebook", "E-book: Async Rust", "Learn async Rust patterns", 1999, "books"),
        ("borrow-tote", "Borrow Checker Tote", "Carries everything, exactly once", 1000, "apparel"),
    ];

    for (slug, name, desc, cents, category) in products {
        sqlx::query(
            r#"
            INSERT INTO products (id, slug, name, description, price, category)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (slug) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(slug)
        .bind(name)
        .bind(desc)
        .bind(Decimal::new(cents, 2))
        .bind(category)
        .execute(pool)
        .await?;
    }

    println!("Seeded products");
    Ok(())
}
