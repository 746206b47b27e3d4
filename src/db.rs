use anyhow::Result;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use tokio::fs;

pub type DbPool = sqlx::PgPool;

/// Create the sqlx pool used for audit writes and seeding.
pub async fn create_pool(database_url: &str) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Create a SeaORM connection.
pub async fn create_orm_conn(database_url: &str) -> Result<DatabaseConnection> {
    let conn = Database::connect(database_url).await?;
    Ok(conn)
}

/// Apply every `migrations/*.sql` file in filename order.
/// Statements use `IF NOT EXISTS`, so a rerun against a migrated database is a no-op.
pub async fn run_migrations(conn: &DatabaseConnection) -> Result<()> {
    let backend = conn.get_database_backend();
    for file in migration_files("migrations").await? {
        let sql = fs::read_to_string(&file).await?;
        let statements = split_statements(&sql);
        tracing::info!(
            file = %file.display(),
            statements = statements.len(),
            "applying migration"
        );
        // One command per prepared statement on Postgres.
        for statement in statements {
            conn.execute(Statement::from_string(backend, statement))
                .await?;
        }
    }
    Ok(())
}

async fn migration_files(dir: &str) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Split a migration script into executable statements, dropping `--` comment lines.
fn split_statements(sql: &str) -> Vec<String> {
    let stripped: String = sql
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");
    stripped
        .split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty())
        .map(|stmt| format!("{stmt};"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::split_statements;

    #[test]
    fn splits_on_semicolons_and_skips_comments() {
        let sql = "-- users; and carts\nCREATE TABLE a (id INT);\n\n  -- note\nCREATE INDEX i ON a (id);\n";
        assert_eq!(
            split_statements(sql),
            vec!["CREATE TABLE a (id INT);", "CREATE INDEX i ON a (id);"]
        );
    }

    #[test]
    fn empty_script_has_no_statements() {
        assert!(split_statements("-- nothing here\n\n").is_empty());
    }
}
