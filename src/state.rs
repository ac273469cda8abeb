use crate::db::{DbPool, OrmConn, create_orm_conn, create_pool};

/// Shared handles for the two persistence paths: the raw sqlx pool
/// (auth, cart, audit) and the SeaORM connection (catalog, orders,
/// events, admin).
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
}

impl AppState {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = create_pool(database_url).await?;
        let orm = create_orm_conn(database_url).await?;
        Ok(Self { pool, orm })
    }
}
