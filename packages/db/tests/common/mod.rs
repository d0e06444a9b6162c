use docqueue_db::{DbConfig, StoreError, SurrealStore};

pub const INDEX: &str = "jobs";

/// A fresh in-memory SurrealDB instance with the `jobs` table defined.
pub async fn setup_surreal() -> Result<SurrealStore, StoreError> {
    let store = SurrealStore::connect(&DbConfig::memory()).await?;
    store.ensure_index(INDEX).await?;
    Ok(store)
}
