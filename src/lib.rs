pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod store;

pub use api::handlers;
pub use api::routes;

pub use error::{CatalogError, CatalogResult};
pub use logic::{Catalog, ChangeFeed, Sequence, StateChange};
pub use model::*;
pub use store::{KvStore, MemoryKvStore, Repository};

use std::sync::Arc;

/// Catalog over a fresh in-process store, wired from configuration.
pub fn build_catalog(config: &config::AppConfig) -> Arc<Catalog<MemoryKvStore>> {
    let kv = Arc::new(MemoryKvStore::with_history_size(config.store.history_size));
    let repository = Repository::new(kv, config.store.organization.clone());
    Arc::new(Catalog::new(repository, config.watch_timeout()))
}

/// Serve the catalog API on an already bound listener until the server stops.
pub async fn serve<K: KvStore + 'static>(
    listener: tokio::net::TcpListener,
    catalog: Arc<Catalog<K>>,
) -> anyhow::Result<()> {
    let app = api::routes::create_router().with_state(catalog);
    axum::serve(listener, app).await?;
    Ok(())
}
