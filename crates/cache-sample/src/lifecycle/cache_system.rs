use crate::model::{schemas, PERSON, TAG};
use crate::server::InMemoryServer;
use record_cache::{RestAdapter, Result, Store, StoreConfig};
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Owns the running store and the server it talks to.
pub struct CacheSystem {
    pub store: Store,
    pub server: Arc<InMemoryServer>,
    handle: JoinHandle<()>,
}

impl CacheSystem {
    /// Starts a store over `server`, configured from the environment.
    pub fn new(server: InMemoryServer) -> Self {
        Self::with_config(server, StoreConfig::from_env())
    }

    pub fn with_config(server: InMemoryServer, config: StoreConfig) -> Self {
        let server = Arc::new(server);
        let adapter = RestAdapter::new(server.clone()).namespace("api");

        let mut builder = Store::builder().config(config).adapter(Arc::new(adapter));
        for schema in schemas() {
            builder = builder.schema(schema);
        }
        let (store, handle) = builder.spawn();
        info!("Cache system started");

        Self {
            store,
            server,
            handle,
        }
    }

    /// Stops the store and waits for its task to finish.
    pub async fn shutdown(self) -> Result<()> {
        info!("Shutting down cache system");
        self.store.shutdown().await?;
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Store task ended abnormally");
        }
        info!("Cache system stopped");
        Ok(())
    }
}

/// A server preloaded with a few people and tags.
pub fn demo_server() -> InMemoryServer {
    InMemoryServer::new()
        .with_collection(
            "people",
            PERSON,
            vec![
                json!({ "id": "1", "name": "Scumbag Dale", "tag": "1" }),
                json!({ "id": "2", "name": "Scumbag Katz", "tag": "1" }),
                json!({ "id": "3", "name": "Scumbag Bryn", "tag": null }),
                json!({ "id": "4", "name": "Dimebag Dale", "tag": "2" }),
                json!({ "id": "5", "name": "Yehuda Brynjolffsosysdfon", "tag": null }),
            ],
        )
        .with_collection(
            "tags",
            TAG,
            vec![
                json!({ "id": "1", "label": "scumbags" }),
                json!({ "id": "2", "label": "dimebags" }),
            ],
        )
}
