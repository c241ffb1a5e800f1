//! # Record Cache Sample
//!
//! A walk through the record cache against an in-process REST server.
//!
//! ## 🚀 Core Components
//!
//! - **[model]**: `person` / `tag` schemas and their typed views ([`Person`], [`Tag`]).
//! - **[server]**: [`InMemoryServer`](cache_sample::server::InMemoryServer), a REST backend with paging meta.
//! - **[lifecycle]**: [`CacheSystem`], which starts and stops the store.
//!
//! ## 📚 What the demo shows
//!
//! 1.  Paging through `person` records with `load_more`.
//! 2.  One canonical instance per record, shared by every array.
//! 3.  A live relationship array following a delete.
//! 4.  Creating and saving a record, and a save failing while the server is offline.
//!
//! ## 🧪 Testing
//!
//! See [`record_cache::mock`] for testing store code against scripted adapter responses.

use cache_sample::lifecycle::{demo_server, CacheSystem};
use cache_sample::model::{Person, Tag, PERSON, TAG};
use record_cache::tracing::setup_tracing;
use record_cache::StoreConfig;
use tracing::{error, info, Instrument};

#[tokio::main]
async fn main() -> Result<(), String> {
    // Setup tracing once for the entire application
    setup_tracing();

    info!("Starting record cache sample");

    let config = StoreConfig::from_env().with_default_page_size(2);
    let system = CacheSystem::with_config(demo_server(), config);
    let store = system.store.clone();

    let span = tracing::info_span!("paging");
    let people = async {
        let people = store.find_all(PERSON).await.map_err(|e| e.to_string())?;
        info!(len = people.len(), total_pages = people.total_pages(), "First page loaded");
        while !people.is_finished() {
            people.load_more().await.map_err(|e| e.to_string())?;
            info!(len = people.len(), page = people.page(), "Loaded more");
        }
        Ok::<_, String>(people)
    }
    .instrument(span)
    .await?;

    for record in people.to_vec() {
        match Person::from_record(&record) {
            Ok(person) => info!(id = ?person.id, name = %person.name, tag = ?person.tag, "Person"),
            Err(e) => error!(error = %e, "Unreadable person"),
        }
    }

    // Every array shares the same instance
    let dale = store.find(PERSON, 1).await.map_err(|e| e.to_string())?;
    let everyone = store.all(PERSON).await.map_err(|e| e.to_string())?;
    info!(
        same_instance = everyone.object_at(0).is_some_and(|r| r.ptr_eq(&dale)),
        "Identity map check"
    );

    let span = tracing::info_span!("relationships");
    async {
        let scumbags = store.find(TAG, 1).await.map_err(|e| e.to_string())?;
        let label = Tag::from_record(&scumbags).map(|t| t.label).unwrap_or_default();
        let members = scumbags
            .has_many("people")
            .ok_or_else(|| "tag has no people relationship".to_string())?;
        info!(%label, members = members.len(), "Tag loaded");

        store.delete_record(&dale).await.map_err(|e| e.to_string())?;
        info!(members = members.len(), everyone = everyone.len(), "Deleted a member locally");
        Ok::<_, String>(())
    }
    .instrument(span)
    .await?;

    let span = tracing::info_span!("saving");
    async {
        let tom = Person::new("Tomster").with_email("tomster@example.com");
        let record = store
            .create_record(PERSON, tom.fields())
            .await
            .map_err(|e| e.to_string())?;
        store.save(&record).await.map_err(|e| e.to_string())?;
        info!(id = ?record.id(), state = ?record.state(), "Saved new person");

        system.server.set_offline(true);
        store
            .update_record(&record, serde_json::json!({ "name": "Zoey" }))
            .await
            .map_err(|e| e.to_string())?;
        match store.save(&record).await {
            Ok(()) => info!("Saved while offline?"),
            Err(e) => error!(error = %e, state = ?record.state(), "Save failed"),
        }
        system.server.set_offline(false);
        Ok::<_, String>(())
    }
    .instrument(span)
    .await?;

    info!(records = store.len().await.map_err(|e| e.to_string())?, "Cache size");

    // Shutdown system gracefully
    system.shutdown().await.map_err(|e| e.to_string())?;

    info!("Sample completed successfully");
    Ok(())
}
