//! # Record Cache
//!
//! A client-side record cache built on the **Actor Model**. Every record
//! fetched from a backend is held in an identity map that guarantees **one
//! canonical instance per `(type, id)`**, and live [`RecordArray`]s follow the
//! map as records are loaded, updated and deleted.
//!
//! ## Why an actor?
//!
//! The identity map has one owner, the [`StoreActor`]. Requests reach it over
//! a channel and run one at a time, so:
//!
//! - Two payloads for the same record can never race into two instances
//! - A merge and the array notifications it causes happen in one step
//! - No caller ever sees a half-applied payload
//!
//! Adapter calls stay **outside** the actor. A fetch runs on the caller's
//! task, and only the normalized result is sent in, so a slow backend never
//! blocks other store operations and a failed fetch changes nothing.
//!
//! **Further Reading**:
//! - [Identity Map (Fowler)](https://martinfowler.com/eaaCatalog/identityMap.html) - The pattern behind the record cache
//! - [Actors in Rust](https://ryhl.io/blog/actors-with-tokio/) - Practical guide to implementing actors with Tokio
//!
//! ## Architecture Overview
//!
//! The crate separates concerns into four layers:
//!
//! 1. **Data Layer** ([`Record`], [`RecordArray`], [`identity_map::IdentityMap`]) - canonical records and live arrays
//! 2. **Runtime Layer** ([`StoreActor`]) - sequential processing of store requests
//! 3. **Fetch Layer** ([`QueryExecutor`], [`Adapter`]) - backend calls and normalization
//! 4. **Interface Layer** ([`Store`]) - the API applications use
//!
//! ## Quick Start
//!
//! ```rust
//! use record_cache::schema::{AttrKind, ModelSchema};
//! use record_cache::{FixtureAdapter, Store};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     // 1. Describe the models and where they come from
//!     let fixtures = FixtureAdapter::new().with_fixtures(
//!         "person",
//!         vec![
//!             json!({ "id": 1, "name": "Scumbag Dale" }),
//!             json!({ "id": 2, "name": "Scumbag Katz" }),
//!         ],
//!     );
//!
//!     // 2. Spawn the store
//!     let (store, handle) = Store::builder()
//!         .schema(ModelSchema::new("person").plural("people").attr("name", AttrKind::String))
//!         .adapter(Arc::new(fixtures))
//!         .spawn();
//!
//!     // 3. Query it
//!     let people = store.find_all("person").await.unwrap();
//!     assert_eq!(people.len(), 2);
//!     assert!(people.is_finished());
//!
//!     // The same record is always the same instance
//!     let dale = store.find("person", 1).await.unwrap();
//!     assert!(dale.ptr_eq(&people.object_at(0).unwrap()));
//!
//!     store.shutdown().await.unwrap();
//!     handle.await.unwrap();
//! }
//! ```
//!
//! ## Live Arrays
//!
//! | Array | Built by | Membership |
//! |-------|----------|------------|
//! | all | [`Store::all`] | every visible record of a type |
//! | filtered | [`Store::filter`] | visible records passing a predicate |
//! | has-many | [`Record::has_many`] | the members of one relationship |
//! | query | [`Store::find_query`] | whatever the last completed fetch returned |
//!
//! Arrays announce their changes as [`ArrayChange`] events on a broadcast
//! channel ([`RecordArray::subscribe`]). Inside a batch
//! ([`Store::batch`]) insertions are coalesced into one event per array.
//!
//! ## Concurrency Model
//!
//! - The store actor runs in its own Tokio task
//! - Requests are processed **sequentially**; reads of records and arrays
//!   take short read locks and never wait on the actor
//! - Adapter calls run concurrently on the callers' tasks
//! - Overlapping loads of one paginated array resolve as **last issued wins**
//!
//! ## Testing
//!
//! The crate ships a [`MockAdapter`] that answers adapter calls from a queue
//! of expectations, and a [`FixtureAdapter`] that serves in-memory fixtures
//! with paging. See the [`mock`] module for patterns.

pub mod actor;
pub mod adapter;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod fixture;
pub mod identity;
pub mod identity_map;
pub mod message;
pub mod mock;
pub mod paginated;
pub mod record;
pub mod record_array;
pub mod rest;
pub mod schema;
pub mod serializer;
pub mod store;
pub mod tracing;

// Re-export core types for convenience
pub use actor::StoreActor;
pub use adapter::{Adapter, AdapterPayload, AdapterRegistry, AdapterResult, PageRequest};
pub use client::StoreClient;
pub use config::StoreConfig;
pub use error::{AdapterError, FetchError, Result, StoreError};
pub use executor::{Query, QueryExecutor, QueryResult};
pub use fixture::FixtureAdapter;
pub use identity::{ClientId, RecordIdentity};
pub use identity_map::{ChangeKind, RecordChange, RecordObserver};
pub use mock::MockAdapter;
pub use paginated::{LoadMode, PageState, PaginatedRecordArray};
pub use record::{Record, RecordState};
pub use record_array::{ArrayChange, ArraySource, RecordArray};
pub use rest::{RestAdapter, RestRequest, Transport, Verb};
pub use schema::{AttrKind, ModelSchema, RelationshipKind, SchemaRegistry};
pub use serializer::{NormalizedRecord, PayloadMeta};
pub use store::{Store, StoreBatch, StoreBuilder};
