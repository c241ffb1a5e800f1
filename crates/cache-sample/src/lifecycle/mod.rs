//! # System Lifecycle
//!
//! [`CacheSystem`] wires the sample together: an [`InMemoryServer`](crate::server::InMemoryServer)
//! behind a [`RestAdapter`](record_cache::RestAdapter), the sample schemas, and
//! one spawned store actor.
//!
//! ```rust,ignore
//! let system = CacheSystem::new(demo_server());
//! let people = system.store.find_all(PERSON).await?;
//! system.shutdown().await?;
//! ```
//!
//! ## Graceful Shutdown
//!
//! 1. **Send `Shutdown`** - the actor answers, logs its final size and stops
//! 2. **Await the task** - the identity map is dropped with it
//! 3. **Late callers** - any store call after this fails with `StoreClosed`
//!
//! Records and arrays a caller still holds stay readable after shutdown.
//!
//! ## Observability
//!
//! Call [`setup_tracing`](record_cache::tracing::setup_tracing) once at startup:
//!
//! ```bash
//! RUST_LOG=info cargo run -p cache-sample      # Compact logs
//! RUST_LOG=debug cargo run -p cache-sample     # Every store request
//! ```

pub mod cache_system;

pub use cache_system::*;
