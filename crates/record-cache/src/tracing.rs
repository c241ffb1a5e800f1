//! # Observability & Tracing
//!
//! [`setup_tracing`] installs a compact `tracing-subscriber` formatter filtered
//! by `RUST_LOG`.
//!
//! ## What Gets Traced
//!
//! - **Store lifecycle**: `Store started` and `Shutdown` with the final record count
//! - **Requests**: one `debug` line per actor request, with `type_key` / `client_id` fields
//! - **Merges and saves**: `info` with the identity map `size` after the change
//! - **Failures**: `warn` with the operation name and error
//! - **Fetches**: `info` per adapter round trip with `page`, `page_size` and record counts
//!
//! ```bash
//! RUST_LOG=info cargo run -p cache-sample
//! RUST_LOG=record_cache=debug cargo run -p cache-sample
//! ```
//!
//! With `RUST_LOG=info`:
//!
//! ```text
//! INFO Store started
//! INFO find_all: Fetched type_key="person" records=1 page=1 page_size=1
//! INFO Merged merged=1 size=1
//! ```
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}
