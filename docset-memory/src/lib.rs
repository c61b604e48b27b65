//! In-memory document storage backend for docset.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait
//! and of the `BlobStore` used for file fields. It uses async-aware read-write locks for
//! concurrent access and is meant for development and tests.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Atomic batches** - A batch is applied in full or not at all
//! - **Store-faithful queries** - Range and cursor restrictions of a hosted document store
//!
//! # Quick Start
//!
//! ```ignore
//! use docset::{prelude::*, memory::{InMemoryBlobStore, InMemoryStore}};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = DbContext::builder(InMemoryStore::new())
//!         .blob_store(Arc::new(InMemoryBlobStore::new()))
//!         .register::<User>()
//!         .build()?;
//!
//!     let mut user = User::new("Alice");
//!     ctx.add(&mut user).await?;
//!     ctx.save_changes().await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docset_memory;

pub mod blob;
pub mod evaluator;
pub mod store;

pub use blob::InMemoryBlobStore;
pub use store::{InMemoryStore, InMemoryStoreBuilder};
