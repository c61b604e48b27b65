//! MongoDB backend implementation for docset.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait.
//! Each batch is committed inside a multi-document transaction, so the server must
//! run as a replica set.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docset = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Features
//!
//! - **Persistent storage** - Data is persisted to MongoDB Atlas or self-hosted MongoDB
//! - **Atomic batches** - Every batch runs in a single transaction
//! - **Async/await** - Fully asynchronous API built on MongoDB's async driver
//!
//! # Example
//!
//! ```ignore
//! use docset::{backend::StoreBackendBuilder, mongodb::MongoDbStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MongoDbStore::builder("mongodb://localhost:27017/?replicaSet=rs0", "my_database")
//!         .build()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docset_mongodb;

pub mod query;
pub mod sanitizer;
pub mod store;

pub use store::{MongoDbStore, MongoDbStoreBuilder};
