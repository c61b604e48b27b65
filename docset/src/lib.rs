//! # docset
//!
//! A change-tracking unit of work and predicate compiler over JSON document stores.
//!
//! docset maps plain Rust structs onto store documents, tracks every entity it hands
//! out, and writes mutations back as one atomic batch.
//!
//! ## Key Features
//!
//! - **Unit of work** - Staged inserts, deletes and automatic write-back of mutated entities
//! - **Field tags** - Ignored, required, nested, value-object and file fields declared per type
//! - **Predicates** - Fluent AND/OR predicates compiled into store-executable branches
//! - **Pagination** - Monotonic document positions and position-based pages
//! - **Multiple backends** - In-memory and MongoDB storage behind one backend trait
//!
//! ## Quick Start
//!
//! ```ignore
//! use docset::{prelude::*, memory::InMemoryStore};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize)]
//! #[serde(rename_all = "camelCase")]
//! pub struct Task {
//!     #[serde(flatten)]
//!     pub meta: EntityMeta,
//!     pub title: String,
//!     pub done: bool,
//! }
//!
//! impl FieldTagged for Task {
//!     fn type_name() -> &'static str {
//!         "Task"
//!     }
//!
//!     fn field_tags() -> EntitySchema {
//!         EntitySchema::builder::<Self>(Self::type_name())
//!             .collection("tasks")
//!             .required("title")
//!             .build()
//!     }
//! }
//!
//! impl Entity for Task {
//!     fn meta(&self) -> &EntityMeta {
//!         &self.meta
//!     }
//!
//!     fn meta_mut(&mut self) -> &mut EntityMeta {
//!         &mut self.meta
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> DocSetResult<()> {
//!     let ctx = DbContext::builder(InMemoryStore::new())
//!         .config(ContextConfig::default().with_pagination(true))
//!         .register::<Task>()
//!         .build()?;
//!
//!     let mut task = Task {
//!         title: "write docs".into(),
//!         ..Task::default()
//!     };
//!     ctx.add(&mut task).await?;
//!     ctx.save_changes().await?;
//!
//!     let open = ctx
//!         .set::<Task>()
//!         .filter(PredicateBuilder::new().equal(field!(|t: Task| t.done), false))?
//!         .to_list()
//!         .await?;
//!
//!     for task in &open {
//!         task.write().await.done = true;
//!     }
//!
//!     // one update per mutated task
//!     ctx.save_changes().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Predicates
//!
//! The store only evaluates conjunctions, so predicates are normalized into
//! branches. A term joined by `and()` extends the AND group of the term before it;
//! a term followed by `and()` opens that group. A term joined by `or()` and not
//! followed by `and()` is a standalone branch. Each branch runs as its own query and
//! the results are unioned in the order the branches were written.
//!
//! ```ignore
//! let plan = PredicateBuilder::new()
//!     .greater_than("age", 18)
//!     .and()
//!     .equal("status", "active")
//!     .or()
//!     .equal("role", "admin")
//!     .compile()?;
//!
//! assert_eq!(plan.and_groups.len(), 1);
//! assert_eq!(plan.or_branches.len(), 1);
//! ```
//!
//! ## Backends
//!
//! - [`memory`] - Fast in-memory storage for development and testing
//! - [`mongodb`] - Persistent MongoDB backend (requires `mongodb` feature)

pub mod prelude;

pub use docset_core::{
    backend, barrier, batch, config, context, entity, error, executor, field, file, mapper, page, predicate,
    query, schema, tracker, unit_of_work,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docset_memory::{InMemoryBlobStore, InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docset_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
