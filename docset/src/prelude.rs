//! Convenient re-exports of commonly used types from docset.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docset::prelude::*;
//! ```
//!
//! This provides access to:
//! - The context, entity sets and queries
//! - Entity traits, metadata and field tags
//! - Predicate building
//! - Store backends and builders
//! - Error types

pub use std::sync::Arc;

pub use async_trait::async_trait;

pub use docset_core::{
    backend::{StoreBackend, StoreBackendBuilder, WriteKind, WriteOp},
    config::ContextConfig,
    context::{DbContext, DbContextBuilder, EntityQuery, EntitySet},
    entity::{Entity, EntityMeta, FieldTagged, OperationContext, ValueObject},
    error::{DocSetError, DocSetResult, ErrorKind},
    field,
    file::{BlobStore, FileData, StorageFile},
    page::{Page, PageRequest},
    predicate::{FieldSelector, PredicateBuilder},
    query::{FieldOp, Filter, FilterVisitor, Query, QueryBuilder, Sort, SortDirection},
    schema::EntitySchema,
    tracker::Tracked,
};
