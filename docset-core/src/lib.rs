//! A unit-of-work data layer over document stores.
//!
//! This crate is the core of the docset project and provides:
//!
//! - **Entities** ([`entity`], [`schema`]) - Entity traits, metadata and per-field tag tables
//! - **Mapping** ([`mapper`]) - Conversion between entities and store documents, with validation
//! - **Files** ([`file`]) - File-bearing fields and the blob store they are uploaded to
//! - **Predicates** ([`predicate`]) - Fluent AND/OR predicates compiled into branch plans
//! - **Store backend abstraction** ([`backend`], [`query`]) - The contract storage drivers implement
//! - **Unit of work** ([`unit_of_work`], [`tracker`], [`batch`], [`barrier`]) - Change tracking and atomic commits
//! - **Context** ([`context`]) - The user-facing [`DbContext`](context::DbContext) and entity sets
//! - **Error handling** ([`error`]) - Error types and result types
//! - **Pagination** ([`page`]) - Position-based pages
//!
//! # Example
//!
//! ```ignore
//! use docset_core::{context::DbContext, entity::{Entity, EntityMeta, FieldTagged}};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize)]
//! pub struct Task {
//!     #[serde(flatten)]
//!     pub meta: EntityMeta,
//!     pub title: String,
//! }
//!
//! impl FieldTagged for Task {
//!     fn type_name() -> &'static str {
//!         "Task"
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
//! ```

#[allow(unused_extern_crates)]
extern crate self as docset_core;

pub mod backend;
pub mod barrier;
pub mod batch;
pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod executor;
pub mod file;
pub mod mapper;
pub mod page;
pub mod predicate;
pub mod query;
pub mod schema;
pub mod tracker;
pub mod unit_of_work;
