//! Core library for WorkBoard.
//!
//! This crate provides the domain models, the document-store contract, the
//! live collection mirrors, and the board operations (scoring, seeding,
//! approvals, attendance, assist), independent of any transport layer.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use workboard_core::score::ScoreWeights;
//! use workboard_core::store::{DocumentStore, SqliteStore};
//! use workboard_core::sync::SyncSession;
//!
//! let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::open_default()?);
//! let session = SyncSession::start(store, ScoreWeights::default());
//! let ranked = session.mirrors().ranked_work_items();
//! # Ok::<(), workboard_core::store::StoreError>(())
//! ```

pub mod approval;
pub mod assist;
pub mod auth;
pub mod models;
pub mod score;
pub mod seed;
pub mod session;
pub mod store;
pub mod sync;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use score::{priority_score, ScoreWeights};
pub use store::{DocumentStore, MemoryStore, SqliteStore};
pub use sync::{Mirrors, SyncSession};
