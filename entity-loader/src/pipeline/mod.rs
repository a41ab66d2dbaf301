//! Dump-to-entity pipeline
//!
//! Parses bulk-insert dumps, evaluates mapping rules, projects records into
//! documents and upserts them into the entity store.

pub mod batch;
pub mod cache;
pub mod dump;
pub mod project;
pub mod rules;
pub mod script;
pub mod store;
pub mod types;

pub use batch::{BatchRunner, ProgressFn, TableJob, TableReport};
pub use cache::{EntitySource, LookupCache, LookupSession, LookupTarget};
pub use project::{Projector, ProjectorOptions};
pub use rules::Evaluator;
pub use store::{DeleteMode, EntityRow, EntityStore, SqlEntityStore, WriteMode, WriteOutcome};
pub use types::*;
