//! Skymock Common Library
//!
//! In-memory resource store and lifecycle engine behind the skymock cloud
//! API emulator. EC2-style and Compute-style resources share one store,
//! one integrity checker and one filter engine; per-kind behavior lives in
//! [`resources`].

pub mod engine;
pub mod error;
pub mod filter;
pub mod id;
pub mod integrity;
pub mod operation;
pub mod record;
pub mod request;
pub mod resources;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use engine::{Engine, EngineConfig, ListQuery, Outcome};
pub use error::{Error, ErrorEnvelope, Result};
pub use filter::{Filter, Page, PageRequest};
pub use operation::{Ack, Operation, OperationType};
pub use record::{Record, ResourceKind, ResourceRecord, WriteMode};
pub use request::FieldMap;
pub use store::{Store, Tables};
pub use types::*;

/// Skymock version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
