pub mod collaborators;
pub mod config;
pub mod corpus;
pub mod error;
pub mod evidence;
pub mod graph;
pub mod index;
pub mod persistence;
pub mod progress;
pub mod rules;
pub mod state;

mod stages;

pub use collaborators::{Classification, Classifier, Embedder, NarrativeGenerator, QueryType};
pub use config::AuditConfig;
pub use error::AuditError;
pub use graph::{next_node, AuditContext, NodeKind};
pub use state::SharedState;
