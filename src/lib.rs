//! Thin surface crate: collaborator clients and the CLI wiring around
//! `audit_core`.

pub mod collaborators;
