//! strato-lib: Core types and logic for strato
//!
//! This crate provides the reconciliation engine for declarative
//! infrastructure graphs:
//! - `ResourceSpec`: desired state of a single externally-managed resource
//! - `ResourceGraph`: dependency DAG built from explicit and inferred edges
//! - `Plan`: ordered create/update/noop/reuse actions per resource
//! - execution against a pluggable `ResourceBackend`, with per-resource
//!   apply records for idempotent re-runs

pub mod backend;
pub mod config;
pub mod execute;
pub mod graph;
pub mod plan;
pub mod resource;
pub mod state;
