//! Fraud Query Agent
//!
//! A natural-language query façade over a BigQuery table of fraud records:
//! - Translates free-text requests into SQL through a chat-completion endpoint
//! - Executes SQL on BigQuery and returns rows plus job metadata as envelopes
//! - Runs canned statistics queries per dimension
//! - Exposes all of it as agent tools, in-process or over HTTP
//!
//! FLOW:
//! REQUEST → TRANSLATE → EXECUTE → ENVELOPE

pub mod api;
pub mod config;
pub mod error;
pub mod executor;
pub mod facade;
pub mod llm;
pub mod models;
pub mod schema;
pub mod statistics;
pub mod store;
pub mod tools;
pub mod translator;

pub use error::Result;

// Re-export common types
pub use config::{Config, SubAgent};
pub use facade::FraudQueryFacade;
pub use models::*;
pub use schema::{SchemaDescriptor, TableRef};
