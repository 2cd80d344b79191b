//! Shared domain types for Switchyard.
//!
//! This crate contains the values that flow through the gateway: completion
//! requests and chunks, provider descriptors, budget records, dispatch
//! attempts, persisted completion records, configuration and the
//! caller-facing error taxonomy.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod budget;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod llm;
pub mod provider;
pub mod record;
