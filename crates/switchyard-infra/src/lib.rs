//! Infrastructure layer for Switchyard.
//!
//! Implements the ports defined in `switchyard-core`: SQLite-backed budget
//! and completion stores, the `gateway.toml` loader, and the scripted
//! provider used to simulate upstream LLM APIs.

pub mod config;
pub mod llm;
pub mod sqlite;
