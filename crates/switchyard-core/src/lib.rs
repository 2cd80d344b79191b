//! Gateway logic for Switchyard.
//!
//! This crate defines the provider contract and the "ports" (budget store,
//! completion sink, attempt sink) that the infrastructure layer implements,
//! plus everything that coordinates them: registry resolution, the budget
//! ledger, failover/race dispatch, the stream relay and the gateway facade.
//! It depends only on `switchyard-types` -- never on `switchyard-infra` or
//! any database/IO crate.

pub mod budget;
pub mod dispatch;
pub mod gateway;
pub mod llm;
pub mod persistence;
pub mod relay;

#[cfg(test)]
pub(crate) mod test_support;
