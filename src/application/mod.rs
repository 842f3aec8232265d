//! Application layer: the `LedgerEngine` and the operations it exposes.
//!
//! Every operation is an async method on the engine. Multi-step money
//! movements run as journaled sagas so that a failure part-way through is
//! either undone or left visible for reconciliation.

pub mod engine;
pub mod funding;
pub mod groups;
mod saga;
pub mod webhook;
