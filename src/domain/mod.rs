//! Domain model of the group-savings ledger: records, their invariants, and
//! the ports through which the application reaches storage and collaborators.

pub mod approval;
pub mod auth;
pub mod collection;
pub mod event;
pub mod group;
pub mod ids;
pub mod money;
pub mod payment;
pub mod ports;
pub mod saga;
pub mod schedule;
pub mod transaction;
pub mod wallet;
