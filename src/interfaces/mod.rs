//! Adapters that drive the engine from outside the process.

pub mod csv;
