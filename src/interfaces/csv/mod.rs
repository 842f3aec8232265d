//! CSV command scripts in, wallet balances out.

pub mod command_reader;
pub mod script;
pub mod wallet_writer;
