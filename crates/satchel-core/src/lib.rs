//! # satchel-core
//! Foundation types and collaborator traits for the Satchel wallet.

pub mod config;
pub mod constants;
pub mod error;
pub mod traits;
pub mod types;
