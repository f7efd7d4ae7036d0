//! End-to-end scenario suite for Satchel.
//!
//! Drives `PayloadManager` and `Payment` against in-memory collaborators:
//! wallet creation and recovery, payload upgrades and their rollback, save
//! error classification, history, and the signing reference vectors.

pub mod helpers;
