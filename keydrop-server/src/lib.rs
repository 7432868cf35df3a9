//! Keydrop Server Library
//!
//! This library exposes the server's modules to the `keydropd` binary and
//! to integration tests.

pub mod args;
pub mod config;
pub mod connection;
pub mod connection_tracker;
pub mod constants;
pub mod db;
pub mod error;
pub mod hub;
pub mod server;
pub mod store;
pub mod transfers;
pub mod websocket;
