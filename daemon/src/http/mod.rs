//! HTTP client for a running daemon

pub mod client;
