//! deployd library
//!
//! Infrastructure deployment orchestrator: drives terraform plan/apply jobs
//! behind a cloud credential gate and tracks them in an in-memory registry.

pub mod app;
pub mod bundle;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod registry;
pub mod server;
pub mod storage;
pub mod utils;
pub mod workers;
