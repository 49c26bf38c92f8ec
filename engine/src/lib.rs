//! toolhost engine library
//!
//! Deploys tool services on demand, supervises their processes, keeps their
//! health in check and routes traffic to them by tool slug.

pub mod app;
pub mod catalog;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod routing;
pub mod server;
pub mod storage;
pub mod utils;
pub mod workers;
