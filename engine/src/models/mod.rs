//! Data models

pub mod deployment;
pub mod tool;
pub mod usage;
