//! Wire models for the toolhost HTTP API

pub mod models;
