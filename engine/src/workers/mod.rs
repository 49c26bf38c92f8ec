//! Background workers

pub mod health;
pub mod usage;
