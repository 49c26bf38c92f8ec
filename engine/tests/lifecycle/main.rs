//! Deployment lifecycle tests: deploy, health, restart, stop, recovery

#[path = "../support/mod.rs"]
mod support;

mod test_health;
mod test_recovery;
