//! Unit tests for engine building blocks

mod test_catalog;
mod test_fsm;
mod test_usage;
