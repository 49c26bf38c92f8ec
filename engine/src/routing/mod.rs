//! Request routing to deployed tools

pub mod headers;
pub mod router;

pub use router::{RequestRouter, RoutedRequest, RoutedResponse, RouterOptions};
