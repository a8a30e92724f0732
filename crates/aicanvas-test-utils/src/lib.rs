//! Test doubles and fixtures shared by the AI Canvas crates.

pub mod fixtures;
pub mod mock_backend;

pub use fixtures::*;
pub use mock_backend::{MockBackend, Scripted};
