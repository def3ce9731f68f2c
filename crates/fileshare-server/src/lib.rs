//! File sharing server library
//!
//! HTTP routes and configuration around the ephemeral blob store.

pub mod error;
pub mod server;
pub mod types;

pub use error::{AppError, Result, ServerError};
pub use server::{create_router, start_server, ServerState, SharedState};
pub use types::*;
