//! Real-time classroom room synchronization: one instructor drives a shared,
//! paginated view for many students over websockets.

pub mod api;
pub mod catalog;
pub mod classroom;
pub mod client;
pub mod config;
pub mod error;

pub use error::{ClassroomError, Result};
