//! Server-side request bookkeeping.

pub mod requests;

pub use requests::{LiveRequestGuard, LiveRequests};
