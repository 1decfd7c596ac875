//! API Routes
//!
//! Route handlers organized by functionality.

pub mod annotations;
pub mod health;
pub mod metrics;
