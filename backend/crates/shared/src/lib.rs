//! Shared Kernel - Domain-crossing minimal core
//!
//! This crate contains the "smallest core" shared by every backend crate:
//! - Unified error types and result aliases
//! - Error classification that maps onto HTTP status codes
//!
//! **Design principle**: only include things that are "hard to change"
//! and have consistent meaning across all domains.

pub mod error {
    pub mod app_error;
    pub mod conversions;
    pub mod kind;
}
