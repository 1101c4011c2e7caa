//! Platform Crate - Technical Infrastructure
//!
//! This crate provides shared technical foundations:
//! - Client identification (IP extraction behind reverse proxies)
//! - Rate limiting infrastructure (sliding window, local and shared backends)
//! - Common middleware components

pub mod client;
pub mod rate_limit;
