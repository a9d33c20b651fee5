//! # Middleware Module
//!
//! Middleware intercepts HTTP requests before they reach the handlers.
//!
//! ## Our Middleware
//! - `tenant`: Resolves the tenant of the request from the `x-tenant` header
//! - `api_secret`: Admits backend-only calls that carry the tenant's API secret

pub mod api_secret;
pub mod tenant;
