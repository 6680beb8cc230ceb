//! HTTP middleware for request authentication.
pub mod auth;
