//! HTTP middleware for the return server
//!
//! Provides request/response logging with request ids

pub mod logging;
