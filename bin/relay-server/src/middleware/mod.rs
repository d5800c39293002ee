//! HTTP middleware stack.
//!
//! - [`trace`] – per-request span and `x-trace-id` propagation.
//! - [`capture`] – transcript validation and reply capture around the
//!   chat-completion route.

pub mod capture;
pub mod trace;
