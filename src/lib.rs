//! Formwork: a small server-rendered form service.
//!
//! The two load-bearing pieces are the response-header policy middleware
//! in [`infra::http::headers`] and the template helpers registered by
//! [`presentation::helpers`]; everything else is the configuration,
//! telemetry, and HTTP plumbing that hosts them.

pub mod config;
pub mod error;
pub mod infra;
pub mod presentation;
