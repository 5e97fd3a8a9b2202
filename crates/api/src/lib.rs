//! HTTP API: server, routing, and denial-to-response mapping.

pub mod app;
pub mod config;
pub mod middleware;
