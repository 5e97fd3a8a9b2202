//! `gatekeep-core`: identifiers and the domain error shared by every layer.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{OrganizationId, RoleId, UserId};
