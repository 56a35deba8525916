//! Core domain types and utilities for fleetdesk.
//!
//! This crate provides the identifier types and the error-handling
//! foundation shared by the fleetdesk management backend.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ParseIdError, ThirdLinkId, UserId, UserTokenId};
