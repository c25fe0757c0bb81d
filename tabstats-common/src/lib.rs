//! # TabStats Common Library
//!
//! Shared code for the TabStats enrichment workspace:
//! - Identity classification (provenance tag of player identifiers)
//! - Event types and the broadcast event bus
//! - Configuration loading and credential resolution
//! - Logging setup
//! - Common error type

pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod logging;

pub use error::{Error, Result};
pub use identity::{Identifier, IdentityKind};
