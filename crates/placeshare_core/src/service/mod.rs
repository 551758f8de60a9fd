//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Keep the cross-store Place↔User writes inside the coordinator.

pub mod coordinator;
pub mod place_service;
pub mod user_service;
