//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate config, resolver, executor and propagation into the public
//!   vote API.
//! - Keep callers decoupled from storage details.

pub mod vote_service;
