//! Course Architect
//!
//! Ingests heterogeneous course materials (video, slides, text, web pages),
//! normalizes them into a uniform intermediate representation, and drives an
//! LLM through a structured synthesis pass to produce a module/lesson/concept
//! course outline. Served over a multi-tenant HTTP API with API-key auth,
//! scope enforcement, per-tenant rate limiting, and LLM-call cost ledgering.

pub mod architect;
pub mod auth;
pub mod config;
pub mod error;
pub mod ingestion;
pub mod ledger;
pub mod merge;
pub mod persistence;
pub mod ratelimit;
pub mod registry;
pub mod providers;
pub mod retry;
pub mod router;
pub mod server;

pub use config::AppConfig;
pub use error::{CoreError, Result};
