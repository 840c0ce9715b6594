//! Service Reminder API Library
//!
//! Locates a customer's vehicle record in a spreadsheet, derives service and
//! offer signals from it, has a completion backend write a reminder, and
//! stores the result.
//!
//! # Modules
//!
//! - `api`: API definitions.
//! - `core`: Core business logic.
//! - `integrations`: External service integrations.
//! - `composer`: Prompt construction and message generation.
//! - `config`: Configuration management.
//! - `dataset`: Spreadsheet loading and write-back.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `llm_client`: Chat-completion client.
//! - `locator`: Record lookup by VIN or customer id.
//! - `models`: Core data models.
//! - `persistence`: Message sinks.
//! - `pipeline`: Shared reminder workflow.
//! - `resilience`: Circuit breaker and retry policy.
//! - `signals`: Due sensors and offer eligibility.

pub mod api;
pub mod core;
pub mod integrations;

// Re-export primary modules for shared use in tests and other binaries
pub mod composer;
pub mod config;
pub mod dataset;
pub mod errors;
pub mod handlers;
pub mod llm_client;
pub mod locator;
pub mod models;
pub mod persistence;
pub mod pipeline;
pub mod resilience;
pub mod signals;
