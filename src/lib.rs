//! Salesdesk - client, opportunity and task tracking
//!
//! A small CRM over a hosted realtime key-value store and identity authority.
//!
//! ## Services
//!
//! - **Records**: typed CRUD for clients, interactions, opportunities and
//!   tasks, with read-time client joins
//! - **Identity**: sign-in state, principal profiles and role checks
//! - **Aggregator**: the signed-in view of all four collections, kept fresh
//!   by pull or push
//! - **Gate**: view access decisions for signed-in and signed-out states
//! - **I18n**: bundled translations with a persisted language preference
//! - **Drafting**: follow-up emails from an OpenAI-compatible API
//! - **Login**: an HTTP endpoint exchanging credentials for a token

pub mod aggregator;
pub mod app;
pub mod auth;
pub mod backend;
pub mod config;
pub mod csv;
pub mod drafting;
pub mod gate;
pub mod i18n;
pub mod identity;
pub mod records;
pub mod routes;
pub mod server;
pub mod types;

pub use app::App;
pub use config::Args;
pub use server::run;
pub use types::{CrmError, Result};
