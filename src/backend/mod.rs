//! External collaborators: the keyed store and the identity authority
//!
//! A single [`BackendConfig`] decides once, at startup, which implementation
//! backs both traits.

pub mod disabled;
pub mod memory;
pub mod rest;
pub mod store;

use std::sync::Arc;
use tracing::{error, info};

pub use disabled::DisabledBackend;
pub use memory::{Fault, MemoryIdentityAuthority, MemoryKeyedStore};
pub use rest::{RestIdentityAuthority, RestKeyedStore};
pub use store::{
    child_path, generate_key, server_timestamp, Children, IdentityAuthority, KeyedStore,
    Session, Subscription, SubscriptionHandle,
};

use crate::auth::TokenMinter;
use crate::config::BackendConfig;

/// The pair of collaborators every service is built from
#[derive(Clone)]
pub struct Backend {
    pub store: Arc<dyn KeyedStore>,
    pub identity: Arc<dyn IdentityAuthority>,
    pub mode: &'static str,
}

impl Backend {
    pub fn from_config(config: &BackendConfig, minter: TokenMinter, login_rate_limit: u32) -> Self {
        match config {
            BackendConfig::Memory => {
                info!("Using in-process backend");
                Self::memory(
                    Arc::new(MemoryKeyedStore::new()),
                    Arc::new(MemoryIdentityAuthority::new(minter, login_rate_limit)),
                )
            }
            BackendConfig::Rest {
                database_url,
                identity_url,
                api_key,
            } => {
                info!("Using hosted backend at {}", database_url);
                let client = reqwest::Client::new();
                let identity = Arc::new(RestIdentityAuthority::new(
                    client.clone(),
                    identity_url.clone(),
                    api_key.clone(),
                    minter,
                ));
                let store = Arc::new(RestKeyedStore::new(
                    client,
                    database_url.clone(),
                    identity.watch_session(),
                ));
                Self {
                    store,
                    identity,
                    mode: "hosted",
                }
            }
            BackendConfig::Disabled(reason) => {
                error!("Backend disabled: {}", reason);
                let disabled = Arc::new(DisabledBackend::new(reason.clone()));
                Self {
                    store: disabled.clone(),
                    identity: disabled,
                    mode: "disabled",
                }
            }
        }
    }

    /// In-process backend from explicit parts (dev mode and tests)
    pub fn memory(store: Arc<MemoryKeyedStore>, identity: Arc<MemoryIdentityAuthority>) -> Self {
        Self {
            store,
            identity,
            mode: "memory",
        }
    }
}
