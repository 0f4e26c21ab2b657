//! Keyed store and identity authority contracts
//!
//! Both collaborators are opaque hosted services. Everything above this module
//! talks to them only through these traits, so the in-process backend, the
//! REST backend and the disabled backend are interchangeable.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::types::Result;

/// Children of a namespace as `(key, value)` pairs, in key order
pub type Children = Vec<(String, Value)>;

/// Sentinel that the store replaces with its own clock at write time
pub fn server_timestamp() -> Value {
    json!({ ".sv": "timestamp" })
}

/// Whether `value` is the server timestamp sentinel
pub fn is_server_timestamp(value: &Value) -> bool {
    value
        .as_object()
        .map(|o| o.len() == 1 && o.get(".sv").and_then(Value::as_str) == Some("timestamp"))
        .unwrap_or(false)
}

/// Generate a unique child key
///
/// Keys sort by creation time: a millisecond prefix followed by random
/// suffix characters.
pub fn generate_key() -> String {
    let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let suffix = Uuid::new_v4().simple().to_string();
    format!("k{:012x}{}", millis, &suffix[..8])
}

/// Join a namespace and a child key
pub fn child_path(namespace: &str, key: &str) -> String {
    format!("{}/{}", namespace.trim_end_matches('/'), key)
}

/// Handle to a live subscription
///
/// Cancelling stops the producer task; snapshots already queued are not
/// delivered once the receiver is dropped.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    task: AbortHandle,
}

impl SubscriptionHandle {
    pub fn new(task: AbortHandle) -> Self {
        Self { task }
    }

    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// A subtree subscription: an initial snapshot followed by one snapshot per
/// change, until cancelled.
pub struct Subscription {
    pub snapshots: mpsc::UnboundedReceiver<Result<Children>>,
    pub handle: SubscriptionHandle,
}

impl Subscription {
    pub fn new(snapshots: mpsc::UnboundedReceiver<Result<Children>>, task: AbortHandle) -> Self {
        Self {
            snapshots,
            handle: SubscriptionHandle::new(task),
        }
    }
}

/// Namespaced read/write/subscribe data backend
#[async_trait]
pub trait KeyedStore: Send + Sync {
    /// Point read. `Ok(None)` when nothing is stored at `path`.
    async fn get(&self, path: &str) -> Result<Option<Value>>;

    /// Subtree read. An empty or missing namespace yields an empty list.
    async fn get_children(&self, namespace: &str) -> Result<Children>;

    /// Replace the value at `path`
    async fn set(&self, path: &str, value: Value) -> Result<()>;

    /// Change only the named fields at `path`
    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()>;

    /// Delete the value at `path`
    async fn remove(&self, path: &str) -> Result<()>;

    /// Subscribe to a namespace
    async fn subscribe(&self, namespace: &str) -> Result<Subscription>;

    /// Allocate a child key without writing anything
    fn push_key(&self, _namespace: &str) -> String {
        generate_key()
    }
}

/// An authenticated session at the identity authority
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub uid: String,
    pub email: String,
    /// Bearer token for the keyed store, where the backend uses one
    pub id_token: Option<String>,
}

/// Identity provider: credential checks, sessions, token minting
#[async_trait]
pub trait IdentityAuthority: Send + Sync {
    /// Check credentials without starting a session. Returns the identity id.
    async fn verify_credentials(&self, email: &str, password: &str) -> Result<String>;

    /// Check credentials and make the identity the current session
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session>;

    /// Terminate the current session
    async fn sign_out(&self) -> Result<()>;

    /// Create a new identity. The current session is unchanged.
    async fn create_identity(&self, email: &str, password: &str) -> Result<String>;

    /// Observe session changes
    fn watch_session(&self) -> watch::Receiver<Option<Session>>;

    /// Mint a bearer token for an identity id
    fn mint_token(&self, uid: &str) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys_are_unique_and_ordered() {
        let a = generate_key();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = generate_key();
        assert_ne!(a, b);
        assert!(a < b);
        assert_eq!(a.len(), 21);
    }

    #[test]
    fn test_server_timestamp_sentinel() {
        assert!(is_server_timestamp(&server_timestamp()));
        assert!(!is_server_timestamp(&json!({ ".sv": "other" })));
        assert!(!is_server_timestamp(&json!(1700000000000u64)));
    }

    #[test]
    fn test_child_path() {
        assert_eq!(child_path("clients", "k1"), "clients/k1");
        assert_eq!(child_path("clients/", "k1"), "clients/k1");
    }
}
