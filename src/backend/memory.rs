//! In-process backend
//!
//! Used in dev mode and by tests. The keyed store keeps one JSON object per
//! top-level namespace and broadcasts the namespace name on every write so
//! subscriptions can re-read it.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info};

use super::store::{
    is_server_timestamp, Children, IdentityAuthority, KeyedStore, Session, Subscription,
};
use crate::auth::{LoginRateLimiter, StoredCredential, TokenMinter, MIN_PASSWORD_LEN};
use crate::types::{looks_like_email, AuthErrorKind, CrmError, Result};

/// Change notification channel depth
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Injected failure for a namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Read,
    Write,
}

/// In-memory keyed store
#[derive(Clone)]
pub struct MemoryKeyedStore {
    data: Arc<DashMap<String, Value>>,
    changes: broadcast::Sender<String>,
    faults: Arc<DashMap<String, Fault>>,
}

impl Default for MemoryKeyedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKeyedStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            data: Arc::new(DashMap::new()),
            changes,
            faults: Arc::new(DashMap::new()),
        }
    }

    /// Make every read or write under `namespace` fail until cleared
    pub fn inject_fault(&self, namespace: &str, fault: Fault) {
        self.faults.insert(namespace.to_string(), fault);
    }

    pub fn clear_fault(&self, namespace: &str) {
        self.faults.remove(namespace);
    }

    fn check(&self, namespace: &str, op: Fault) -> Result<()> {
        match self.faults.get(namespace).map(|f| *f) {
            Some(Fault::Read) if op == Fault::Read => Err(CrmError::BackendRead(format!(
                "injected read failure for '{}'",
                namespace
            ))),
            Some(Fault::Write) if op == Fault::Write => Err(CrmError::BackendWrite(format!(
                "injected write failure for '{}'",
                namespace
            ))),
            _ => Ok(()),
        }
    }

    fn notify(&self, namespace: &str) {
        // No receivers is fine
        let _ = self.changes.send(namespace.to_string());
    }

    fn read_children(data: &DashMap<String, Value>, namespace: &str) -> Children {
        match data.get(namespace).as_deref() {
            Some(Value::Object(children)) => children
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Split `ns/a/b` into `("ns", ["a", "b"])`
fn split_path(path: &str) -> Result<(&str, Vec<&str>)> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    let namespace = segments
        .next()
        .ok_or_else(|| CrmError::BadRequest(format!("invalid store path '{}'", path)))?;
    Ok((namespace, segments.collect()))
}

/// Replace server timestamp sentinels with the current time in milliseconds
fn resolve_sentinels(value: &mut Value, now_ms: i64) {
    if is_server_timestamp(value) {
        *value = Value::from(now_ms);
        return;
    }
    match value {
        Value::Object(map) => map.values_mut().for_each(|v| resolve_sentinels(v, now_ms)),
        Value::Array(items) => items.iter_mut().for_each(|v| resolve_sentinels(v, now_ms)),
        _ => {}
    }
}

/// Walk to the object at `segments`, creating empty objects along the way
fn walk_mut<'a>(root: &'a mut Value, segments: &[&str]) -> &'a mut Value {
    let mut node = root;
    for segment in segments {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(map) => map.entry(segment.to_string()).or_insert(Value::Null),
            other => other,
        };
    }
    node
}

#[async_trait]
impl KeyedStore for MemoryKeyedStore {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let (namespace, rest) = split_path(path)?;
        self.check(namespace, Fault::Read)?;

        let Some(root) = self.data.get(namespace) else {
            return Ok(None);
        };
        let mut node: &Value = &root;
        for segment in rest {
            match node.get(segment) {
                Some(child) => node = child,
                None => return Ok(None),
            }
        }
        Ok((!node.is_null()).then(|| node.clone()))
    }

    async fn get_children(&self, namespace: &str) -> Result<Children> {
        let namespace = namespace.trim_matches('/');
        self.check(namespace, Fault::Read)?;
        Ok(Self::read_children(&self.data, namespace))
    }

    async fn set(&self, path: &str, mut value: Value) -> Result<()> {
        let (namespace, rest) = split_path(path)?;
        self.check(namespace, Fault::Write)?;
        resolve_sentinels(&mut value, chrono::Utc::now().timestamp_millis());

        {
            let mut root = self
                .data
                .entry(namespace.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            *walk_mut(&mut root, &rest) = value;
        }
        debug!("memory store: set {}", path);
        self.notify(namespace);
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        let (namespace, rest) = split_path(path)?;
        self.check(namespace, Fault::Write)?;
        let now = chrono::Utc::now().timestamp_millis();

        {
            let mut root = self
                .data
                .entry(namespace.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            let target = walk_mut(&mut root, &rest);
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            if let Some(obj) = target.as_object_mut() {
                for (key, mut value) in fields {
                    if value.is_null() {
                        obj.remove(&key);
                    } else {
                        resolve_sentinels(&mut value, now);
                        obj.insert(key, value);
                    }
                }
            }
        }
        debug!("memory store: update {}", path);
        self.notify(namespace);
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let (namespace, rest) = split_path(path)?;
        self.check(namespace, Fault::Write)?;

        match rest.split_last() {
            None => {
                self.data.remove(namespace);
            }
            Some((last, parents)) => {
                if let Some(mut root) = self.data.get_mut(namespace) {
                    let mut node: &mut Value = &mut root;
                    for segment in parents {
                        node = match node.get_mut(*segment) {
                            Some(child) => child,
                            None => return Ok(()),
                        };
                    }
                    if let Some(obj) = node.as_object_mut() {
                        obj.remove(*last);
                    }
                }
            }
        }
        debug!("memory store: remove {}", path);
        self.notify(namespace);
        Ok(())
    }

    async fn subscribe(&self, namespace: &str) -> Result<Subscription> {
        let namespace = namespace.trim_matches('/').to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut changes = self.changes.subscribe();
        let store = self.clone();

        let task = tokio::spawn(async move {
            let snapshot = |store: &MemoryKeyedStore| {
                store
                    .check(&namespace, Fault::Read)
                    .map(|_| Self::read_children(&store.data, &namespace))
            };

            if tx.send(snapshot(&store)).is_err() {
                return;
            }
            loop {
                match changes.recv().await {
                    Ok(changed) if changed == namespace => {}
                    Ok(_) => continue,
                    // Missed notifications collapse into one fresh snapshot
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                if tx.send(snapshot(&store)).is_err() {
                    break;
                }
            }
        });

        Ok(Subscription::new(rx, task.abort_handle()))
    }
}

struct Account {
    uid: String,
    credential: StoredCredential,
}

/// In-memory identity authority
pub struct MemoryIdentityAuthority {
    accounts: DashMap<String, Account>,
    session: watch::Sender<Option<Session>>,
    limiter: LoginRateLimiter,
    minter: TokenMinter,
}

impl MemoryIdentityAuthority {
    pub fn new(minter: TokenMinter, max_attempts_per_minute: u32) -> Self {
        Self {
            accounts: DashMap::new(),
            session: watch::Sender::new(None),
            limiter: LoginRateLimiter::new(60, max_attempts_per_minute),
            minter,
        }
    }

    fn account_key(email: &str) -> String {
        email.trim().to_lowercase()
    }
}

#[async_trait]
impl IdentityAuthority for MemoryIdentityAuthority {
    async fn verify_credentials(&self, email: &str, password: &str) -> Result<String> {
        if !looks_like_email(email) {
            return Err(CrmError::Auth(AuthErrorKind::InvalidEmail));
        }
        let key = Self::account_key(email);
        if !self.limiter.check_and_record(&key) {
            return Err(CrmError::Auth(AuthErrorKind::TooManyAttempts));
        }

        let account = self
            .accounts
            .get(&key)
            .ok_or(CrmError::Auth(AuthErrorKind::InvalidCredentials))?;
        if !account.credential.matches(password)? {
            return Err(CrmError::Auth(AuthErrorKind::InvalidCredentials));
        }

        self.limiter.reset(&key);
        Ok(account.uid.clone())
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let uid = self.verify_credentials(email, password).await?;
        let session = Session {
            uid,
            email: email.trim().to_string(),
            id_token: None,
        };
        self.session.send_replace(Some(session.clone()));
        info!("memory authority: session started for {}", session.email);
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        self.session.send_replace(None);
        Ok(())
    }

    async fn create_identity(&self, email: &str, password: &str) -> Result<String> {
        if !looks_like_email(email) {
            return Err(CrmError::Auth(AuthErrorKind::InvalidEmail));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(CrmError::Auth(AuthErrorKind::Generic));
        }

        let key = Self::account_key(email);
        if self.accounts.contains_key(&key) {
            return Err(CrmError::auth_code("auth/email-already-in-use"));
        }

        let uid = uuid::Uuid::new_v4().simple().to_string();
        let credential = StoredCredential::new(email.trim(), password)?;
        self.accounts.insert(
            key,
            Account {
                uid: uid.clone(),
                credential,
            },
        );
        info!("memory authority: created identity {}", uid);
        Ok(uid)
    }

    fn watch_session(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }

    fn mint_token(&self, uid: &str) -> Result<String> {
        self.minter.mint(uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::store::server_timestamp;
    use serde_json::json;

    fn authority() -> MemoryIdentityAuthority {
        MemoryIdentityAuthority::new(TokenMinter::new_dev(), 5)
    }

    #[tokio::test]
    async fn test_point_and_subtree_reads() {
        let store = MemoryKeyedStore::new();
        assert!(store.get_children("clients").await.unwrap().is_empty());
        assert!(store.get("clients/missing").await.unwrap().is_none());

        store
            .set("clients/c1", json!({ "companyName": "Acme" }))
            .await
            .unwrap();
        store
            .set("clients/c2", json!({ "companyName": "Globex" }))
            .await
            .unwrap();

        let children = store.get_children("clients").await.unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].0, "c1");
        assert_eq!(
            store.get("clients/c2/companyName").await.unwrap(),
            Some(json!("Globex"))
        );
    }

    #[tokio::test]
    async fn test_update_only_named_fields() {
        let store = MemoryKeyedStore::new();
        store
            .set("tasks/t1", json!({ "title": "Call", "status": "open" }))
            .await
            .unwrap();

        let mut fields = Map::new();
        fields.insert("status".into(), json!("closed"));
        store.update("tasks/t1", fields).await.unwrap();

        assert_eq!(
            store.get("tasks/t1").await.unwrap(),
            Some(json!({ "title": "Call", "status": "closed" }))
        );
    }

    #[tokio::test]
    async fn test_server_timestamp_resolved() {
        let store = MemoryKeyedStore::new();
        store
            .set("clients/c1", json!({ "createdAt": server_timestamp() }))
            .await
            .unwrap();
        let value = store.get("clients/c1/createdAt").await.unwrap().unwrap();
        assert!(value.as_i64().unwrap() > 1_600_000_000_000);
    }

    #[tokio::test]
    async fn test_remove() {
        let store = MemoryKeyedStore::new();
        store.set("clients/c1", json!({ "a": 1 })).await.unwrap();
        store.remove("clients/c1").await.unwrap();
        assert!(store.get("clients/c1").await.unwrap().is_none());
        // Removing something absent is not an error
        store.remove("clients/c1").await.unwrap();
    }

    #[tokio::test]
    async fn test_subscription_delivers_changes_until_cancelled() {
        let store = MemoryKeyedStore::new();
        let mut sub = store.subscribe("clients").await.unwrap();

        let first = sub.snapshots.recv().await.unwrap().unwrap();
        assert!(first.is_empty());

        store.set("clients/c1", json!({ "a": 1 })).await.unwrap();
        let second = sub.snapshots.recv().await.unwrap().unwrap();
        assert_eq!(second.len(), 1);

        // Writes elsewhere do not wake this subscription
        store.set("tasks/t1", json!({ "a": 1 })).await.unwrap();
        sub.handle.cancel();
        tokio::task::yield_now().await;
        store.set("clients/c2", json!({ "a": 2 })).await.unwrap();

        // Producer is gone; the channel drains to None
        let mut rest = Vec::new();
        while let Some(item) = sub.snapshots.recv().await {
            rest.push(item);
        }
        assert!(rest.iter().all(|s| s.as_ref().map(|c| c.len() < 2).unwrap_or(true)));
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let store = MemoryKeyedStore::new();
        store.inject_fault("clients", Fault::Read);
        assert!(matches!(
            store.get_children("clients").await,
            Err(CrmError::BackendRead(_))
        ));
        store.clear_fault("clients");
        assert!(store.get_children("clients").await.is_ok());

        store.inject_fault("users", Fault::Write);
        assert!(matches!(
            store.set("users/u1", json!({})).await,
            Err(CrmError::BackendWrite(_))
        ));
    }

    #[tokio::test]
    async fn test_sign_in_and_out() {
        let authority = authority();
        let uid = authority
            .create_identity("ana@example.com", "secret-pass")
            .await
            .unwrap();
        let mut rx = authority.watch_session();
        assert!(rx.borrow().is_none());

        let session = authority
            .sign_in("Ana@Example.com", "secret-pass")
            .await
            .unwrap();
        assert_eq!(session.uid, uid);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_ref().map(|s| s.uid.clone()), Some(uid));

        authority.sign_out().await.unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_none());
    }

    #[tokio::test]
    async fn test_credential_errors() {
        let authority = authority();
        authority
            .create_identity("ana@example.com", "secret-pass")
            .await
            .unwrap();

        let err = authority
            .verify_credentials("ana@example.com", "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, CrmError::Auth(AuthErrorKind::InvalidCredentials)));

        let err = authority
            .verify_credentials("not-an-email", "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, CrmError::Auth(AuthErrorKind::InvalidEmail)));

        let err = authority
            .create_identity("ana@example.com", "another-pass")
            .await
            .unwrap_err();
        assert!(matches!(err, CrmError::Auth(AuthErrorKind::Generic)));
    }

    #[tokio::test]
    async fn test_rate_limited_after_repeated_failures() {
        let authority = MemoryIdentityAuthority::new(TokenMinter::new_dev(), 2);
        authority
            .create_identity("ana@example.com", "secret-pass")
            .await
            .unwrap();

        for _ in 0..2 {
            let _ = authority.verify_credentials("ana@example.com", "bad").await;
        }
        let err = authority
            .verify_credentials("ana@example.com", "secret-pass")
            .await
            .unwrap_err();
        assert!(matches!(err, CrmError::Auth(AuthErrorKind::TooManyAttempts)));
    }
}
