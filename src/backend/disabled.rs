//! Backend used when configuration is missing or invalid
//!
//! Every operation fails fast with a configuration error; the application
//! keeps running with backend-dependent features non-functional.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::watch;

use super::store::{Children, IdentityAuthority, KeyedStore, Session, Subscription};
use crate::types::{CrmError, Result};

pub struct DisabledBackend {
    reason: String,
    session: watch::Sender<Option<Session>>,
}

impl DisabledBackend {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            session: watch::Sender::new(None),
        }
    }

    fn fail<T>(&self) -> Result<T> {
        Err(CrmError::Configuration(format!(
            "backend not configured: {}",
            self.reason
        )))
    }
}

#[async_trait]
impl KeyedStore for DisabledBackend {
    async fn get(&self, _path: &str) -> Result<Option<Value>> {
        self.fail()
    }

    async fn get_children(&self, _namespace: &str) -> Result<Children> {
        self.fail()
    }

    async fn set(&self, _path: &str, _value: Value) -> Result<()> {
        self.fail()
    }

    async fn update(&self, _path: &str, _fields: Map<String, Value>) -> Result<()> {
        self.fail()
    }

    async fn remove(&self, _path: &str) -> Result<()> {
        self.fail()
    }

    async fn subscribe(&self, _namespace: &str) -> Result<Subscription> {
        self.fail()
    }
}

#[async_trait]
impl IdentityAuthority for DisabledBackend {
    async fn verify_credentials(&self, _email: &str, _password: &str) -> Result<String> {
        self.fail()
    }

    async fn sign_in(&self, _email: &str, _password: &str) -> Result<Session> {
        self.fail()
    }

    async fn sign_out(&self) -> Result<()> {
        self.fail()
    }

    async fn create_identity(&self, _email: &str, _password: &str) -> Result<String> {
        self.fail()
    }

    /// Never produces a session
    fn watch_session(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }

    fn mint_token(&self, _uid: &str) -> Result<String> {
        self.fail()
    }
}
