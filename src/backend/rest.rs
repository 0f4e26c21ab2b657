//! Hosted backend over REST
//!
//! The keyed store speaks the realtime-database JSON protocol:
//! `GET/PUT/PATCH/DELETE {base}/{path}.json?auth={token}`, with subscriptions
//! over server-sent events. The identity authority speaks the identity
//! toolkit protocol (`accounts:signInWithPassword`, `accounts:signUp`).

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::store::{Children, IdentityAuthority, KeyedStore, Session, Subscription};
use crate::auth::TokenMinter;
use crate::types::{CrmError, Result};

/// Realtime-database keyed store
#[derive(Clone)]
pub struct RestKeyedStore {
    client: Client,
    base_url: String,
    session: watch::Receiver<Option<Session>>,
}

impl RestKeyedStore {
    /// `session` supplies the bearer token for each request
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        session: watch::Receiver<Option<Session>>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
        }
    }

    fn url(&self, path: &str) -> String {
        let mut url = format!("{}/{}.json", self.base_url, path.trim_matches('/'));
        let token = self
            .session
            .borrow()
            .as_ref()
            .and_then(|s| s.id_token.clone());
        if let Some(token) = token {
            url.push_str("?auth=");
            url.push_str(&urlencoding::encode(&token));
        }
        url
    }

    async fn write(&self, request: reqwest::RequestBuilder, path: &str) -> Result<()> {
        let response = request
            .send()
            .await
            .map_err(|e| CrmError::BackendWrite(format!("{}: {}", path, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CrmError::BackendWrite(format!("{}: HTTP {}", path, status)));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyedStore for RestKeyedStore {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| CrmError::BackendRead(format!("{}: {}", path, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(CrmError::BackendRead(format!("{}: HTTP {}", path, status)));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| CrmError::BackendRead(format!("{}: {}", path, e)))?;
        Ok((!value.is_null()).then_some(value))
    }

    async fn get_children(&self, namespace: &str) -> Result<Children> {
        match self.get(namespace).await? {
            Some(Value::Object(children)) => Ok(children.into_iter().collect()),
            Some(other) => Err(CrmError::BackendRead(format!(
                "{}: expected an object, got {}",
                namespace, other
            ))),
            None => Ok(Vec::new()),
        }
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        self.write(self.client.put(self.url(path)).json(&value), path)
            .await
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        self.write(self.client.patch(self.url(path)).json(&fields), path)
            .await
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.write(self.client.delete(self.url(path)), path).await
    }

    async fn subscribe(&self, namespace: &str) -> Result<Subscription> {
        let response = self
            .client
            .get(self.url(namespace))
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| CrmError::BackendRead(format!("{}: {}", namespace, e)))?;
        if !response.status().is_success() {
            return Err(CrmError::BackendRead(format!(
                "{}: subscribe HTTP {}",
                namespace,
                response.status()
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let store = self.clone();
        let namespace = namespace.to_string();

        let task = tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut parser = SseParser::default();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(Err(CrmError::BackendRead(format!(
                            "{}: stream error: {}",
                            namespace, e
                        ))));
                        return;
                    }
                };

                for event in parser.feed(&chunk) {
                    match event.as_str() {
                        "put" | "patch" => {
                            // Events carry deltas; re-read the namespace for a full snapshot
                            let snapshot = store.get_children(&namespace).await;
                            if tx.send(snapshot).is_err() {
                                return;
                            }
                        }
                        "cancel" | "auth_revoked" => {
                            warn!("subscription to {} ended by server: {}", namespace, event);
                            let _ = tx.send(Err(CrmError::BackendRead(format!(
                                "{}: subscription {}",
                                namespace, event
                            ))));
                            return;
                        }
                        _ => {}
                    }
                }
            }
            debug!("event stream for {} closed", namespace);
        });

        Ok(Subscription::new(rx, task.abort_handle()))
    }
}

/// Incremental server-sent-events parser that yields event names
///
/// Bytes are buffered until a full line arrives, so a character split
/// across chunks decodes intact.
#[derive(Debug, Default)]
struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
}

impl SseParser {
    fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut dispatched = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\r', '\n']);

            if line.is_empty() {
                if let Some(event) = self.event.take() {
                    dispatched.push(event);
                }
            } else if let Some(name) = line.strip_prefix("event:") {
                self.event = Some(name.trim().to_string());
            }
        }
        dispatched
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    local_id: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    id_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ToolkitError {
    error: ToolkitErrorBody,
}

#[derive(Debug, Deserialize)]
struct ToolkitErrorBody {
    message: String,
}

/// Identity-toolkit authority
pub struct RestIdentityAuthority {
    client: Client,
    identity_url: String,
    api_key: String,
    session: watch::Sender<Option<Session>>,
    minter: TokenMinter,
}

impl RestIdentityAuthority {
    pub fn new(
        client: Client,
        identity_url: impl Into<String>,
        api_key: impl Into<String>,
        minter: TokenMinter,
    ) -> Self {
        Self {
            client,
            identity_url: identity_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            session: watch::Sender::new(None),
            minter,
        }
    }

    async fn call(&self, action: &str, email: &str, password: &str) -> Result<AccountResponse> {
        let url = format!(
            "{}/v1/accounts:{}?key={}",
            self.identity_url,
            action,
            urlencoding::encode(&self.api_key)
        );
        let response = self
            .client
            .post(url)
            .json(&json!({
                "email": email,
                "password": password,
                "returnSecureToken": true,
            }))
            .send()
            .await
            .map_err(|e| CrmError::Internal(format!("identity authority unreachable: {}", e)))?;

        if response.status().is_success() {
            return response
                .json::<AccountResponse>()
                .await
                .map_err(|e| CrmError::Internal(format!("identity response: {}", e)));
        }

        let status = response.status();
        match response.json::<ToolkitError>().await {
            Ok(err) => Err(CrmError::auth_code(&err.error.message)),
            Err(_) => Err(CrmError::Internal(format!("identity authority HTTP {}", status))),
        }
    }
}

#[async_trait]
impl IdentityAuthority for RestIdentityAuthority {
    async fn verify_credentials(&self, email: &str, password: &str) -> Result<String> {
        Ok(self.call("signInWithPassword", email, password).await?.local_id)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let account = self.call("signInWithPassword", email, password).await?;
        let session = Session {
            uid: account.local_id,
            email: if account.email.is_empty() {
                email.to_string()
            } else {
                account.email
            },
            id_token: account.id_token,
        };
        self.session.send_replace(Some(session.clone()));
        info!("identity authority: session started for {}", session.email);
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        self.session.send_replace(None);
        Ok(())
    }

    async fn create_identity(&self, email: &str, password: &str) -> Result<String> {
        Ok(self.call("signUp", email, password).await?.local_id)
    }

    fn watch_session(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }

    fn mint_token(&self, uid: &str) -> Result<String> {
        self.minter.mint(uid)
    }
}
