//! Identity store
//!
//! Tracks the signed-in principal. Session changes from the identity
//! authority are resolved against `users/{id}` by one listener task that
//! lives as long as the store; subscribers only ever see a fully populated
//! [`Principal`]. A session without a profile is treated as orphaned and
//! signed out.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::auth::MIN_PASSWORD_LEN;
use crate::backend::{child_path, IdentityAuthority, KeyedStore, Session};
use crate::gate::{Navigator, View};
use crate::records::{Principal, Profile, Role};
use crate::types::{looks_like_email, CrmError, FieldError, Result};

const USERS: &str = "users";

/// Authentication status as seen by the rest of the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// Startup, or a session whose profile is still being resolved
    Checking,
    SignedOut,
    SignedIn(Principal),
}

impl AuthState {
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Self::SignedIn(principal) => Some(principal),
            _ => None,
        }
    }
}

/// Fields for a new principal. The password is only passed to the authority.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPrincipal {
    pub email: String,
    pub password: String,
    pub username: String,
    pub name: String,
    #[serde(default)]
    pub role: Role,
}

impl NewPrincipal {
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if !looks_like_email(&self.email) {
            errors.push(FieldError::new("email", "invalid email address"));
        }
        if self.password.len() < MIN_PASSWORD_LEN {
            errors.push(FieldError::new(
                "password",
                format!("must be at least {} characters", MIN_PASSWORD_LEN),
            ));
        }
        if self.username.trim().is_empty() {
            errors.push(FieldError::new("username", "required"));
        }
        errors
    }

    fn profile(&self) -> Profile {
        Profile {
            username: self.username.clone(),
            name: self.name.clone(),
            email: self.email.trim().to_string(),
            role: self.role,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfileUpdate<'a> {
    username: &'a str,
    name: &'a str,
    email: &'a str,
    role: Role,
}

pub struct IdentityStore {
    authority: Arc<dyn IdentityAuthority>,
    store: Arc<dyn KeyedStore>,
    navigator: Arc<dyn Navigator>,
    state: Arc<watch::Sender<AuthState>>,
    listener: OnceLock<AbortHandle>,
}

impl IdentityStore {
    pub fn new(
        authority: Arc<dyn IdentityAuthority>,
        store: Arc<dyn KeyedStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            authority,
            store,
            navigator,
            state: Arc::new(watch::Sender::new(AuthState::Checking)),
            listener: OnceLock::new(),
        }
    }

    /// Observe the resolved principal. Starts the session listener on first use.
    pub fn observe_session(&self) -> watch::Receiver<AuthState> {
        self.listener.get_or_init(|| self.spawn_listener());
        self.state.subscribe()
    }

    pub fn current(&self) -> AuthState {
        self.state.borrow().clone()
    }

    fn spawn_listener(&self) -> AbortHandle {
        let authority = self.authority.clone();
        let store = self.store.clone();
        let state = self.state.clone();

        let task = tokio::spawn(async move {
            let mut sessions = authority.watch_session();
            loop {
                let session = sessions.borrow_and_update().clone();
                match session {
                    None => {
                        state.send_replace(AuthState::SignedOut);
                    }
                    Some(session) => {
                        state.send_replace(AuthState::Checking);
                        let resolved = resolve_principal(store.as_ref(), &session).await;
                        // A newer session supersedes this resolution
                        if sessions.has_changed().unwrap_or(false) {
                            debug!("session changed during profile lookup for {}", session.uid);
                        } else {
                            match resolved {
                                Ok(principal) => {
                                    info!("Signed in as {} ({})", principal.username, principal.id);
                                    state.send_replace(AuthState::SignedIn(principal));
                                }
                                Err(e) => {
                                    warn!("Signing out {}: {}", session.uid, e);
                                    if let Err(e) = authority.sign_out().await {
                                        warn!("forced sign-out failed: {}", e);
                                    }
                                    state.send_replace(AuthState::SignedOut);
                                }
                            }
                        }
                    }
                }
                if sessions.changed().await.is_err() {
                    break;
                }
            }
        });
        task.abort_handle()
    }

    /// Sign in and wait for the principal to resolve.
    ///
    /// Credentials are checked by the authority. An identity without a
    /// profile authenticates there but fails here and is signed out.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Principal> {
        let mut states = self.observe_session();
        let session = self.authority.sign_in(email, password).await?;
        let sessions = self.authority.watch_session();

        loop {
            if states.changed().await.is_err() {
                return Err(CrmError::Internal("identity listener stopped".into()));
            }
            let state = states.borrow_and_update().clone();
            match state {
                AuthState::SignedIn(principal) if principal.id == session.uid => {
                    return Ok(principal)
                }
                AuthState::SignedOut => {
                    let still_active = sessions
                        .borrow()
                        .as_ref()
                        .map(|s| s.uid == session.uid)
                        .unwrap_or(false);
                    if !still_active {
                        return Err(CrmError::NotFound(format!(
                            "no profile for identity {}",
                            session.uid
                        )));
                    }
                }
                _ => {}
            }
        }
    }

    /// End the session and redirect to the login view
    pub async fn sign_out(&self) -> Result<()> {
        self.authority.sign_out().await?;
        self.state.send_replace(AuthState::SignedOut);
        self.navigator.navigate(View::Login);
        Ok(())
    }

    /// Create an identity, then its profile.
    ///
    /// A profile write failure leaves an identity without a profile; it is
    /// reported, not repaired.
    pub async fn create_principal(&self, input: &NewPrincipal) -> Result<String> {
        let errors = input.validate();
        if !errors.is_empty() {
            return Err(CrmError::Validation(errors));
        }

        let id = self
            .authority
            .create_identity(&input.email, &input.password)
            .await?;
        let profile = serde_json::to_value(input.profile())?;
        if let Err(e) = self.store.set(&child_path(USERS, &id), profile).await {
            warn!("Identity {} created without a profile: {}", id, e);
            return Err(e);
        }
        info!("Created principal {} ({})", input.username, id);
        Ok(id)
    }

    /// Update profile fields. The authority's email is not changed.
    pub async fn update_principal(&self, principal: &Principal) -> Result<()> {
        let update = ProfileUpdate {
            username: &principal.username,
            name: &principal.name,
            email: &principal.email,
            role: principal.role,
        };
        let fields = match serde_json::to_value(update)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.store
            .update(&child_path(USERS, &principal.id), fields)
            .await
    }

    /// Remove the profile only; the identity itself survives
    pub async fn delete_principal(&self, id: &str) -> Result<()> {
        self.store.remove(&child_path(USERS, id)).await?;
        info!("Deleted profile {}", id);
        Ok(())
    }

    pub async fn list_principals(&self) -> Result<Vec<Principal>> {
        let children = self.store.get_children(USERS).await?;
        Ok(children
            .into_iter()
            .filter_map(|(id, raw)| match serde_json::from_value::<Profile>(raw) {
                Ok(profile) => Some(Principal::from_profile(id, profile)),
                Err(e) => {
                    warn!("Skipping profile {}: {}", id, e);
                    None
                }
            })
            .collect())
    }
}

impl Drop for IdentityStore {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get() {
            listener.abort();
        }
    }
}

async fn resolve_principal(store: &dyn KeyedStore, session: &Session) -> Result<Principal> {
    let raw = store
        .get(&child_path(USERS, &session.uid))
        .await?
        .ok_or_else(|| CrmError::NotFound(format!("no profile for identity {}", session.uid)))?;
    let profile: Profile = serde_json::from_value(raw)
        .map_err(|e| CrmError::BackendRead(format!("users/{}: {}", session.uid, e)))?;
    Ok(Principal::from_profile(session.uid.clone(), profile))
}
