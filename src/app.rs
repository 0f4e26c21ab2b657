//! Composition root
//!
//! Builds every service once and hands out references explicitly. Nothing in
//! the crate reaches for process-wide state.

use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::aggregator::{AggregatorState, Collections, DataAggregator};
use crate::backend::{Backend, SubscriptionHandle};
use crate::auth::TokenMinter;
use crate::config::{Args, BackendConfig};
use crate::drafting::{DraftingAdapter, GenerationBackend, OpenAiBackend};
use crate::gate::{AccessGate, View, ViewRouter};
use crate::i18n::{LanguagePreference, Localizer};
use crate::identity::{IdentityStore, NewPrincipal};
use crate::records::{Principal, Records, Role};
use crate::types::{CrmError, Result};

pub struct App {
    pub args: Args,
    pub backend: Backend,
    pub router: Arc<ViewRouter>,
    pub gate: AccessGate<ViewRouter>,
    pub identity: Arc<IdentityStore>,
    pub records: Records,
    pub aggregator: Arc<DataAggregator>,
    pub localizer: Arc<Localizer>,
    pub drafting: DraftingAdapter,
    pub started: Instant,
    follower: SubscriptionHandle,
}

impl App {
    /// Build from configuration. In dev mode the in-process backend is
    /// seeded with an admin principal. A configuration problem disables the
    /// backend instead of failing startup.
    pub async fn build(args: Args) -> Result<Self> {
        let config = args.backend_config();
        let backend = match args.token_minter() {
            Ok(minter) => Backend::from_config(&config, minter, args.login_rate_limit),
            Err(e) => Backend::from_config(
                &BackendConfig::Disabled(e.to_string()),
                TokenMinter::new_dev(),
                args.login_rate_limit,
            ),
        };
        let generation: Arc<dyn GenerationBackend> = Arc::new(OpenAiBackend::new(
            reqwest::Client::new(),
            args.llm_base_url.clone(),
            args.llm_model.clone(),
            args.llm_api_key.clone(),
        ));
        let localizer = Localizer::bundled(
            &args.default_language,
            Some(LanguagePreference::new(args.preferences_path.clone())),
        )?;

        let app = Self::from_parts(args, backend, generation, localizer);
        if app.args.dev_mode {
            app.seed_dev_admin().await?;
        }
        Ok(app)
    }

    pub fn from_parts(
        args: Args,
        backend: Backend,
        generation: Arc<dyn GenerationBackend>,
        localizer: Localizer,
    ) -> Self {
        let router = Arc::new(ViewRouter::new(View::Login));
        let identity = Arc::new(IdentityStore::new(
            backend.identity.clone(),
            backend.store.clone(),
            router.clone(),
        ));
        let records = Records::new(backend.store.clone());
        let aggregator = Arc::new(DataAggregator::new(
            records.clone(),
            backend.store.clone(),
            args.sync_strategy,
        ));
        let follower = aggregator.follow(identity.observe_session());

        Self {
            gate: AccessGate::new(router.clone()),
            drafting: DraftingAdapter::new(generation),
            localizer: Arc::new(localizer),
            started: Instant::now(),
            args,
            backend,
            router,
            identity,
            records,
            aggregator,
            follower,
        }
    }

    /// Create the dev admin account unless it already exists
    pub async fn seed_dev_admin(&self) -> Result<()> {
        let admin = NewPrincipal {
            email: self.args.dev_admin_email.clone(),
            password: self.args.dev_admin_password.clone(),
            username: "admin".into(),
            name: "Administrator".into(),
            role: Role::Admin,
        };
        match self.identity.create_principal(&admin).await {
            Ok(id) => {
                info!("Dev admin {} seeded ({})", admin.email, id);
                Ok(())
            }
            Err(CrmError::Auth(_)) => {
                warn!("Dev admin {} already exists", admin.email);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Sign in with the credentials given on the command line
    pub async fn sign_in_from_args(&self) -> Result<Principal> {
        let (Some(email), Some(password)) = (&self.args.email, &self.args.password) else {
            return Err(CrmError::Configuration(
                "SALESDESK_EMAIL and SALESDESK_PASSWORD are required for this command".into(),
            ));
        };
        self.identity.sign_in(email, password).await
    }

    /// Wait for the aggregator to settle after sign-in
    pub async fn collections(&self) -> Result<Arc<Collections>> {
        let mut snapshots = self.aggregator.watch();
        loop {
            let snapshot = snapshots.borrow_and_update().clone();
            match snapshot.state {
                AggregatorState::Ready => return Ok(snapshot.collections),
                AggregatorState::Empty => {
                    return Err(CrmError::BackendRead(
                        snapshot.error.unwrap_or_else(|| "load failed".into()),
                    ))
                }
                AggregatorState::Uninitialized | AggregatorState::Loading => {}
            }
            if snapshots.changed().await.is_err() {
                return Err(CrmError::Internal("aggregator stopped".into()));
            }
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.follower.cancel();
    }
}
