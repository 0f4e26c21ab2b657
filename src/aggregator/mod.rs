//! Data aggregator
//!
//! Holds the in-memory copy of all four collections for the current
//! principal and publishes it through a watch channel.
//!
//! Two strategies:
//! - `Pull` fetches all kinds at once; a refresh applies all four collections
//!   in one update or none of them.
//! - `Push` keeps one subscription per kind; each snapshot is joined and
//!   replaces that kind only.
//!
//! Every load is tagged with an epoch. Teardown and each new refresh bump the
//! epoch, and results are applied only if their epoch is still current, so
//! late callbacks never write into cleared state.

use clap::ValueEnum;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backend::{KeyedStore, SubscriptionHandle};
use crate::identity::AuthState;
use crate::records::{Client, Interaction, Opportunity, Principal, Record, RecordService, Records, Task};
use crate::types::{CrmError, Result};

/// How collections are kept current
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SyncStrategy {
    #[default]
    Pull,
    Push,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    Uninitialized,
    Loading,
    Ready,
    /// The last load failed; earlier collections, if any, are still held
    Empty,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Collections {
    pub clients: Vec<Client>,
    pub interactions: Vec<Interaction>,
    pub opportunities: Vec<Opportunity>,
    pub tasks: Vec<Task>,
}

/// What consumers observe
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub state: AggregatorState,
    pub collections: Arc<Collections>,
    /// Error from the most recent failed load
    pub error: Option<String>,
    /// Kinds delivered since the current push session started
    loaded: u8,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            state: AggregatorState::Uninitialized,
            collections: Arc::new(Collections::default()),
            error: None,
            loaded: 0,
        }
    }
}

impl Snapshot {
    pub fn is_loading(&self) -> bool {
        self.state == AggregatorState::Loading
    }
}

const ALL_KINDS: u8 = 0b1111;

struct Inner {
    view: watch::Sender<Snapshot>,
    epoch: AtomicU64,
    principal: Mutex<Option<String>>,
    handles: Mutex<Vec<SubscriptionHandle>>,
}

impl Inner {
    fn current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Apply `f` only while `epoch` is current
    fn apply(&self, epoch: u64, f: impl FnOnce(&mut Snapshot)) -> bool {
        self.view.send_if_modified(|snapshot| {
            if !self.current(epoch) {
                return false;
            }
            f(snapshot);
            true
        })
    }

    fn cancel_handles(&self) {
        let handles = match self.handles.lock() {
            Ok(mut handles) => std::mem::take(&mut *handles),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for handle in &handles {
            handle.cancel();
        }
        if !handles.is_empty() {
            debug!("Cancelled {} subscription tasks", handles.len());
        }
    }

    fn track(&self, handle: SubscriptionHandle) {
        match self.handles.lock() {
            Ok(mut handles) => handles.push(handle),
            Err(poisoned) => poisoned.into_inner().push(handle),
        }
    }

    fn set_principal(&self, id: Option<String>) -> Option<String> {
        match self.principal.lock() {
            Ok(mut current) => std::mem::replace(&mut *current, id),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), id),
        }
    }

    fn principal(&self) -> Option<String> {
        match self.principal.lock() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

pub struct DataAggregator {
    records: Records,
    store: Arc<dyn KeyedStore>,
    strategy: SyncStrategy,
    inner: Arc<Inner>,
}

impl DataAggregator {
    pub fn new(records: Records, store: Arc<dyn KeyedStore>, strategy: SyncStrategy) -> Self {
        Self {
            records,
            store,
            strategy,
            inner: Arc::new(Inner {
                view: watch::Sender::new(Snapshot::default()),
                epoch: AtomicU64::new(0),
                principal: Mutex::new(None),
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn strategy(&self) -> SyncStrategy {
        self.strategy
    }

    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.inner.view.subscribe()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.view.borrow().clone()
    }

    /// Cancel all subscriptions, invalidate in-flight loads and clear everything
    pub fn teardown(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.cancel_handles();
        self.inner.view.send_replace(Snapshot::default());
        debug!("aggregator: uninitialized");
    }

    fn teardown_for_sign_out(&self) {
        if self.inner.set_principal(None).is_some() {
            info!("Principal cleared; dropping collections");
        }
        self.teardown();
    }

    /// React to the identity store's principal.
    ///
    /// `None` clears synchronously. A new principal starts a load with the
    /// configured strategy; the same principal again is a no-op.
    pub async fn set_principal(&self, principal: Option<&Principal>) -> Result<()> {
        let Some(principal) = principal else {
            self.teardown_for_sign_out();
            return Ok(());
        };

        let previous = self.inner.set_principal(Some(principal.id.clone()));
        if previous.as_deref() == Some(principal.id.as_str())
            && self.snapshot().state != AggregatorState::Uninitialized
        {
            return Ok(());
        }
        if previous.is_some() {
            self.teardown();
        }

        match self.strategy {
            SyncStrategy::Pull => self.refresh().await,
            SyncStrategy::Push => {
                self.start_push();
                Ok(())
            }
        }
    }

    /// Fetch all four kinds and apply them together.
    ///
    /// On failure nothing changes except the state (`Empty`) and the
    /// reported error. A newer refresh or a teardown discards this one.
    pub async fn refresh(&self) -> Result<()> {
        if self.inner.principal().is_none() {
            return Err(CrmError::BadRequest("no signed-in principal".into()));
        }

        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.apply(epoch, |s| s.state = AggregatorState::Loading);
        debug!("aggregator: loading (epoch {})", epoch);

        let result = tokio::try_join!(
            self.records.clients.list_all(),
            self.records.interactions.list_all(),
            self.records.opportunities.list_all(),
            self.records.tasks.list_all(),
        );

        match result {
            Ok((clients, interactions, opportunities, tasks)) => {
                let applied = self.inner.apply(epoch, |s| {
                    s.collections = Arc::new(Collections {
                        clients,
                        interactions,
                        opportunities,
                        tasks,
                    });
                    s.state = AggregatorState::Ready;
                    s.error = None;
                });
                if applied {
                    debug!("aggregator: ready (epoch {})", epoch);
                } else {
                    debug!("aggregator: discarded stale refresh (epoch {})", epoch);
                }
                Ok(())
            }
            Err(e) => {
                warn!("Refresh failed: {}", e);
                let message = e.to_string();
                self.inner.apply(epoch, |s| {
                    s.state = AggregatorState::Empty;
                    s.error = Some(message);
                });
                Err(e)
            }
        }
    }

    fn start_push(&self) {
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.apply(epoch, |s| {
            s.state = AggregatorState::Loading;
            s.loaded = 0;
        });

        self.spawn_kind(self.records.clients.clone(), epoch, 0, |c, v| c.clients = v);
        self.spawn_kind(self.records.interactions.clone(), epoch, 1, |c, v| {
            c.interactions = v
        });
        self.spawn_kind(self.records.opportunities.clone(), epoch, 2, |c, v| {
            c.opportunities = v
        });
        self.spawn_kind(self.records.tasks.clone(), epoch, 3, |c, v| c.tasks = v);
    }

    fn spawn_kind<T: Record>(
        &self,
        service: RecordService<T>,
        epoch: u64,
        bit: u8,
        assign: fn(&mut Collections, Vec<T>),
    ) {
        let inner = self.inner.clone();
        let store = self.store.clone();

        let task = tokio::spawn(async move {
            let mut subscription = match store.subscribe(T::KIND.namespace()).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    warn!("Subscribe to {} failed: {}", T::KIND, e);
                    fail(&inner, epoch, &e);
                    return;
                }
            };
            // Re-checked after the await: a teardown may have run meanwhile
            if !inner.current(epoch) {
                subscription.handle.cancel();
                return;
            }
            inner.track(subscription.handle.clone());

            while let Some(snapshot) = subscription.snapshots.recv().await {
                let joined = match snapshot {
                    Ok(children) => {
                        let mut records = RecordService::<T>::decode_children(children);
                        service.join(&mut records).await.map(|_| records)
                    }
                    Err(e) => Err(e),
                };
                match joined {
                    Ok(records) => {
                        let count = records.len();
                        let applied = inner.apply(epoch, |s| {
                            assign(Arc::make_mut(&mut s.collections), records);
                            s.loaded |= 1 << bit;
                            if s.loaded == ALL_KINDS {
                                s.state = AggregatorState::Ready;
                                s.error = None;
                            }
                        });
                        if !applied {
                            break;
                        }
                        debug!("aggregator: {} {} applied", count, T::KIND);
                    }
                    Err(e) => {
                        warn!("Snapshot for {} failed: {}", T::KIND, e);
                        if !fail(&inner, epoch, &e) {
                            break;
                        }
                    }
                }
            }
        });
        self.inner.track(SubscriptionHandle::new(task.abort_handle()));
    }

    /// Keep the aggregator in step with the identity store
    ///
    /// Loads run on their own task so a sign-out arriving mid-load is
    /// handled at once; the teardown's epoch bump discards the late result.
    pub fn follow(self: &Arc<Self>, mut states: watch::Receiver<AuthState>) -> SubscriptionHandle {
        let aggregator = self.clone();
        let task = tokio::spawn(async move {
            let mut dispatched: Option<(String, SubscriptionHandle)> = None;
            loop {
                let state = states.borrow_and_update().clone();
                match state {
                    AuthState::SignedIn(principal) => {
                        let current = dispatched.as_ref().map(|(id, _)| id.as_str());
                        if current != Some(principal.id.as_str()) {
                            if let Some((_, load)) = dispatched.take() {
                                load.cancel();
                            }
                            let load = aggregator.spawn_load(principal.clone());
                            dispatched = Some((principal.id, load));
                        }
                    }
                    AuthState::SignedOut => {
                        if let Some((_, load)) = dispatched.take() {
                            load.cancel();
                        }
                        aggregator.teardown_for_sign_out();
                    }
                    // Checking keeps whatever is loaded until resolution settles
                    AuthState::Checking => {}
                }
                if states.changed().await.is_err() {
                    break;
                }
            }
        });
        SubscriptionHandle::new(task.abort_handle())
    }

    fn spawn_load(self: &Arc<Self>, principal: Principal) -> SubscriptionHandle {
        let aggregator = self.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = aggregator.set_principal(Some(&principal)).await {
                warn!("Initial load for {} failed: {}", principal.id, e);
            }
        });
        SubscriptionHandle::new(task.abort_handle())
    }
}

impl Drop for DataAggregator {
    fn drop(&mut self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.cancel_handles();
    }
}

fn fail(inner: &Inner, epoch: u64, error: &CrmError) -> bool {
    let message = error.to_string();
    inner.apply(epoch, |s| {
        s.state = AggregatorState::Empty;
        s.error = Some(message);
    })
}
