//! Join-on-read of referenced clients
//!
//! Every linked kind goes through [`join_client`], so null handling is the
//! same everywhere: no reference, an empty reference or a dangling reference
//! all leave `client` unset without failing the read.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::warn;

use super::model::{Client, Record, RecordKind};
use crate::backend::{child_path, KeyedStore};
use crate::types::Result;

/// Point lookup of a client by id
#[async_trait]
pub trait ClientLookup: Send + Sync {
    async fn find_client(&self, id: &str) -> Result<Option<Client>>;
}

/// Lookup via point reads against the keyed store
pub struct StoreClientLookup {
    store: Arc<dyn KeyedStore>,
}

impl StoreClientLookup {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ClientLookup for StoreClientLookup {
    async fn find_client(&self, id: &str) -> Result<Option<Client>> {
        let path = child_path(RecordKind::Clients.namespace(), id);
        let Some(raw) = self.store.get(&path).await? else {
            return Ok(None);
        };
        match Client::from_stored(id, raw) {
            Ok(client) => Ok(Some(client)),
            Err(e) => {
                warn!("ignoring undecodable client during join: {}", e);
                Ok(None)
            }
        }
    }
}

/// Lookup against an already-loaded client list
pub struct ClientIndex {
    by_id: HashMap<String, Client>,
}

impl ClientIndex {
    pub fn new(clients: &[Client]) -> Self {
        Self {
            by_id: clients.iter().map(|c| (c.id.clone(), c.clone())).collect(),
        }
    }
}

#[async_trait]
impl ClientLookup for ClientIndex {
    async fn find_client(&self, id: &str) -> Result<Option<Client>> {
        Ok(self.by_id.get(id).cloned())
    }
}

/// Attach the referenced client to each record.
///
/// Issues one lookup per distinct client id, concurrently; all must finish
/// before this returns. A lookup error fails the whole join.
pub async fn join_client<T: Record>(records: &mut [T], lookup: &dyn ClientLookup) -> Result<()> {
    let ids: BTreeSet<String> = records
        .iter()
        .filter_map(|r| r.client_id())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();

    let found = futures::future::try_join_all(ids.iter().map(|id| async move {
        lookup
            .find_client(id)
            .await
            .map(|client| client.map(|c| (id.clone(), c)))
    }))
    .await?;
    let index: HashMap<String, Client> = found.into_iter().flatten().collect();

    for record in records.iter_mut() {
        let client = record.client_id().and_then(|id| index.get(id)).cloned();
        record.attach_client(client);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryKeyedStore;
    use crate::records::model::{Interaction, Task};
    use crate::types::CrmError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLookup {
        inner: ClientIndex,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ClientLookup for CountingLookup {
        async fn find_client(&self, id: &str) -> Result<Option<Client>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.find_client(id).await
        }
    }

    fn acme() -> Client {
        Client {
            id: "c1".into(),
            company_name: "Acme".into(),
            ..Default::default()
        }
    }

    fn task(id: &str, client_id: Option<&str>) -> Task {
        Task::from_stored(
            id,
            json!({ "title": "t", "clientId": client_id }),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_join_attaches_existing_and_tolerates_missing() {
        let lookup = CountingLookup {
            inner: ClientIndex::new(&[acme()]),
            calls: AtomicUsize::new(0),
        };
        let mut tasks = vec![
            task("t1", Some("c1")),
            task("t2", Some("c1")),
            task("t3", Some("gone")),
            task("t4", None),
            task("t5", Some("")),
        ];

        join_client(&mut tasks, &lookup).await.unwrap();

        assert_eq!(tasks[0].client.as_ref().map(|c| c.id.as_str()), Some("c1"));
        assert_eq!(tasks[1].client.as_ref().map(|c| c.id.as_str()), Some("c1"));
        assert!(tasks[2].client.is_none());
        assert!(tasks[3].client.is_none());
        assert!(tasks[4].client.is_none());
        // One lookup per distinct id
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_join_replaces_stale_client() {
        let mut records = vec![task("t1", Some("gone"))];
        records[0].client = Some(acme());
        join_client(&mut records, &ClientIndex::new(&[])).await.unwrap();
        assert!(records[0].client.is_none());
    }

    #[tokio::test]
    async fn test_store_lookup_reads_points() {
        let store = Arc::new(MemoryKeyedStore::new());
        store
            .set("clients/c1", json!({ "companyName": "Acme" }))
            .await
            .unwrap();
        let lookup = StoreClientLookup::new(store.clone());

        let mut interactions = vec![Interaction::from_stored(
            "i1",
            json!({ "clientId": "c1", "type": "call", "date": "2025-01-02T10:00:00Z" }),
        )
        .unwrap()];
        join_client(&mut interactions, &lookup).await.unwrap();
        assert_eq!(
            interactions[0].client.as_ref().map(|c| c.company_name.as_str()),
            Some("Acme")
        );
    }

    #[tokio::test]
    async fn test_lookup_error_fails_join() {
        let store = Arc::new(MemoryKeyedStore::new());
        store.inject_fault("clients", crate::backend::Fault::Read);
        let lookup = StoreClientLookup::new(store);

        let mut tasks = vec![task("t1", Some("c1"))];
        let err = join_client(&mut tasks, &lookup).await.unwrap_err();
        assert!(matches!(err, CrmError::BackendRead(_)));
    }
}
