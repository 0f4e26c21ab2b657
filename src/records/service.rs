//! Record services
//!
//! One [`RecordService`] per entity kind. All of them share the same shape:
//! read-all with join, point read, create, partial update and delete against
//! the kind's namespace in the keyed store.

use serde_json::{Map, Value};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::input::NewRecord;
use super::join::{join_client, ClientLookup, StoreClientLookup};
use super::model::{Client, Interaction, Opportunity, Record, Task, TaskStatus};
use crate::backend::{child_path, Children, KeyedStore};
use crate::types::{CrmError, Result};

/// Fields computed on read that must never be written back
const READ_ONLY_FIELDS: [&str; 2] = ["id", "client"];

pub struct RecordService<T: Record> {
    store: Arc<dyn KeyedStore>,
    lookup: Arc<dyn ClientLookup>,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Record> Clone for RecordService<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            lookup: self.lookup.clone(),
            _kind: PhantomData,
        }
    }
}

impl<T: Record> RecordService<T> {
    pub fn new(store: Arc<dyn KeyedStore>, lookup: Arc<dyn ClientLookup>) -> Self {
        Self {
            store,
            lookup,
            _kind: PhantomData,
        }
    }

    fn namespace(&self) -> &'static str {
        T::KIND.namespace()
    }

    /// Every record of this kind, joined. An empty namespace is an empty list.
    pub async fn list_all(&self) -> Result<Vec<T>> {
        let children = self.store.get_children(self.namespace()).await?;
        let mut records = Self::decode_children(children);
        self.join(&mut records).await?;
        debug!("Listed {} {}", records.len(), T::KIND);
        Ok(records)
    }

    /// Decode raw children, skipping entries that do not fit the schema
    pub fn decode_children(children: Children) -> Vec<T> {
        children
            .into_iter()
            .filter_map(|(key, raw)| match T::from_stored(&key, raw) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping record: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Run the client join for this service's lookup
    pub async fn join(&self, records: &mut [T]) -> Result<()> {
        join_client(records, self.lookup.as_ref()).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<T>> {
        let Some(raw) = self.store.get(&child_path(self.namespace(), id)).await? else {
            return Ok(None);
        };
        let mut records = vec![T::from_stored(id, raw)?];
        self.join(&mut records).await?;
        Ok(records.pop())
    }

    /// Validate and append a new record, returning its generated id
    pub async fn create<N>(&self, input: &N) -> Result<String>
    where
        N: NewRecord<Output = T>,
    {
        let errors = input.validate();
        if !errors.is_empty() {
            return Err(CrmError::Validation(errors));
        }

        let id = self.store.push_key(self.namespace());
        self.store
            .set(&child_path(self.namespace(), &id), input.to_stored()?)
            .await?;
        info!("Created {}/{}", T::KIND, id);
        Ok(id)
    }

    /// Change only the named fields
    pub async fn update(&self, id: &str, mut fields: Map<String, Value>) -> Result<()> {
        for field in READ_ONLY_FIELDS {
            fields.remove(field);
        }
        if fields.is_empty() {
            return Err(CrmError::BadRequest("no fields to update".into()));
        }
        self.store
            .update(&child_path(self.namespace(), id), fields)
            .await
    }

    /// Remove the record. References from other kinds are left dangling.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.store.remove(&child_path(self.namespace(), id)).await?;
        info!("Deleted {}/{}", T::KIND, id);
        Ok(())
    }
}

impl RecordService<Task> {
    pub async fn update_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        let mut fields = Map::new();
        fields.insert("status".into(), Value::from(status.as_str()));
        self.update(id, fields).await
    }
}

/// The four record services, sharing one store and one client lookup
#[derive(Clone)]
pub struct Records {
    pub clients: RecordService<Client>,
    pub interactions: RecordService<Interaction>,
    pub opportunities: RecordService<Opportunity>,
    pub tasks: RecordService<Task>,
}

impl Records {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        let lookup: Arc<dyn ClientLookup> = Arc::new(StoreClientLookup::new(store.clone()));
        Self {
            clients: RecordService::new(store.clone(), lookup.clone()),
            interactions: RecordService::new(store.clone(), lookup.clone()),
            opportunities: RecordService::new(store.clone(), lookup.clone()),
            tasks: RecordService::new(store, lookup),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Fault, MemoryKeyedStore};
    use crate::records::input::{NewClient, NewTask};
    use crate::records::model::OpportunityStage;
    use serde_json::json;

    fn setup() -> (Arc<MemoryKeyedStore>, Records) {
        let store = Arc::new(MemoryKeyedStore::new());
        let records = Records::new(store.clone());
        (store, records)
    }

    fn new_client(name: &str) -> NewClient {
        NewClient {
            company_name: name.into(),
            contact_person: "Contact".into(),
            email: "contact@example.test".into(),
            ..Default::default()
        }
    }

    fn new_task(client_id: Option<String>) -> NewTask {
        NewTask {
            client_id,
            title: "Follow up".into(),
            assigned_to: "ana".into(),
            due_date: None,
            status: TaskStatus::Open,
            time_estimate: None,
            documents: vec![],
        }
    }

    #[tokio::test]
    async fn test_empty_namespace_lists_nothing() {
        let (_, records) = setup();
        assert!(records.clients.list_all().await.unwrap().is_empty());
        assert!(records.tasks.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_timestamp() {
        let (_, records) = setup();
        let id = records.clients.create(&new_client("Acme")).await.unwrap();

        let clients = records.clients.list_all().await.unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].id, id);
        assert!(clients[0].created_at.is_some());
    }

    #[tokio::test]
    async fn test_invalid_input_never_written() {
        let (store, records) = setup();
        let err = records.clients.create(&new_client("")).await.unwrap_err();
        assert!(matches!(err, CrmError::Validation(ref e) if e[0].field == "companyName"));
        assert!(store.get_children("clients").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_joins_clients_and_tolerates_dangling() {
        let (_, records) = setup();
        let client_id = records.clients.create(&new_client("Acme")).await.unwrap();
        records
            .tasks
            .create(&new_task(Some(client_id.clone())))
            .await
            .unwrap();
        records
            .tasks
            .create(&new_task(Some("missing".into())))
            .await
            .unwrap();

        let tasks = records.tasks.list_all().await.unwrap();
        assert_eq!(tasks.len(), 2);
        let joined: Vec<_> = tasks
            .iter()
            .map(|t| t.client.as_ref().map(|c| c.id.clone()))
            .collect();
        assert!(joined.contains(&Some(client_id)));
        assert!(joined.contains(&None));
    }

    #[tokio::test]
    async fn test_delete_client_leaves_reference_dangling() {
        let (_, records) = setup();
        let client_id = records.clients.create(&new_client("Acme")).await.unwrap();
        let task_id = records
            .tasks
            .create(&new_task(Some(client_id.clone())))
            .await
            .unwrap();

        records.clients.delete(&client_id).await.unwrap();

        let task = records.tasks.get(&task_id).await.unwrap().unwrap();
        assert_eq!(task.client_id.as_deref(), Some(client_id.as_str()));
        assert!(task.client.is_none());
    }

    #[tokio::test]
    async fn test_update_status_changes_only_status() {
        let (_, records) = setup();
        let id = records.tasks.create(&new_task(None)).await.unwrap();
        records
            .tasks
            .update_status(&id, TaskStatus::Closed)
            .await
            .unwrap();

        let task = records.tasks.get(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Closed);
        assert_eq!(task.title, "Follow up");
    }

    #[tokio::test]
    async fn test_update_ignores_read_only_fields() {
        let (store, records) = setup();
        store
            .set(
                "opportunities/o1",
                json!({ "stage": "lead", "value": 10.0, "closingDate": "2025-06-30" }),
            )
            .await
            .unwrap();

        let fields = json!({ "stage": "won", "id": "other", "client": { "companyName": "x" } });
        records
            .opportunities
            .update("o1", fields.as_object().unwrap().clone())
            .await
            .unwrap();

        let raw = store.get("opportunities/o1").await.unwrap().unwrap();
        assert!(raw.get("id").is_none());
        assert!(raw.get("client").is_none());
        let opp = records.opportunities.get("o1").await.unwrap().unwrap();
        assert_eq!(opp.stage, OpportunityStage::Won);
    }

    #[tokio::test]
    async fn test_write_failure_surfaces() {
        let (store, records) = setup();
        store.inject_fault("tasks", Fault::Write);
        let err = records.tasks.create(&new_task(None)).await.unwrap_err();
        assert!(matches!(err, CrmError::BackendWrite(_)));
    }

    #[tokio::test]
    async fn test_undecodable_records_are_skipped() {
        let (store, records) = setup();
        store
            .set("interactions/bad", json!({ "type": "fax" }))
            .await
            .unwrap();
        store
            .set(
                "interactions/good",
                json!({ "type": "demo", "date": "2025-02-01T09:00:00Z" }),
            )
            .await
            .unwrap();

        let list = records.interactions.list_all().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "good");
    }
}
