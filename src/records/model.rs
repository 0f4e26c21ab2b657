//! Entity models
//!
//! Records are immutable-by-replacement: identity is the store key, which is
//! not persisted inside the record and is attached on read. The joined
//! `client` field on linked records is likewise populated at read time only.

use chrono::{DateTime, NaiveDate, Utc};
use clap::ValueEnum;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{CrmError, Result};

/// Record namespaces in the keyed store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum RecordKind {
    Clients,
    Interactions,
    Opportunities,
    Tasks,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Clients,
        RecordKind::Interactions,
        RecordKind::Opportunities,
        RecordKind::Tasks,
    ];

    pub fn namespace(&self) -> &'static str {
        match self {
            Self::Clients => "clients",
            Self::Interactions => "interactions",
            Self::Opportunities => "opportunities",
            Self::Tasks => "tasks",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.namespace())
    }
}

/// A stored entity
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: RecordKind;

    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);

    /// Referenced client, for kinds that carry one
    fn client_id(&self) -> Option<&str> {
        None
    }

    /// Populate the joined client
    fn attach_client(&mut self, _client: Option<Client>) {}

    /// Adjust a raw stored value before decoding
    fn normalize(_raw: &mut Value) {}

    /// Decode a stored value and decorate it with its key
    fn from_stored(key: &str, mut raw: Value) -> Result<Self> {
        Self::normalize(&mut raw);
        let mut record: Self = serde_json::from_value(raw).map_err(|e| {
            CrmError::BackendRead(format!("{}/{}: {}", Self::KIND.namespace(), key, e))
        })?;
        record.set_id(key.to_string());
        Ok(record)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    #[default]
    Active,
    Inactive,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    #[default]
    Lead,
    Prospect,
    Customer,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub company_name: String,
    #[serde(default)]
    pub contact_person: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub industry: String,
    #[serde(default)]
    pub status: ClientStatus,
    #[serde(rename = "type", default)]
    pub client_type: ClientType,
    /// Server-assigned creation time
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Record for Client {
    const KIND: RecordKind = RecordKind::Clients;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionType {
    Call,
    Email,
    Meeting,
    Demo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(rename = "type")]
    pub interaction_type: InteractionType,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub salesperson: String,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<Client>,
}

impl Record for Interaction {
    const KIND: RecordKind = RecordKind::Interactions;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    fn attach_client(&mut self, client: Option<Client>) {
        self.client = client;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpportunityStage {
    Lead,
    Prospecting,
    Proposal,
    Negotiation,
    Won,
    Lost,
}

impl OpportunityStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Prospecting => "prospecting",
            Self::Proposal => "proposal",
            Self::Negotiation => "negotiation",
            Self::Won => "won",
            Self::Lost => "lost",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub client_id: Option<String>,
    pub stage: OpportunityStage,
    #[serde(default)]
    pub value: f64,
    pub closing_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<Client>,
}

impl Record for Opportunity {
    const KIND: RecordKind = RecordKind::Opportunities;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    fn attach_client(&mut self, client: Option<Client>) {
        self.client = client;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Planned,
    Open,
    Closed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub client_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub assigned_to: String,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub status: TaskStatus,
    /// Estimated effort in hours
    #[serde(default)]
    pub time_estimate: Option<f64>,
    #[serde(default)]
    pub documents: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<Client>,
}

impl Record for Task {
    const KIND: RecordKind = RecordKind::Tasks;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    fn attach_client(&mut self, client: Option<Client>) {
        self.client = client;
    }

    /// Older task records carry a boolean `completed` instead of `status`
    fn normalize(raw: &mut Value) {
        let Some(obj) = raw.as_object_mut() else {
            return;
        };
        let completed = obj.remove("completed").and_then(|v| v.as_bool());
        if let (Some(done), false) = (completed, obj.contains_key("status")) {
            let status = if done {
                TaskStatus::Closed
            } else {
                TaskStatus::Open
            };
            obj.insert("status".into(), Value::from(status.as_str()));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
}

/// Profile fields stored under `users/{id}`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: Role,
}

/// An authenticated identity plus its resolved profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: String,
    pub username: String,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl Principal {
    pub fn from_profile(id: impl Into<String>, profile: Profile) -> Self {
        Self {
            id: id.into(),
            username: profile.username,
            name: profile.name,
            email: profile.email,
            role: profile.role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_decodes_with_key_and_timestamp() {
        let client = Client::from_stored(
            "c1",
            json!({
                "companyName": "Acme",
                "contactPerson": "Wile",
                "status": "inactive",
                "type": "customer",
                "createdAt": 1_700_000_000_000i64
            }),
        )
        .unwrap();

        assert_eq!(client.id, "c1");
        assert_eq!(client.status, ClientStatus::Inactive);
        assert_eq!(client.client_type, ClientType::Customer);
        assert_eq!(
            client.created_at.map(|t| t.timestamp_millis()),
            Some(1_700_000_000_000)
        );
    }

    #[test]
    fn test_task_completed_flag_maps_to_status() {
        let done = Task::from_stored("t1", json!({ "title": "Send deck", "completed": true }))
            .unwrap();
        assert_eq!(done.status, TaskStatus::Closed);

        let pending = Task::from_stored("t2", json!({ "title": "Call", "completed": false }))
            .unwrap();
        assert_eq!(pending.status, TaskStatus::Open);

        // An explicit status wins over the legacy flag
        let explicit = Task::from_stored(
            "t3",
            json!({ "title": "Call", "status": "planned", "completed": true }),
        )
        .unwrap();
        assert_eq!(explicit.status, TaskStatus::Planned);
    }

    #[test]
    fn test_joined_client_not_serialized_when_absent() {
        let opp = Opportunity::from_stored(
            "o1",
            json!({ "clientId": "c1", "stage": "proposal", "value": 1200.5, "closingDate": "2025-03-31" }),
        )
        .unwrap();
        let value = serde_json::to_value(&opp).unwrap();
        assert!(value.get("client").is_none());
        assert_eq!(value["closingDate"], json!("2025-03-31"));
    }

    #[test]
    fn test_bad_record_is_read_error() {
        let err = Interaction::from_stored("i1", json!({ "type": "fax" })).unwrap_err();
        assert!(matches!(err, CrmError::BackendRead(ref m) if m.contains("interactions/i1")));
    }
}
