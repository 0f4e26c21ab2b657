//! Form inputs for new records, with validation
//!
//! Validation failures are reported per field and never reach the store.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;

use super::model::{
    Client, ClientStatus, ClientType, Interaction, InteractionType, Opportunity,
    OpportunityStage, Record, Task, TaskStatus,
};
use crate::backend::server_timestamp;
use crate::types::{looks_like_email, CrmError, FieldError, Result};

/// Input accepted by `RecordService::create`
pub trait NewRecord: Serialize + Send + Sync {
    type Output: Record;

    fn validate(&self) -> Vec<FieldError>;

    /// Whether the stored record gets a server-assigned `createdAt`
    fn stamps_creation(&self) -> bool {
        false
    }

    /// Value to persist
    fn to_stored(&self) -> Result<Value> {
        let mut value = serde_json::to_value(self)
            .map_err(|e| CrmError::Internal(format!("failed to encode record: {}", e)))?;
        if self.stamps_creation() {
            if let Some(obj) = value.as_object_mut() {
                obj.insert("createdAt".into(), server_timestamp());
            }
        }
        Ok(value)
    }
}

fn required(errors: &mut Vec<FieldError>, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(FieldError::new(field, "required"));
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewClient {
    pub company_name: String,
    pub contact_person: String,
    pub phone: String,
    pub email: String,
    pub address: String,
    pub industry: String,
    pub status: ClientStatus,
    #[serde(rename = "type")]
    pub client_type: ClientType,
}

impl NewRecord for NewClient {
    type Output = Client;

    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        required(&mut errors, "companyName", &self.company_name);
        required(&mut errors, "contactPerson", &self.contact_person);
        if self.email.trim().is_empty() {
            errors.push(FieldError::new("email", "required"));
        } else if !looks_like_email(&self.email) {
            errors.push(FieldError::new("email", "invalid email address"));
        }
        errors
    }

    fn stamps_creation(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInteraction {
    pub client_id: Option<String>,
    #[serde(rename = "type")]
    pub interaction_type: InteractionType,
    pub notes: String,
    pub salesperson: String,
    pub date: DateTime<Utc>,
}

impl NewRecord for NewInteraction {
    type Output = Interaction;

    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        required(&mut errors, "salesperson", &self.salesperson);
        required(&mut errors, "notes", &self.notes);
        errors
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOpportunity {
    pub client_id: Option<String>,
    pub stage: OpportunityStage,
    pub value: f64,
    pub closing_date: NaiveDate,
}

impl NewRecord for NewOpportunity {
    type Output = Opportunity;

    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if !self.value.is_finite() || self.value < 0.0 {
            errors.push(FieldError::new("value", "must be a non-negative number"));
        }
        errors
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub client_id: Option<String>,
    pub title: String,
    pub assigned_to: String,
    pub due_date: Option<NaiveDate>,
    pub status: TaskStatus,
    pub time_estimate: Option<f64>,
    pub documents: Vec<String>,
}

impl NewRecord for NewTask {
    type Output = Task;

    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        required(&mut errors, "title", &self.title);
        required(&mut errors, "assignedTo", &self.assigned_to);
        if let Some(hours) = self.time_estimate {
            if !hours.is_finite() || hours < 0.0 {
                errors.push(FieldError::new("timeEstimate", "must be a non-negative number"));
            }
        }
        for (i, doc) in self.documents.iter().enumerate() {
            let valid = doc
                .split_once("://")
                .map(|(scheme, rest)| !scheme.is_empty() && !rest.is_empty())
                .unwrap_or(false);
            if !valid {
                errors.push(FieldError::new(format!("documents[{}]", i), "must be a URI"));
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> NewClient {
        NewClient {
            company_name: "Acme".into(),
            contact_person: "Wile".into(),
            email: "wile@acme.test".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_client_validation() {
        assert!(client().validate().is_empty());

        let bad = NewClient {
            company_name: " ".into(),
            email: "nope".into(),
            ..client()
        };
        let fields: Vec<_> = bad.validate().into_iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["companyName", "email"]);
    }

    #[test]
    fn test_client_stored_value_has_timestamp_sentinel() {
        let stored = client().to_stored().unwrap();
        assert_eq!(stored["createdAt"], server_timestamp());
        assert_eq!(stored["type"], "lead");
        assert!(stored.get("id").is_none());
    }

    #[test]
    fn test_opportunity_value_non_negative() {
        let opp = NewOpportunity {
            client_id: None,
            stage: OpportunityStage::Lead,
            value: -1.0,
            closing_date: NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
        };
        assert_eq!(opp.validate().len(), 1);
        assert!(NewOpportunity { value: 0.0, ..opp }.validate().is_empty());
    }

    #[test]
    fn test_task_documents_must_be_uris() {
        let task = NewTask {
            client_id: None,
            title: "Prepare proposal".into(),
            assigned_to: "ana".into(),
            due_date: None,
            status: TaskStatus::Planned,
            time_estimate: Some(2.5),
            documents: vec!["https://files.test/a.pdf".into(), "a.pdf".into()],
        };
        let errors = task.validate();
        assert_eq!(errors, vec![FieldError::new("documents[1]", "must be a URI")]);
    }
}
