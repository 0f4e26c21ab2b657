//! AI drafting of follow-up emails
//!
//! A thin prompt-building layer over a [`GenerationBackend`]. Remote failures
//! are returned as-is: no retry and no locally produced fallback text.

pub mod backend;
pub mod openai;

pub use backend::{GenerationBackend, GenerationError, GenerationRequest};
pub use openai::OpenAiBackend;

use std::sync::Arc;
use tracing::info;

use crate::aggregator::Collections;
use crate::records::OpportunityStage;
use crate::types::{CrmError, Result};

/// Interactions included in a generated summary
const SUMMARY_INTERACTIONS: usize = 5;

const SYSTEM_PROMPT: &str = "You are an assistant for a sales team. You write short, \
professional follow-up emails based on the facts you are given. Do not invent facts.";

fn language_name(code: &str) -> &str {
    match code {
        "en" => "English",
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        "pt" => "Portuguese",
        "it" => "Italian",
        other => other,
    }
}

pub struct DraftingAdapter {
    backend: Arc<dyn GenerationBackend>,
}

impl DraftingAdapter {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self { backend }
    }

    /// The prompt sent for a follow-up draft
    pub fn follow_up_request(
        client_name: &str,
        interaction_summary: &str,
        stage: &str,
        salesperson: &str,
        language: &str,
    ) -> GenerationRequest {
        let prompt = format!(
            "Write a follow-up email to the client below.\n\
             \n\
             Client: {client}\n\
             Salesperson signing the email: {salesperson}\n\
             Opportunity stage: {stage}\n\
             Recent interactions:\n{summary}\n\
             \n\
             The email must be written entirely in {language_name} (language code \"{language}\"), \
             regardless of the language of the information above.",
            client = client_name,
            salesperson = salesperson,
            stage = stage,
            summary = interaction_summary,
            language_name = language_name(language),
            language = language,
        );
        GenerationRequest::user(prompt)
            .with_system(SYSTEM_PROMPT)
            .with_temperature(0.7)
            .with_max_tokens(600)
    }

    pub async fn draft_follow_up(
        &self,
        client_name: &str,
        interaction_summary: &str,
        stage: &str,
        salesperson: &str,
        language: &str,
    ) -> Result<String> {
        let request = Self::follow_up_request(
            client_name,
            interaction_summary,
            stage,
            salesperson,
            language,
        );
        let text = self.backend.generate(request).await?;
        info!(
            "Drafted follow-up for {} with {} ({} chars)",
            client_name,
            self.backend.id(),
            text.len()
        );
        Ok(text)
    }
}

/// Inputs for a draft, gathered from loaded collections
#[derive(Debug, Clone, PartialEq)]
pub struct FollowUpContext {
    pub client_name: String,
    pub interaction_summary: String,
    pub stage: String,
    pub salesperson: String,
}

impl FollowUpContext {
    /// Build the context for `client_id`: its most recent interactions, the
    /// stage of its latest-closing opportunity, and the last salesperson.
    pub fn from_collections(client_id: &str, collections: &Collections) -> Result<Self> {
        let client = collections
            .clients
            .iter()
            .find(|c| c.id == client_id)
            .ok_or_else(|| CrmError::NotFound(format!("client {}", client_id)))?;

        let mut interactions: Vec<_> = collections
            .interactions
            .iter()
            .filter(|i| i.client_id.as_deref() == Some(client_id))
            .collect();
        interactions.sort_by(|a, b| b.date.cmp(&a.date));

        let interaction_summary = if interactions.is_empty() {
            "- none recorded".to_string()
        } else {
            interactions
                .iter()
                .take(SUMMARY_INTERACTIONS)
                .map(|i| {
                    format!(
                        "- {} {:?} by {}: {}",
                        i.date.format("%Y-%m-%d"),
                        i.interaction_type,
                        i.salesperson,
                        i.notes.trim()
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        let stage = collections
            .opportunities
            .iter()
            .filter(|o| o.client_id.as_deref() == Some(client_id))
            .max_by_key(|o| o.closing_date)
            .map(|o| o.stage)
            .unwrap_or(OpportunityStage::Lead);

        Ok(Self {
            client_name: client.company_name.clone(),
            interaction_summary,
            stage: stage.as_str().to_string(),
            salesperson: interactions
                .first()
                .map(|i| i.salesperson.clone())
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::backend::mock::MockGeneration;
    use super::backend::Role;
    use super::*;
    use crate::records::{Client, Interaction, InteractionType, Opportunity};
    use chrono::{NaiveDate, TimeZone, Utc};

    #[tokio::test]
    async fn test_prompt_embeds_inputs_and_language() {
        let mock = Arc::new(MockGeneration::replying("Estimado cliente..."));
        let adapter = DraftingAdapter::new(mock.clone());

        let text = adapter
            .draft_follow_up("Acme", "- demo went well", "proposal", "Ana", "es")
            .await
            .unwrap();
        assert_eq!(text, "Estimado cliente...");

        let request = mock.last_request().unwrap();
        assert_eq!(request.system_prompt.as_deref(), Some(SYSTEM_PROMPT));
        assert_eq!(request.messages[0].role, Role::User);
        let prompt = &request.messages[0].content;
        for needle in ["Acme", "- demo went well", "proposal", "Ana", "Spanish", "\"es\""] {
            assert!(prompt.contains(needle), "prompt is missing {}", needle);
        }
    }

    #[tokio::test]
    async fn test_failure_surfaces_without_fallback() {
        let adapter = DraftingAdapter::new(Arc::new(MockGeneration::failing("HTTP 500")));
        let err = adapter
            .draft_follow_up("Acme", "", "lead", "Ana", "en")
            .await
            .unwrap_err();
        assert!(matches!(err, CrmError::Generation(ref m) if m.contains("HTTP 500")));
    }

    #[test]
    fn test_context_from_collections() {
        let interaction = |id: &str, day: u32, who: &str| Interaction {
            id: id.into(),
            client_id: Some("c1".into()),
            interaction_type: InteractionType::Call,
            notes: format!("note {}", id),
            salesperson: who.into(),
            date: Utc.with_ymd_and_hms(2025, 1, day, 9, 0, 0).unwrap(),
            client: None,
        };
        let opportunity = |stage, month| Opportunity {
            id: format!("o{}", month),
            client_id: Some("c1".into()),
            stage,
            value: 100.0,
            closing_date: NaiveDate::from_ymd_opt(2025, month, 1).unwrap(),
            client: None,
        };
        let collections = Collections {
            clients: vec![Client {
                id: "c1".into(),
                company_name: "Acme".into(),
                ..Default::default()
            }],
            interactions: vec![interaction("i1", 2, "Bo"), interaction("i2", 9, "Ana")],
            opportunities: vec![
                opportunity(OpportunityStage::Won, 1),
                opportunity(OpportunityStage::Negotiation, 6),
            ],
            tasks: vec![],
        };

        let ctx = FollowUpContext::from_collections("c1", &collections).unwrap();
        assert_eq!(ctx.client_name, "Acme");
        assert_eq!(ctx.stage, "negotiation");
        assert_eq!(ctx.salesperson, "Ana");
        assert!(ctx.interaction_summary.starts_with("- 2025-01-09"));

        assert!(matches!(
            FollowUpContext::from_collections("nope", &collections),
            Err(CrmError::NotFound(_))
        ));
    }
}
