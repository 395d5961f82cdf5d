//! Personality evolution: combine parent personalities into an offspring.
//!
//! The evolution prompt receives each parent's profile plus a synthesized
//! peer-feedback report, and must answer with a YAML object carrying the
//! six prompt sections. The offspring is saved as a custom personality of
//! the tenant.

use concord_config::personalities::PromptSections;
use concord_config::prompts::fill_template;
use concord_config::{Personality, PersonalitySource};
use concord_domain::{ChatMessage, Error, Result};
use concord_upstream::QueryOptions;

use crate::runtime::feedback::generate_feedback_summary;
use crate::state::AppState;

pub async fn combine_personalities(
    state: &AppState,
    org_id: &str,
    parent_ids: &[String],
    offspring_name: &str,
) -> Result<Personality> {
    tracing::info!(org_id, parents = ?parent_ids, offspring = offspring_name, "combining personalities");

    let active = state.config.active_personalities(org_id)?;
    let parents: Vec<&Personality> = active
        .iter()
        .filter(|p| parent_ids.contains(&p.id))
        .collect();
    if parents.len() < 2 {
        return Err(Error::Config(
            "at least 2 valid personalities are required for combination".into(),
        ));
    }

    // Profiles + peer feedback for each parent.
    let mut parent_data = String::new();
    for parent in &parents {
        let feedback = generate_feedback_summary(state, org_id, &parent.name).await?;
        let profile = serde_yaml::to_string(&parent.personality_prompt)?;
        parent_data.push_str(&format!(
            "\n--- PARENT: {} ---\nID: {}\nDescription: {}\n\nEXISTING PROFILE:\n{}\n\nPEER FEEDBACK (STRENGTHS & WEAKNESSES):\n{}\n",
            parent.name,
            parent.id,
            parent.description.as_deref().unwrap_or(""),
            profile,
            feedback,
        ));
    }

    let prompts = state.config.load_system_prompts(org_id)?;
    if prompts.evolution.value.trim().is_empty() {
        return Err(Error::Config("evolution prompt is not configured".into()));
    }
    let prompt = fill_template(
        &prompts.evolution.value,
        &[
            ("parent_count", parents.len().to_string().as_str()),
            ("offspring_name", offspring_name),
            ("parent_data", parent_data.as_str()),
        ],
    );

    // The chairman model handles this architectural task.
    let models = state.config.load_models_config(org_id)?;
    let ctx = state.tenant_context(org_id)?;
    let response = state
        .upstream
        .query(
            &models.chairman_model,
            &[ChatMessage::user(prompt)],
            &ctx.api_key,
            &ctx.base_url,
            QueryOptions::default(),
        )
        .await
        .ok_or_else(|| Error::Upstream {
            model: models.chairman_model.clone(),
            message: "failed to generate combined personality".into(),
        })?;

    let sections = parse_sections(&response.content)?;

    let parent_names: Vec<&str> = parents.iter().map(|p| p.name.as_str()).collect();
    let offspring = Personality {
        id: uuid::Uuid::new_v4().to_string(),
        name: offspring_name.to_owned(),
        description: Some(format!(
            "Evolution combined from {}.",
            parent_names.join(", ")
        )),
        // Delivery inherits from the first parent.
        model: parents[0].model.clone(),
        temperature: Some(0.7),
        enabled: true,
        personality_prompt: sections,
        source: PersonalitySource::Custom,
        is_editable: true,
    };

    state.config.save_personality(org_id, &offspring)?;
    tracing::info!(org_id, offspring_id = %offspring.id, "evolved personality created");
    Ok(offspring)
}

/// Parse the model's YAML output into prompt sections, tolerating a
/// markdown fence it was told not to emit.
fn parse_sections(raw: &str) -> Result<PromptSections> {
    let mut content = raw.trim();
    content = content.strip_prefix("```yaml").unwrap_or(content);
    content = content.strip_prefix("```").unwrap_or(content);
    content = content.strip_suffix("```").unwrap_or(content);

    let value: serde_yaml::Value = serde_yaml::from_str(content)
        .map_err(|_| Error::Config("model produced invalid YAML configuration".into()))?;
    if !value.is_mapping() {
        return Err(Error::Config(
            "model produced invalid YAML configuration".into(),
        ));
    }
    serde_yaml::from_value(value)
        .map_err(|_| Error::Config("model produced invalid YAML configuration".into()))
}
