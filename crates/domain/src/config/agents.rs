use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model references
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A resolved `(provider, model)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    pub provider: String,
    pub model: String,
}

impl ModelRef {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Parse a model string into a [`ModelRef`].
///
/// Accepts `provider/model`, or a bare model name whose provider can be
/// inferred from a well-known prefix. Anything else is a hard config error.
pub fn parse_model_ref(s: &str) -> Result<ModelRef> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::Config("model must not be empty".into()));
    }
    if let Some((provider, model)) = s.split_once('/') {
        if provider.is_empty() || model.is_empty() || model.contains('/') {
            return Err(Error::Config(format!("malformed model reference: `{s}`")));
        }
        return Ok(ModelRef::new(provider, model));
    }
    if s.contains(char::is_whitespace) {
        return Err(Error::Config(format!("malformed model reference: `{s}`")));
    }
    let provider = infer_provider(s)
        .ok_or_else(|| Error::Config(format!("cannot infer provider for model `{s}`")))?;
    Ok(ModelRef::new(provider, s))
}

fn infer_provider(model: &str) -> Option<&'static str> {
    if model.starts_with("claude") {
        Some("anthropic")
    } else if model.starts_with("gpt")
        || model.starts_with("o1")
        || model.starts_with("o3")
        || model.starts_with("o4")
    {
        Some("openai")
    } else if model.starts_with("gemini") {
        Some("google")
    } else {
        None
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model defaults & agent config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-wide model defaults, overridable per agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelsConfig {
    #[serde(default)]
    pub primary: Option<String>,
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

/// One agent definition (key in `Config.agents` is the agent id).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Primary model override. Overriding only this keeps the default
    /// fallbacks list.
    #[serde(default)]
    pub model: Option<String>,
    /// Fallback chain override. `None` inherits the global list.
    #[serde(default)]
    pub model_fallbacks: Option<Vec<String>>,
    /// Models a payload override may select in addition to the defaults.
    #[serde(default)]
    pub allowed_models: Vec<String>,
    /// Skill filter: names of skills this agent may use. `None` = all.
    #[serde(default)]
    pub skills: Option<Vec<String>>,
    #[serde(default)]
    pub cwd: Option<String>,
    /// CLI program serving this agent's turns. `None` = HTTP provider.
    #[serde(default)]
    pub command: Option<String>,
}

/// The model chain an agent run will attempt, primary first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelChain {
    pub primary: ModelRef,
    pub fallbacks: Vec<ModelRef>,
}

impl AgentConfig {
    /// Resolve the agent's default model chain against the global defaults.
    pub fn model_chain(&self, defaults: &ModelsConfig) -> Result<ModelChain> {
        let primary_raw = self
            .model
            .as_deref()
            .or(defaults.primary.as_deref())
            .ok_or_else(|| Error::Config("no model configured".into()))?;
        let primary = parse_model_ref(primary_raw)?;

        let fallback_raw: &[String] = match &self.model_fallbacks {
            Some(list) => list,
            None => &defaults.fallbacks,
        };
        let mut fallbacks = Vec::with_capacity(fallback_raw.len());
        for raw in fallback_raw {
            fallbacks.push(parse_model_ref(raw)?);
        }
        Ok(ModelChain { primary, fallbacks })
    }

    /// Whether a payload model override is permitted for this agent. The
    /// defaults themselves are always permitted.
    pub fn is_model_allowed(&self, model: &str, defaults: &ModelsConfig) -> bool {
        let matches = |candidate: &str| {
            candidate == model
                || parse_model_ref(candidate)
                    .ok()
                    .zip(parse_model_ref(model).ok())
                    .is_some_and(|(a, b)| a == b)
        };
        self.allowed_models.iter().any(|m| matches(m))
            || self.model.as_deref().is_some_and(matches)
            || defaults.primary.as_deref().is_some_and(matches)
            || self
                .model_fallbacks
                .as_deref()
                .unwrap_or(&defaults.fallbacks)
                .iter()
                .any(|m| matches(m))
    }

    /// Normalized skill filter: trimmed, lowercased, deduped, sorted.
    /// `None` when the agent has no filter.
    pub fn normalized_skill_filter(&self) -> Option<Vec<String>> {
        let raw = self.skills.as_ref()?;
        let mut out: Vec<String> = raw
            .iter()
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        out.sort();
        out.dedup();
        Some(out)
    }
}

/// Agent definitions, keyed by agent id.
pub type AgentsConfig = HashMap<String, AgentConfig>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_slash_model() {
        let r = parse_model_ref("openai/gpt-4o").unwrap();
        assert_eq!(r.provider, "openai");
        assert_eq!(r.model, "gpt-4o");
    }

    #[test]
    fn infers_anthropic_for_claude_models() {
        let r = parse_model_ref("claude-sonnet-4-6").unwrap();
        assert_eq!(r.provider, "anthropic");
    }

    #[test]
    fn rejects_malformed_refs() {
        assert!(parse_model_ref("").is_err());
        assert!(parse_model_ref("openai/").is_err());
        assert!(parse_model_ref("/gpt-4o").is_err());
        assert!(parse_model_ref("a/b/c").is_err());
        assert!(parse_model_ref("totally mystery model").is_err());
        assert!(parse_model_ref("mysterymodel").is_err());
    }

    #[test]
    fn primary_override_keeps_default_fallbacks() {
        let defaults = ModelsConfig {
            primary: Some("claude-opus-4-6".into()),
            fallbacks: vec!["claude-sonnet-4-6".into(), "gpt-4o".into()],
        };
        let agent = AgentConfig {
            model: Some("claude-haiku-4-5".into()),
            ..Default::default()
        };
        let chain = agent.model_chain(&defaults).unwrap();
        assert_eq!(chain.primary.model, "claude-haiku-4-5");
        assert_eq!(chain.fallbacks.len(), 2);
        assert_eq!(chain.fallbacks[0].model, "claude-sonnet-4-6");
    }

    #[test]
    fn allowed_models_cover_defaults_and_allowlist() {
        let defaults = ModelsConfig {
            primary: Some("claude-opus-4-6".into()),
            fallbacks: vec![],
        };
        let agent = AgentConfig {
            allowed_models: vec!["claude-sonnet-4-6".into()],
            ..Default::default()
        };
        assert!(agent.is_model_allowed("claude-sonnet-4-6", &defaults));
        assert!(agent.is_model_allowed("claude-opus-4-6", &defaults));
        assert!(agent.is_model_allowed("anthropic/claude-opus-4-6", &defaults));
        assert!(!agent.is_model_allowed("gpt-4o", &defaults));
    }

    #[test]
    fn skill_filter_is_normalized() {
        let agent = AgentConfig {
            skills: Some(vec![
                " Search ".into(),
                "calendar".into(),
                "search".into(),
                "".into(),
            ]),
            ..Default::default()
        };
        assert_eq!(
            agent.normalized_skill_filter().unwrap(),
            vec!["calendar".to_string(), "search".to_string()]
        );
    }
}
