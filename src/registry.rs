//! Model Registry — loads and validates the declarative model/action/routing
//! catalog (§4.1, §6). Validation failure is fatal at startup; the registry is
//! otherwise treated as immutable for the lifetime of the process.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const DEFAULT_STRATEGY: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Vision,
    StructuredOutput,
    LongContext,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CostPer1k {
    pub input: f64,
    pub output: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    #[serde(skip)]
    pub model_id: String,
    pub provider: String,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    pub max_context: u64,
    pub cost_per_1k: CostPer1k,
}

impl ModelConfig {
    pub fn has_capability(&self, cap: Capability) -> bool {
        self.capabilities.contains(&cap)
    }

    /// `tokens_in * cpki / 1000 + tokens_out * cpko / 1000`
    pub fn estimate_cost(&self, tokens_in: u64, tokens_out: u64) -> f64 {
        (tokens_in as f64 / 1000.0) * self.cost_per_1k.input
            + (tokens_out as f64 / 1000.0) * self.cost_per_1k.output
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActionConfig {
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requires: Vec<Capability>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct RawCatalog {
    models: HashMap<String, ModelConfig>,
    actions: HashMap<String, ActionConfig>,
    routing: HashMap<String, HashMap<String, Vec<String>>>,
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: HashMap<String, ModelConfig>,
    actions: HashMap<String, ActionConfig>,
    routing: HashMap<String, HashMap<String, Vec<String>>>,
}

impl ModelRegistry {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Config(format!("failed to read model registry {}: {e}", path.display()))
        })?;
        Self::load_from_str(&content)
    }

    pub fn load_from_str(content: &str) -> Result<Self> {
        let raw: RawCatalog = serde_yaml::from_str(content)
            .map_err(|e| CoreError::Config(format!("failed to parse model registry: {e}")))?;

        let mut models = HashMap::new();
        for (id, mut cfg) in raw.models {
            cfg.model_id = id.clone();
            models.insert(id, cfg);
        }

        let mut actions = HashMap::new();
        for (name, mut cfg) in raw.actions {
            cfg.name = name.clone();
            actions.insert(name, cfg);
        }

        let registry = Self { models, actions, routing: raw.routing };
        registry.validate()?;
        Ok(registry)
    }

    /// Validate the catalog, collecting every offense into a single fatal
    /// error message rather than failing on the first one found.
    fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        for (action_name, strategies) in &self.routing {
            let Some(action) = self.actions.get(action_name) else {
                problems.push(format!("routing references undeclared action '{action_name}'"));
                continue;
            };

            if !strategies.contains_key(DEFAULT_STRATEGY) {
                problems.push(format!("action '{action_name}' has no '{DEFAULT_STRATEGY}' strategy"));
            }

            for (strategy_name, chain) in strategies {
                if chain.is_empty() {
                    problems.push(format!(
                        "action '{action_name}' strategy '{strategy_name}' has an empty chain"
                    ));
                    continue;
                }

                for model_id in chain {
                    let Some(model) = self.models.get(model_id) else {
                        problems.push(format!(
                            "chain for action '{action_name}' strategy '{strategy_name}' references undeclared model '{model_id}'"
                        ));
                        continue;
                    };

                    let missing: Vec<String> = action
                        .requires
                        .iter()
                        .filter(|cap| !model.has_capability(**cap))
                        .map(|cap| format!("{cap:?}").to_lowercase())
                        .collect();

                    if !missing.is_empty() {
                        problems.push(format!(
                            "model '{model_id}' lacks required capabilities {{{}}} for action '{action_name}'",
                            missing.join(", ")
                        ));
                    }
                }
            }
        }

        if !problems.is_empty() {
            return Err(CoreError::Config(format!(
                "model registry validation failed: {}",
                problems.join("; ")
            )));
        }

        Ok(())
    }

    /// Resolve the ordered chain for `(action, strategy)`. Unknown strategies
    /// silently fall back to `default` for forward compatibility.
    pub fn get_chain(&self, action: &str, strategy: &str) -> Result<Vec<ModelConfig>> {
        let strategies = self
            .routing
            .get(action)
            .ok_or_else(|| CoreError::NotFound(format!("action '{action}' not found")))?;

        let chain = strategies
            .get(strategy)
            .or_else(|| strategies.get(DEFAULT_STRATEGY))
            .expect("validated registry always has a default strategy");

        Ok(chain
            .iter()
            .filter_map(|model_id| self.models.get(model_id).cloned())
            .collect())
    }

    pub fn get_available_strategies(&self, action: &str) -> Vec<String> {
        self.routing
            .get(action)
            .map(|strategies| strategies.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn action(&self, action: &str) -> Option<&ActionConfig> {
        self.actions.get(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(yaml: &str) -> Result<ModelRegistry> {
        ModelRegistry::load_from_str(yaml)
    }

    #[test]
    fn rejects_action_missing_default_strategy() {
        let yaml = r#"
models:
  m_a:
    provider: p_a
    capabilities: []
    max_context: 8000
    cost_per_1k: { input: 0.001, output: 0.002 }
actions:
  a:
    description: ""
    requires: []
routing:
  a:
    quality: [m_a]
"#;
        let err = catalog(yaml).unwrap_err();
        assert!(err.to_string().contains("no 'default' strategy"));
    }

    #[test]
    fn rejects_model_lacking_required_capability() {
        let yaml = r#"
models:
  M:
    provider: p
    capabilities: [structured_output]
    max_context: 8000
    cost_per_1k: { input: 0.001, output: 0.002 }
actions:
  a:
    description: ""
    requires: [vision]
routing:
  a:
    default: [M]
"#;
        let err = catalog(yaml).unwrap_err().to_string();
        assert!(err.contains("lacks required capabilities"));
        assert!(err.contains('M'));
        assert!(err.contains("vision"));
    }

    #[test]
    fn unknown_strategy_falls_back_to_default() {
        let yaml = r#"
models:
  m_a:
    provider: p_a
    capabilities: []
    max_context: 8000
    cost_per_1k: { input: 0.001, output: 0.002 }
actions:
  a:
    description: ""
    requires: []
routing:
  a:
    default: [m_a]
"#;
        let registry = catalog(yaml).unwrap();
        let chain = registry.get_chain("a", "nonexistent").unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].model_id, "m_a");
    }

    #[test]
    fn estimate_cost_uses_declared_rate() {
        let model = ModelConfig {
            model_id: "m".into(),
            provider: "p".into(),
            capabilities: vec![],
            max_context: 1000,
            cost_per_1k: CostPer1k { input: 0.001, output: 0.002 },
        };
        assert_eq!(model.estimate_cost(1000, 500), 0.001 + 0.001);
    }
}
