//! Architect Agent (§4.7) — a two-step pipeline, structured so it could later
//! be promoted to a directed-graph orchestrator: `prepare_prompts` formats
//! the prompt pack against a `CourseContext`, `generate` drives the router
//! for a schema-validated course structure.

use crate::error::{CoreError, Result};
use crate::merge::CourseContext;
use crate::providers::LlmResponse;
use crate::router::ModelRouter;
use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_TEMPERATURE: f32 = 0.0;
const DEFAULT_MAX_TOKENS: u32 = 8192;
const DEFAULT_STRATEGY: &str = "default";
const DEFAULT_PROMPT_PATH: &str = "prompts/architect/v1.yaml";
const COURSE_STRUCTURING_ACTION: &str = "course_structuring";

#[derive(Debug, Clone, Deserialize)]
struct PromptPack {
    #[allow(dead_code)]
    version: String,
    system_prompt: String,
    user_prompt_template: String,
}

#[derive(Debug, Clone)]
pub struct PreparedPrompt {
    pub system_prompt: String,
    pub user_prompt: String,
    pub prompt_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CourseExercise {
    pub description: String,
    #[serde(default)]
    pub reference_solution: Option<String>,
    #[serde(default)]
    pub grading_criteria: Option<String>,
    pub difficulty_level: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebReference {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlideRange {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CourseConcept {
    pub title: String,
    pub definition: String,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub timecodes: Vec<String>,
    #[serde(default)]
    pub slide_references: Vec<i64>,
    #[serde(default)]
    pub web_references: Vec<WebReference>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CourseLesson {
    pub title: String,
    pub order: i64,
    #[serde(default)]
    pub video_start_timecode: Option<String>,
    #[serde(default)]
    pub video_end_timecode: Option<String>,
    #[serde(default)]
    pub slide_range: Option<SlideRange>,
    #[serde(default)]
    pub concepts: Vec<CourseConcept>,
    #[serde(default)]
    pub exercises: Vec<CourseExercise>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CourseModule {
    pub title: String,
    pub order: i64,
    #[serde(default)]
    pub lessons: Vec<CourseLesson>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CourseStructure {
    pub title: String,
    pub description: String,
    pub modules: Vec<CourseModule>,
}

/// JSON schema the provider's structured-output mode validates against.
/// Hand-authored rather than derived, since the wire schema intentionally
/// omits a couple of Rust-only conveniences (e.g. it does not require
/// `reference_solution`).
pub fn course_structure_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "required": ["title", "description", "modules"],
        "properties": {
            "title": { "type": "string" },
            "description": { "type": "string" },
            "modules": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["title", "order", "lessons"],
                    "properties": {
                        "title": { "type": "string" },
                        "order": { "type": "integer", "minimum": 0 },
                        "lessons": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "required": ["title", "order", "concepts", "exercises"],
                                "properties": {
                                    "title": { "type": "string" },
                                    "order": { "type": "integer", "minimum": 0 },
                                    "concepts": { "type": "array" },
                                    "exercises": {
                                        "type": "array",
                                        "items": {
                                            "type": "object",
                                            "required": ["description", "difficulty_level"],
                                            "properties": {
                                                "description": { "type": "string" },
                                                "difficulty_level": {
                                                    "type": "integer",
                                                    "minimum": 1,
                                                    "maximum": 5
                                                }
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    })
}

/// The model is asked for dense `order` fields but occasionally emits
/// sparse or duplicated ones (e.g. `0, 0, 2` or `1, 3, 4`); rather than
/// burn a retry over a cosmetic ordering mistake, stable-sort each
/// collection by its emitted order and renumber it `0..n`, recursing into
/// each module's lessons.
fn normalize_ordering(structure: &mut CourseStructure) {
    structure.modules.sort_by_key(|module| module.order);
    for (index, module) in structure.modules.iter_mut().enumerate() {
        module.order = index as i64;
        module.lessons.sort_by_key(|lesson| lesson.order);
        for (lesson_index, lesson) in module.lessons.iter_mut().enumerate() {
            lesson.order = lesson_index as i64;
        }
    }
}

pub struct ArchitectAgent {
    router: std::sync::Arc<ModelRouter>,
    prompt_path: std::path::PathBuf,
    temperature: f32,
    max_tokens: u32,
    strategy: String,
}

impl ArchitectAgent {
    pub fn new(router: std::sync::Arc<ModelRouter>) -> Self {
        Self {
            router,
            prompt_path: std::path::PathBuf::from(DEFAULT_PROMPT_PATH),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            strategy: DEFAULT_STRATEGY.to_string(),
        }
    }

    pub fn with_prompt_path(mut self, path: impl AsRef<Path>) -> Self {
        self.prompt_path = path.as_ref().to_path_buf();
        self
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = strategy.into();
        self
    }

    pub fn prepare_prompts(&self, course_context: &CourseContext) -> Result<PreparedPrompt> {
        let raw = std::fs::read_to_string(&self.prompt_path).map_err(|e| {
            CoreError::NotFound(format!("prompt pack not found at {}: {e}", self.prompt_path.display()))
        })?;

        let pack: PromptPack = serde_yaml::from_str(&raw)
            .map_err(|e| CoreError::Config(format!("failed to parse prompt pack: {e}")))?;

        if !pack.user_prompt_template.contains("{context}") {
            return Err(CoreError::NotFound(
                "prompt pack user_prompt_template is missing the {context} placeholder".to_string(),
            ));
        }

        let context_json = serde_json::to_string(course_context)
            .map_err(|e| CoreError::Internal(format!("failed to serialize course context: {e}")))?;

        let user_prompt = pack.user_prompt_template.replace("{context}", &context_json);

        Ok(PreparedPrompt {
            system_prompt: pack.system_prompt,
            user_prompt,
            prompt_version: pack.version,
        })
    }

    pub async fn generate(&self, prepared: &PreparedPrompt) -> Result<(CourseStructure, LlmResponse)> {
        let (value, response) = self
            .router
            .complete_structured(
                COURSE_STRUCTURING_ACTION,
                &prepared.user_prompt,
                &course_structure_schema(),
                Some(&prepared.system_prompt),
                self.temperature,
                self.max_tokens,
                &self.strategy,
            )
            .await?;

        let mut structure: CourseStructure = serde_json::from_value(value)
            .map_err(|e| CoreError::StructuredOutputInvalid(format!("course structure did not match expected shape: {e}")))?;

        normalize_ordering(&mut structure);

        Ok((structure, response))
    }

    pub async fn run(&self, course_context: &CourseContext) -> Result<(CourseStructure, LlmResponse)> {
        let prepared = self.prepare_prompts(course_context)?;
        self.generate(&prepared).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderRegistry;
    use crate::registry::ModelRegistry;
    use std::io::Write;

    fn write_prompt_pack(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn empty_context() -> CourseContext {
        CourseContext { documents: vec![], slide_video_mappings: vec![], created_at: chrono::Utc::now() }
    }

    fn agent() -> ArchitectAgent {
        let registry = ModelRegistry::load_from_str(
            r#"
models:
  m_a:
    provider: p_a
    capabilities: []
    max_context: 8000
    cost_per_1k: { input: 0.001, output: 0.002 }
actions:
  course_structuring:
    description: ""
    requires: []
routing:
  course_structuring:
    default: [m_a]
"#,
        )
        .unwrap();
        let router = ModelRouter::new(std::sync::Arc::new(registry), std::sync::Arc::new(ProviderRegistry::default()));
        ArchitectAgent::new(std::sync::Arc::new(router))
    }

    #[test]
    fn normalize_ordering_renumbers_sparse_and_duplicate_orders() {
        let mut structure = CourseStructure {
            title: "t".to_string(),
            description: "d".to_string(),
            modules: vec![
                CourseModule {
                    title: "second".to_string(),
                    order: 5,
                    lessons: vec![
                        CourseLesson {
                            title: "l2".to_string(),
                            order: 7,
                            video_start_timecode: None,
                            video_end_timecode: None,
                            slide_range: None,
                            concepts: vec![],
                            exercises: vec![],
                        },
                        CourseLesson {
                            title: "l1".to_string(),
                            order: 0,
                            video_start_timecode: None,
                            video_end_timecode: None,
                            slide_range: None,
                            concepts: vec![],
                            exercises: vec![],
                        },
                    ],
                },
                CourseModule { title: "first".to_string(), order: 0, lessons: vec![] },
            ],
        };

        normalize_ordering(&mut structure);

        assert_eq!(structure.modules[0].title, "first");
        assert_eq!(structure.modules[0].order, 0);
        assert_eq!(structure.modules[1].title, "second");
        assert_eq!(structure.modules[1].order, 1);
        assert_eq!(structure.modules[1].lessons[0].title, "l1");
        assert_eq!(structure.modules[1].lessons[0].order, 0);
        assert_eq!(structure.modules[1].lessons[1].title, "l2");
        assert_eq!(structure.modules[1].lessons[1].order, 1);
    }

    #[test]
    fn prepare_prompts_substitutes_context_placeholder() {
        let pack = write_prompt_pack(
            "version: \"1\"\nsystem_prompt: \"be precise\"\nuser_prompt_template: \"materials: {context}\"\n",
        );
        let agent = agent().with_prompt_path(pack.path());

        let prepared = agent.prepare_prompts(&empty_context()).unwrap();
        assert_eq!(prepared.system_prompt, "be precise");
        assert!(prepared.user_prompt.starts_with("materials: "));
        assert!(!prepared.user_prompt.contains("{context}"));
        assert_eq!(prepared.prompt_version, "1");
    }

    #[test]
    fn missing_prompt_file_is_not_found() {
        let agent = agent().with_prompt_path("/nonexistent/prompt/pack.yaml");
        let err = agent.prepare_prompts(&empty_context()).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn missing_context_placeholder_is_not_found() {
        let pack = write_prompt_pack("version: \"1\"\nsystem_prompt: \"x\"\nuser_prompt_template: \"no marker here\"\n");
        let agent = agent().with_prompt_path(pack.path());
        let err = agent.prepare_prompts(&empty_context()).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
