//! Runtime configuration for the course-architect core.
//!
//! Loaded from environment variables (`.env` honored via `dotenvy`), per the
//! external-interfaces contract: Postgres and S3 connection settings are
//! required, at least one LLM provider API key must be present, and a handful
//! of optional knobs (`ENVIRONMENT`, `LOG_LEVEL`, `CORS_*`) tune runtime
//! behavior. Validation failures here are fatal — the process must not bind
//! its listener with an unvalidated configuration.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
    Testing,
}

impl Environment {
    fn from_env_var(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "staging" => Self::Staging,
            "production" => Self::Production,
            "testing" => Self::Testing,
            _ => Self::Development,
        }
    }

    /// Whether logs should be JSON-formatted, grounded on the ambient
    /// logging policy in SPEC_FULL.md §6.
    pub fn prefers_json_logs(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

#[derive(Debug, Clone)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub db: String,
}

impl PostgresSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.db
        )
    }
}

#[derive(Debug, Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    pub gemini: Option<String>,
    pub anthropic: Option<String>,
    pub openai: Option<String>,
    pub deepseek: Option<String>,
}

impl ProviderCredentials {
    fn any_present(&self) -> bool {
        self.gemini.is_some()
            || self.anthropic.is_some()
            || self.openai.is_some()
            || self.deepseek.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct CorsSettings {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self { allowed_origins: vec!["*".to_string()] }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub log_level: String,
    pub postgres: PostgresSettings,
    pub s3: S3Settings,
    pub providers: ProviderCredentials,
    pub cors: CorsSettings,
    pub model_registry_path: String,
    pub prompt_pack_path: String,
    pub http_host: String,
    pub http_port: u16,
}

fn required_var(name: &str) -> Result<String> {
    env::var(name).map_err(|_| CoreError::Config(format!("missing required env var: {name}")))
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

impl AppConfig {
    /// Load and validate configuration from the process environment.
    ///
    /// Collects every missing/invalid setting before returning so a single
    /// failure message enumerates all offenders, matching the registry's
    /// startup-validation contract.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut problems = Vec::new();

        let postgres_host = required_var("POSTGRES_HOST");
        let postgres_port = env::var("POSTGRES_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(5432);
        let postgres_user = required_var("POSTGRES_USER");
        let postgres_password = required_var("POSTGRES_PASSWORD");
        let postgres_db = required_var("POSTGRES_DB");

        let s3_endpoint = required_var("S3_ENDPOINT");
        let s3_access_key = required_var("S3_ACCESS_KEY");
        let s3_secret_key = required_var("S3_SECRET_KEY");
        let s3_bucket = required_var("S3_BUCKET");

        for (name, value) in [
            ("POSTGRES_HOST", &postgres_host),
            ("POSTGRES_USER", &postgres_user),
            ("POSTGRES_PASSWORD", &postgres_password),
            ("POSTGRES_DB", &postgres_db),
            ("S3_ENDPOINT", &s3_endpoint),
            ("S3_ACCESS_KEY", &s3_access_key),
            ("S3_SECRET_KEY", &s3_secret_key),
            ("S3_BUCKET", &s3_bucket),
        ] {
            if value.is_err() {
                problems.push(name.to_string());
            }
        }

        let providers = ProviderCredentials {
            gemini: optional_var("GEMINI_API_KEY"),
            anthropic: optional_var("ANTHROPIC_API_KEY"),
            openai: optional_var("OPENAI_API_KEY"),
            deepseek: optional_var("DEEPSEEK_API_KEY"),
        };
        if !providers.any_present() {
            problems.push(
                "at least one of GEMINI_API_KEY, ANTHROPIC_API_KEY, OPENAI_API_KEY, DEEPSEEK_API_KEY"
                    .to_string(),
            );
        }

        if !problems.is_empty() {
            return Err(CoreError::Config(format!(
                "invalid configuration, missing: {}",
                problems.join(", ")
            )));
        }

        let environment = optional_var("ENVIRONMENT")
            .map(|v| Environment::from_env_var(&v))
            .unwrap_or(Environment::Development);

        let cors = optional_var("CORS_ALLOWED_ORIGINS")
            .map(|v| CorsSettings {
                allowed_origins: v.split(',').map(|s| s.trim().to_string()).collect(),
            })
            .unwrap_or_default();

        Ok(Self {
            environment,
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            postgres: PostgresSettings {
                host: postgres_host.unwrap(),
                port: postgres_port,
                user: postgres_user.unwrap(),
                password: postgres_password.unwrap(),
                db: postgres_db.unwrap(),
            },
            s3: S3Settings {
                endpoint: s3_endpoint.unwrap(),
                access_key: s3_access_key.unwrap(),
                secret_key: s3_secret_key.unwrap(),
                bucket: s3_bucket.unwrap(),
            },
            providers,
            cors,
            model_registry_path: optional_var("MODEL_REGISTRY_PATH")
                .unwrap_or_else(|| "config/models.yaml".to_string()),
            prompt_pack_path: optional_var("PROMPT_PACK_PATH")
                .unwrap_or_else(|| "prompts/architect/v1.yaml".to_string()),
            http_host: optional_var("HTTP_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            http_port: optional_var("HTTP_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_defaults_to_development() {
        assert_eq!(Environment::from_env_var("bogus"), Environment::Development);
    }

    #[test]
    fn production_and_staging_prefer_json_logs() {
        assert!(Environment::Production.prefers_json_logs());
        assert!(Environment::Staging.prefers_json_logs());
        assert!(!Environment::Development.prefers_json_logs());
        assert!(!Environment::Testing.prefers_json_logs());
    }
}
