//! Generator collaborator: produces source files from a requirement and an
//! optional error context.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::GeneratorError;

/// Input for one generator call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Natural-language requirement supplied by the caller
    pub requirement: String,
    /// Description of the failure the generator should repair
    pub error_context: Option<String>,
    /// Repair attempt index that triggered this call
    pub attempt: u32,
}

impl GenerationRequest {
    pub fn new(requirement: impl Into<String>) -> Self {
        Self {
            requirement: requirement.into(),
            error_context: None,
            attempt: 0,
        }
    }

    pub fn with_error_context(mut self, context: impl Into<String>) -> Self {
        self.error_context = Some(context.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

/// Relative path to full file content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFiles {
    pub files: BTreeMap<String, String>,
}

impl GeneratedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Reject empty responses and paths that leave the project or touch
    /// `protected` top-level names.
    pub fn validate(&self, protected: &[&str]) -> Result<(), GeneratorError> {
        if self.files.is_empty() {
            return Err(GeneratorError::Malformed("response contained no files".to_string()));
        }

        for path in self.files.keys() {
            if path.trim().is_empty() {
                return Err(GeneratorError::Malformed("empty file path".to_string()));
            }
            let first = Path::new(path).components().find_map(|c| match c {
                Component::Normal(name) => name.to_str(),
                _ => None,
            });
            if first.is_some_and(|name| protected.contains(&name)) {
                return Err(GeneratorError::Malformed(format!(
                    "{} targets a protected path",
                    path
                )));
            }
            for component in Path::new(path).components() {
                match component {
                    Component::Normal(_) | Component::CurDir => {}
                    _ => {
                        return Err(GeneratorError::Malformed(format!(
                            "{} is not a relative path inside the project",
                            path
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    /// Overwrite each file under `root`. Files not in the response are left alone.
    pub fn write_to(&self, root: &Path) -> std::io::Result<usize> {
        for (relative, content) in &self.files {
            let full_path = root.join(relative);
            if let Some(parent) = full_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&full_path, content)?;
            debug!("Wrote {}", full_path.display());
        }
        Ok(self.files.len())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedFiles, GeneratorError>;
}

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const MAX_RETRIES: u32 = 3;

const SYSTEM_PROMPT: &str = "You generate complete Next.js App Router projects in TypeScript. \
Use the app/ directory only, import local modules through relative paths or the @/ alias, and \
never use next/router, next/head or getServerSideProps. Return every file you create or change \
as a block starting with a line `### FILE: <relative path>` followed by the full file content in \
a fenced code block. Always return complete files, never diffs.";

/// Generator backed by an OpenAI-compatible chat completions endpoint.
pub struct HttpGenerator {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpGenerator {
    pub fn new(api_key: impl Into<String>, model: Option<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Read credentials from `WARDEN_GENERATOR_API_KEY`, then `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self, GeneratorError> {
        let model = std::env::var("WARDEN_GENERATOR_MODEL").ok().filter(|m| !m.is_empty());
        ["WARDEN_GENERATOR_API_KEY", "OPENAI_API_KEY"]
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .find(|key| !key.is_empty())
            .map(|key| Self::new(key, model))
            .ok_or(GeneratorError::NotConfigured)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn user_message(request: &GenerationRequest) -> String {
        match &request.error_context {
            Some(context) => format!(
                "Requirement:\n{}\n\nThe previous version failed (repair attempt {}):\n{}\n\n\
                 Fix the problem and return the complete contents of every file you change.",
                request.requirement, request.attempt, context
            ),
            None => format!("Requirement:\n{}", request.requirement),
        }
    }

    async fn complete(&self, request: &GenerationRequest) -> Result<String, GeneratorError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Self::user_message(request),
                },
            ],
        };

        let mut last_error = None;
        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(500 << attempt)).await;
            }

            let response = match self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(GeneratorError::Request(format!("network error: {}", e)));
                    continue;
                }
            };

            let status = response.status();
            if status.is_server_error() || status.as_u16() == 429 {
                let text = response.text().await.unwrap_or_default();
                warn!("Generator returned {} (attempt {}/{})", status, attempt + 1, MAX_RETRIES);
                last_error = Some(GeneratorError::Request(format!("{}: {}", status, text)));
                continue;
            }
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(GeneratorError::Request(format!("{}: {}", status, text)));
            }

            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|e| GeneratorError::Malformed(format!("invalid response body: {}", e)))?;
            return parsed
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .ok_or_else(|| GeneratorError::Malformed("response had no choices".to_string()));
        }

        Err(last_error.unwrap_or_else(|| GeneratorError::Request("retries exhausted".to_string())))
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedFiles, GeneratorError> {
        let content = self.complete(request).await?;
        Ok(parse_file_blocks(&content))
    }
}

/// Parse `### FILE: path` headers each followed by one fenced code block.
pub fn parse_file_blocks(text: &str) -> GeneratedFiles {
    let mut files = GeneratedFiles::new();
    let mut current: Option<String> = None;
    let mut content = String::new();
    let mut in_block = false;

    for line in text.lines() {
        if let Some(path) = line.trim_start().strip_prefix("### FILE:") {
            if let Some(path) = current.take() {
                files.files.insert(path, std::mem::take(&mut content));
            }
            let path = path.trim().trim_matches('`').to_string();
            current = if path.is_empty() { None } else { Some(path) };
            content.clear();
            in_block = false;
        } else if line.trim_start().starts_with("```") {
            if current.is_some() {
                in_block = !in_block;
            }
        } else if in_block {
            content.push_str(line);
            content.push('\n');
        }
    }
    if let Some(path) = current {
        files.files.insert(path, content);
    }
    files
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}
