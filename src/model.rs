use std::time::Duration;

use async_trait::async_trait;
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::generation::parameters::FormatType;
use ollama_rs::Ollama;
use serde_json::Value;
use tracing::debug;

use crate::config::Settings;
use crate::error::ModelError;

/// Shape a structured response must take: a JSON object with the listed string fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSchema {
    pub name: &'static str,
    pub fields: Vec<OutputField>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputField {
    pub name: &'static str,
    pub description: &'static str,
}

impl OutputSchema {
    pub fn new(name: &'static str) -> Self {
        OutputSchema {
            name,
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: &'static str, description: &'static str) -> Self {
        self.fields.push(OutputField { name, description });
        self
    }

    /// Formatting instructions appended to a prompt for models without native schemas.
    pub fn instructions(&self) -> String {
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|field| format!("\"{}\": \"<{}>\"", field.name, field.description))
            .collect();

        format!(
            "Respond only with a JSON object of the form {{{}}}.",
            fields.join(", ")
        )
    }

    /// Checks that `value` is an object carrying every field as a string.
    pub fn validate(&self, value: &Value) -> Result<(), ModelError> {
        let object = value.as_object().ok_or_else(|| {
            ModelError::MalformedOutput(format!("{} must be a JSON object", self.name))
        })?;

        for field in &self.fields {
            match object.get(field.name) {
                Some(Value::String(_)) => {}
                Some(_) => {
                    return Err(ModelError::MalformedOutput(format!(
                        "field `{}` of {} must be a string",
                        field.name, self.name
                    )))
                }
                None => {
                    return Err(ModelError::MalformedOutput(format!(
                        "{} is missing field `{}`",
                        self.name, field.name
                    )))
                }
            }
        }

        Ok(())
    }
}

/// A language model able to answer free-form and structured prompts.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &OutputSchema,
    ) -> Result<Value, ModelError>;

    async fn generate_text(&self, prompt: &str) -> Result<String, ModelError>;
}

pub struct OllamaModel {
    client: Ollama,
    model: String,
    timeout: Duration,
}

impl OllamaModel {
    pub fn new(settings: &Settings) -> Self {
        OllamaModel {
            client: Ollama::new(settings.ollama_host.clone(), settings.ollama_port),
            model: settings.model.clone(),
            timeout: settings.model_timeout,
        }
    }

    async fn generate(
        &self,
        prompt: String,
        format: Option<FormatType>,
    ) -> Result<String, ModelError> {
        let mut request = GenerationRequest::new(self.model.clone(), prompt);
        if let Some(format) = format {
            request = request.format(format);
        }

        let response = tokio::time::timeout(self.timeout, self.client.generate(request))
            .await
            .map_err(|_| ModelError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| ModelError::Request(e.to_string()))?;

        Ok(response.response)
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &OutputSchema,
    ) -> Result<Value, ModelError> {
        let prompt = format!("{}\n\n{}", prompt, schema.instructions());
        let raw = self.generate(prompt, Some(FormatType::Json)).await?;
        debug!(model = %self.model, response = %raw, "structured response");

        let value: Value = serde_json::from_str(raw.trim())
            .map_err(|e| ModelError::MalformedOutput(e.to_string()))?;
        schema.validate(&value)?;

        Ok(value)
    }

    async fn generate_text(&self, prompt: &str) -> Result<String, ModelError> {
        let text = self.generate(prompt.to_string(), None).await?;
        debug!(model = %self.model, response = %text, "text response");

        Ok(text.trim().to_string())
    }
}
