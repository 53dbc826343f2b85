//! Abstracción sobre Rig para los modelos alojados.
//! De momento se implementa OpenAI, tanto para embeddings como para chat.

use async_trait::async_trait;
use rig::client::{CompletionClient as _, EmbeddingsClient as _, ProviderClient as _};
use rig::completion::Prompt as _;
use rig::embeddings::EmbeddingModel as _;
use rig::providers::openai::{self, TEXT_EMBEDDING_3_SMALL};
use tracing::debug;

use crate::{
    config::AppConfig,
    embedding::Embedder,
    error::{RagError, Result},
};

const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

/// Capacidad externa de generación: `generate(prompt, context) -> texto`.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, context: &str) -> Result<String>;
}

/// `openai::Client::from_env` entra en pánico sin clave; comprobamos antes.
fn openai_client() -> std::result::Result<openai::Client, String> {
    if std::env::var("OPENAI_API_KEY").map(|k| k.trim().is_empty()).unwrap_or(true) {
        return Err("falta OPENAI_API_KEY en el entorno".to_string());
    }
    Ok(openai::Client::from_env())
}

// ---------------------------------------------------------------------
// EMBEDDINGS
// ---------------------------------------------------------------------

/// Embeddings de OpenAI servidos a través de Rig.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(model: &str) -> Self {
        // Modelo de embeddings: config o default
        let model = if model.trim().is_empty() { TEXT_EMBEDDING_3_SMALL } else { model };
        Self { model: model.to_string() }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let client = openai_client().map_err(RagError::Embedding)?;
        let embedding_model = client.embedding_model(&self.model);

        // Embeddings en bloque: una única llamada por documento.
        let embeddings = embedding_model
            .embed_texts(texts.to_vec())
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;

        if embeddings.len() != texts.len() {
            return Err(RagError::Embedding(format!(
                "Número de embeddings ({}) distinto al número de textos ({})",
                embeddings.len(),
                texts.len()
            )));
        }
        debug!("{} embeddings generados con {}", embeddings.len(), self.model);

        Ok(embeddings
            .into_iter()
            .map(|emb| emb.vec.into_iter().map(|x| x as f32).collect())
            .collect())
    }
}

// ---------------------------------------------------------------------
// CHAT / COMPLETION
// ---------------------------------------------------------------------

/// Gestor del modelo de chat.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub chat_model: String,
    pub temperature: f64,
    pub max_tokens: u64,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            chat_model: cfg.llm_chat_model.clone(),
            temperature: cfg.llm_temperature,
            max_tokens: cfg.llm_max_tokens,
        }
    }
}

#[async_trait]
impl Generator for LlmManager {
    /// `context` va como preámbulo del agente y `prompt` como mensaje de usuario.
    async fn generate(&self, prompt: &str, context: &str) -> Result<String> {
        let client = openai_client().map_err(RagError::Generation)?;

        // Modelo de chat por defecto si no se ha configurado otro
        let model_name = if self.chat_model.is_empty() {
            DEFAULT_CHAT_MODEL
        } else {
            self.chat_model.as_str()
        };

        let agent = client
            .agent(model_name)
            .preamble(context)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .build();

        let answer = agent
            .prompt(prompt)
            .await
            .map_err(|e| RagError::Generation(e.to_string()))?;
        Ok(answer.trim().to_string())
    }
}
