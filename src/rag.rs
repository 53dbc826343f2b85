//! Orquestador de respuestas RAG.
//!
//! Flujo:
//!   1. Recuperar los `top_k` chunks más relevantes del almacén.
//!   2. Construir el contexto: chunks etiquetados con su fichero de origen, o
//!      una indicación de que no hay base documental.
//!   3. Añadir los últimos turnos de la conversación y el mensaje del usuario.
//!   4. Delegar la generación al modelo, con la política de reintentos configurada.

use std::sync::Arc;

use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::{
    config::RetryPolicy,
    error::{RagError, Result},
    llm::Generator,
    models::{Answer, ChatTurn, ScoredChunk},
    store::RagStore,
};

/// Longitud máxima (en caracteres) de cada fragmento incluido en el contexto.
const MAX_SNIPPET_CHARS: usize = 2500;

const SYSTEM_PROMPT: &str = r#"
Eres un asistente útil y con amplios conocimientos.
Responde siempre en el mismo idioma en el que te escribe el usuario, de forma directa, concisa y completa.
Usa el contexto de documentos cuando sea relevante y cita el fichero de origen cuando lo uses.
No inventes datos. Si no estás seguro, dilo.
"#;

const UNGROUNDED_NOTE: &str = "### CONTEXTO DE DOCUMENTOS: (ninguna coincidencia en los documentos subidos)\n\
Responde con tu conocimiento general e indica explícitamente que la respuesta no se basa en los documentos del usuario.";

pub struct Assistant {
    store: Arc<RagStore>,
    generator: Arc<dyn Generator>,
    retry: RetryPolicy,
    history_turns: usize,
}

impl Assistant {
    pub fn new(store: Arc<RagStore>, generator: Arc<dyn Generator>, retry: RetryPolicy, history_turns: usize) -> Self {
        Self {
            store,
            generator,
            retry,
            history_turns,
        }
    }

    /// Responde a `user_message` apoyándose en los documentos indexados.
    pub async fn answer(&self, user_message: &str, history: &[ChatTurn]) -> Result<Answer> {
        let retrieved = self.store.query(user_message, self.store.top_k()).await?;
        let grounded = !retrieved.is_empty();
        if !grounded {
            info!("Sin contexto documental; se responde con conocimiento general.");
        }

        let context = format!("{}\n\n{}", SYSTEM_PROMPT.trim(), build_doc_context(&retrieved));
        let recent = &history[history.len().saturating_sub(self.history_turns)..];
        let prompt = build_prompt(user_message, recent);

        let reply = self.generate_with_retry(&prompt, &context).await?;

        Ok(Answer {
            reply,
            sources: unique_sources(&retrieved),
            grounded,
        })
    }

    async fn generate_with_retry(&self, prompt: &str, context: &str) -> Result<String> {
        let attempts = self.retry.retries + 1;
        let mut backoff = self.retry.backoff;
        let mut attempt = 1;

        loop {
            let err = match timeout(self.retry.timeout, self.generator.generate(prompt, context)).await {
                Ok(Ok(reply)) => return Ok(reply),
                Ok(Err(err)) => err,
                Err(_) => RagError::Generation(format!(
                    "sin respuesta del modelo tras {:?}",
                    self.retry.timeout
                )),
            };

            if attempt >= attempts {
                return Err(err);
            }
            warn!("Intento {attempt}/{attempts} de generación fallido: {err}. Reintentando en {backoff:?}.");
            sleep(backoff).await;
            backoff *= 2;
            attempt += 1;
        }
    }
}

/// Contexto documental: cada chunk con su rango, fichero y puntuación.
pub fn build_doc_context(retrieved: &[ScoredChunk]) -> String {
    if retrieved.is_empty() {
        return UNGROUNDED_NOTE.to_string();
    }

    let mut sections = vec!["### CONTEXTO DE DOCUMENTOS (mejores coincidencias):".to_string()];
    for (rank, result) in retrieved.iter().enumerate() {
        sections.push(format!(
            "[{}] Source: {} | Score: {:.3}\n{}",
            rank + 1,
            result.chunk.source,
            result.score,
            snippet(&result.chunk.text)
        ));
    }
    sections.join("\n\n")
}

fn snippet(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(MAX_SNIPPET_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Historial reciente seguido del mensaje actual.
pub fn build_prompt(user_message: &str, history: &[ChatTurn]) -> String {
    let mut prompt = String::new();
    if !history.is_empty() {
        prompt.push_str("Conversación previa:\n");
        for turn in history {
            prompt.push_str(&format!("Usuario: {}\nAsistente: {}\n", turn.user, turn.bot));
        }
        prompt.push('\n');
    }
    prompt.push_str("Mensaje del usuario:\n");
    prompt.push_str(user_message);
    prompt
}

/// Ficheros de origen sin duplicados, en el orden en que aparecen.
pub fn unique_sources(retrieved: &[ScoredChunk]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for result in retrieved {
        if !sources.contains(&result.chunk.source) {
            sources.push(result.chunk.source.clone());
        }
    }
    sources
}
