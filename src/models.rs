//! Modelos de dominio: chunks, resultados de búsqueda e informes de ingesta.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Trozo de texto de un documento: la unidad de embedding y recuperación.
///
/// Su identidad lógica es `(source, index)`; `id` es un UUID aleatorio para
/// referencias externas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub source: String,
    pub index: usize,
    pub text: String,
}

impl Chunk {
    pub fn new(source: &str, index: usize, text: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.to_string(),
            index,
            text,
        }
    }
}

/// Chunk recuperado junto con su similitud con la consulta (mayor es mejor).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Resultado de ingerir un documento.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub filename: String,
    pub chunks_added: usize,
    /// `false` si el índice no pudo guardarse en disco tras la ingesta.
    pub persisted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResetReport {
    pub persisted: bool,
}

/// Resumen de una ingesta de directorio completo.
#[derive(Debug, Default)]
pub struct IngestionSummary {
    pub files_scanned: u32,
    pub files_ingested: u32,
    pub files_skipped: u32,
    pub chunks_created: usize,
}

impl std::fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resumen: {} ficheros escaneados, {} ingeridos, {} omitidos. {} chunks creados.",
            self.files_scanned, self.files_ingested, self.files_skipped, self.chunks_created
        )
    }
}

/// Turno de conversación (mensaje del usuario y respuesta del asistente).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub time: DateTime<Utc>,
    pub user: String,
    pub bot: String,
}

impl ChatTurn {
    pub fn new(user: impl Into<String>, bot: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            user: user.into(),
            bot: bot.into(),
        }
    }
}

/// Respuesta del orquestador.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub reply: String,
    /// Ficheros de origen de los chunks recuperados, sin duplicados y en orden.
    pub sources: Vec<String>,
    /// `false` cuando no había contexto documental y se respondió con conocimiento general.
    pub grounded: bool,
}
