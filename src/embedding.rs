//! Abstracción del modelo de embeddings.
//!
//! El núcleo sólo conoce el trait [`Embedder`]; el modelo alojado (vía Rig)
//! vive en `llm.rs` y aquí queda un embedder local determinista por hashing.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::{RagError, Result},
    llm::OpenAiEmbedder,
};

/// Convierte textos en vectores densos de dimensión fija.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identificador del modelo; se guarda junto al índice.
    fn model_id(&self) -> &str;

    /// Embeddings en bloque, uno por texto y en el mismo orden.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        if vectors.len() != 1 {
            return Err(RagError::Embedding(format!(
                "se esperaba 1 embedding para la consulta y se recibieron {}",
                vectors.len()
            )));
        }
        Ok(vectors.remove(0))
    }
}

/// Construye el embedder indicado por `embedding_model`.
///
/// `hash-<dim>` selecciona el [`HashEmbedder`] local; cualquier otro valor es
/// un modelo de embeddings de OpenAI.
pub fn embedder_from_model(model: &str) -> Result<Arc<dyn Embedder>> {
    if let Some(dimension) = HashEmbedder::parse_model(model)? {
        return Ok(Arc::new(HashEmbedder::new(dimension)?));
    }
    Ok(Arc::new(OpenAiEmbedder::new(model)))
}

/// Embedder local por *feature hashing* de palabras.
///
/// No captura semántica real, pero es determinista y no necesita red: textos
/// que comparten vocabulario quedan cerca en similitud coseno.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    model_id: String,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::Config("la dimensión del embedder debe ser mayor que 0".to_string()));
        }
        Ok(Self {
            dimension,
            model_id: format!("hash-{dimension}"),
        })
    }

    /// `Ok(None)` si `model` no es un identificador `hash-<dim>`.
    pub fn parse_model(model: &str) -> Result<Option<usize>> {
        let Some(raw) = model.strip_prefix("hash-") else {
            return Ok(None);
        };
        raw.parse::<usize>()
            .ok()
            .filter(|dim| *dim > 0)
            .map(Some)
            .ok_or_else(|| RagError::Config(format!("modelo de embeddings inválido: '{model}'")))
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = fnv1a(token.to_lowercase().as_bytes());
            let slot = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }
        vector
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}
