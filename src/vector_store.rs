//! Índice vectorial plano (búsqueda exacta) con metadatos en paralelo.
//!
//! API pública:
//!   - `add(vectors, chunks)` / `search(query, k)` / `reset()`
//!   - `save(path)` / `load(path)` sobre un único fichero JSON versionado.
//!
//! Los vectores se normalizan (L2) al insertarse, de modo que la puntuación
//! es la similitud coseno: producto escalar de vectores unitarios, en [-1, 1].
//! Los empates se resuelven por orden de inserción.

use std::{fs, io::Write, path::Path};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::{
    error::{RagError, Result},
    models::{Chunk, ScoredChunk},
};

/// Versión del formato en disco. Cualquier otro valor se rechaza al cargar.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorIndex {
    dimension: Option<usize>,
    embedding_model: Option<String>,
    /// Vectores normalizados, concatenados fila a fila.
    vectors: Vec<f32>,
    /// `chunks[i]` describe la fila `i` de `vectors`.
    chunks: Vec<Chunk>,
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    version: u32,
    embedding_model: Option<String>,
    dimension: Option<usize>,
    entries: Vec<PersistedEntry>,
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    chunk: Chunk,
    vector: Vec<f32>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn embedding_model(&self) -> Option<&str> {
        self.embedding_model.as_deref()
    }

    /// Comprueba que `model` es compatible con el índice y, si está vacío,
    /// lo registra como modelo del índice.
    pub fn bind_model(&mut self, model: &str) -> Result<()> {
        match &self.embedding_model {
            Some(existing) if existing != model && !self.is_empty() => Err(RagError::DimensionMismatch(format!(
                "el índice se construyó con el modelo '{existing}' y se está usando '{model}'"
            ))),
            _ => {
                self.embedding_model = Some(model.to_string());
                Ok(())
            }
        }
    }

    /// Comprueba que `model` coincide con el del índice sin modificarlo.
    pub fn check_model(&self, model: &str) -> Result<()> {
        match &self.embedding_model {
            Some(existing) if existing != model && !self.is_empty() => Err(RagError::DimensionMismatch(format!(
                "el índice se construyó con el modelo '{existing}' y la consulta usa '{model}'"
            ))),
            _ => Ok(()),
        }
    }

    /// Añade vectores y sus chunks. Se valida todo el lote antes de mutar,
    /// así que un error deja el índice intacto.
    pub fn add(&mut self, vectors: Vec<Vec<f32>>, chunks: Vec<Chunk>) -> Result<()> {
        if vectors.len() != chunks.len() {
            return Err(RagError::ArityMismatch {
                vectors: vectors.len(),
                metadata: chunks.len(),
            });
        }
        let Some(first) = vectors.first() else {
            return Ok(());
        };

        let expected = self.dimension.unwrap_or(first.len());
        if expected == 0 {
            return Err(RagError::DimensionMismatch("los vectores no pueden estar vacíos".to_string()));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(RagError::DimensionMismatch(format!(
                "se esperaba dimensión {expected} y se recibió {}",
                bad.len()
            )));
        }
        if let Some(position) = vectors.iter().position(|v| !is_finite(v)) {
            return Err(RagError::DimensionMismatch(format!(
                "el vector {position} del lote contiene valores NaN o infinitos"
            )));
        }

        self.dimension = Some(expected);
        self.vectors.reserve(vectors.len() * expected);
        for vector in vectors {
            self.vectors.extend(normalized(vector));
        }
        self.chunks.extend(chunks);
        debug!("Índice vectorial: {} entradas (dim {})", self.size(), expected);
        Ok(())
    }

    /// Los `k` chunks más similares a `query`, de mayor a menor puntuación.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let Some(dimension) = self.dimension.filter(|_| !self.is_empty()) else {
            return Ok(Vec::new());
        };
        if query.len() != dimension {
            return Err(RagError::DimensionMismatch(format!(
                "la consulta tiene dimensión {} y el índice {dimension}",
                query.len()
            )));
        }
        if !is_finite(query) {
            return Err(RagError::DimensionMismatch(
                "la consulta contiene valores NaN o infinitos".to_string(),
            ));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let query = normalized(query.to_vec());
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(dimension)
            .map(|row| row.iter().zip(&query).map(|(a, b)| a * b).sum::<f32>())
            .enumerate()
            .collect();

        // Orden total: a igual puntuación gana la posición más antigua.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(position, score)| ScoredChunk {
                chunk: self.chunks[position].clone(),
                score,
            })
            .collect())
    }

    /// Nombres de fichero distintos presentes en el índice, en orden de inserción.
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = Vec::new();
        for chunk in &self.chunks {
            if !sources.contains(&chunk.source) {
                sources.push(chunk.source.clone());
            }
        }
        sources
    }

    /// Vacía vectores, metadatos, dimensión y modelo.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Escribe el índice en un temporal del mismo directorio y lo renombra
    /// sobre `path`, de modo que el fichero anterior nunca queda a medias.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.to_bytes()?)?;
        info!("Índice guardado en {} ({} entradas)", path.display(), self.size());
        Ok(())
    }

    /// Serializa el índice en el formato versionado de disco.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let dimension = self.dimension.unwrap_or(0);
        let persisted = PersistedIndex {
            version: FORMAT_VERSION,
            embedding_model: self.embedding_model.clone(),
            dimension: self.dimension,
            entries: self
                .chunks
                .iter()
                .enumerate()
                .map(|(i, chunk)| PersistedEntry {
                    chunk: chunk.clone(),
                    vector: self.vectors[i * dimension..(i + 1) * dimension].to_vec(),
                })
                .collect(),
        };
        serde_json::to_vec(&persisted).map_err(persistence("no se pudo serializar el índice"))
    }

    /// Carga el índice desde `path`. Si el fichero es ilegible, está corrupto
    /// o es de otra versión, devuelve `Persistence` y el índice no cambia.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let loaded = Self::read_from(path)?;
        info!("Índice cargado desde {} ({} entradas)", path.display(), loaded.size());
        *self = loaded;
        Ok(())
    }

    fn read_from(path: &Path) -> Result<Self> {
        let data = fs::read(path).map_err(persistence("no se pudo leer el índice"))?;
        let persisted: PersistedIndex =
            serde_json::from_slice(&data).map_err(persistence("fichero de índice corrupto"))?;

        if persisted.version != FORMAT_VERSION {
            return Err(RagError::Persistence(format!(
                "versión de índice {} no soportada (se esperaba {FORMAT_VERSION})",
                persisted.version
            )));
        }

        let mut index = Self {
            dimension: persisted.dimension,
            embedding_model: persisted.embedding_model,
            vectors: Vec::new(),
            chunks: Vec::with_capacity(persisted.entries.len()),
        };
        if persisted.entries.is_empty() {
            return Ok(index);
        }

        let dimension = match persisted.dimension {
            Some(dim) if dim > 0 => dim,
            _ => return Err(RagError::Persistence("índice con entradas pero sin dimensión válida".to_string())),
        };
        index.vectors.reserve(persisted.entries.len() * dimension);
        for entry in persisted.entries {
            if entry.vector.len() != dimension {
                return Err(RagError::Persistence(format!(
                    "el chunk {}#{} tiene dimensión {} y el índice {dimension}",
                    entry.chunk.source,
                    entry.chunk.index,
                    entry.vector.len()
                )));
            }
            index.vectors.extend(entry.vector);
            index.chunks.push(entry.chunk);
        }
        Ok(index)
    }
}

/// Reemplaza `path` por `data` de forma atómica (temporal + rename).
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(persistence("no se pudo crear el directorio del índice"))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(persistence("no se pudo crear el fichero temporal"))?;
    tmp.write_all(data).map_err(persistence("no se pudo escribir el índice"))?;
    tmp.as_file().sync_all().map_err(persistence("no se pudo sincronizar el índice"))?;
    tmp.persist(path)
        .map_err(|e| RagError::Persistence(format!("no se pudo reemplazar {}: {}", path.display(), e.error)))?;
    Ok(())
}

fn persistence<E: std::fmt::Display>(context: &'static str) -> impl Fn(E) -> RagError {
    move |e| RagError::Persistence(format!("{context}: {e}"))
}

fn is_finite(vector: &[f32]) -> bool {
    vector.iter().all(|x| x.is_finite())
}

fn normalized(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}
