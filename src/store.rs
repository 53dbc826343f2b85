//! Almacén RAG: único propietario del índice vectorial.
//!
//! Flujo de ingesta:
//!   1. Resolver el tipo de documento y extraer el texto (hilo bloqueante).
//!   2. Trocear el texto.
//!   3. Calcular los embeddings de todos los chunks en un solo lote, sin lock.
//!   4. Con el lock tomado: validar modelo, añadir al índice y guardar en disco.
//!
//! Validar y añadir ocurre sin ningún `.await`, así que una petición cancelada
//! nunca deja un documento añadido a medias. El guardado se serializa con el
//! lock tomado y la escritura va a un hilo bloqueante; cada instantánea lleva
//! un número de generación y nunca se escribe una más antigua que la última
//! guardada, aunque la petición se cancele a mitad de escritura.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex as StdMutex, PoisonError,
    },
};

use tokio::sync::Mutex;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::{
    chunker::Chunker,
    config::RagConfig,
    embedding::Embedder,
    error::{RagError, Result},
    extract::{self, DocumentType},
    models::{IngestReport, IngestionSummary, ResetReport, ScoredChunk},
    vector_store::{self, VectorIndex},
};

pub struct RagStore {
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    index: Mutex<VectorIndex>,
    index_path: PathBuf,
    /// Generación de la última instantánea enviada a disco.
    generation: AtomicU64,
    /// Generación de la última instantánea escrita con éxito.
    saved_generation: Arc<StdMutex<u64>>,
    top_k: usize,
    min_score: f32,
}

impl RagStore {
    /// Valida la configuración, prepara el directorio de datos y carga el
    /// índice persistido si existe.
    ///
    /// Un fichero de índice ilegible hace fallar el arranque en lugar de
    /// empezar vacío y sobrescribirlo en la siguiente ingesta.
    pub fn open(config: &RagConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        config.validate()?;
        let chunker = Chunker::new(config.chunk_size, config.chunk_overlap)?;

        let rag_dir = config.rag_dir();
        fs::create_dir_all(&rag_dir).map_err(|e| {
            RagError::Persistence(format!("no se pudo crear {}: {e}", rag_dir.display()))
        })?;

        let index_path = config.index_path();
        let mut index = VectorIndex::new();
        if index_path.exists() {
            index.load(&index_path)?;
            if let Err(e) = index.check_model(embedder.model_id()) {
                warn!("{e}. Usa reset para reconstruir el índice con el modelo actual.");
            }
        } else {
            info!("No hay índice previo en {}; se empieza vacío.", index_path.display());
        }

        Ok(Self {
            chunker,
            embedder,
            index: Mutex::new(index),
            index_path,
            generation: AtomicU64::new(0),
            saved_generation: Arc::new(StdMutex::new(0)),
            top_k: config.top_k,
            min_score: config.min_score,
        })
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn embedding_model(&self) -> &str {
        self.embedder.model_id()
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub async fn size(&self) -> usize {
        self.index.lock().await.size()
    }

    /// Ficheros con chunks en el índice, en orden de ingesta.
    pub async fn sources(&self) -> Vec<String> {
        self.index.lock().await.sources()
    }

    /// Ingiere un documento completo o nada.
    ///
    /// Volver a subir el mismo nombre añade otra copia de sus chunks; sólo
    /// `reset` elimina las anteriores.
    pub async fn ingest_document(&self, filename: &str, raw_bytes: Vec<u8>) -> Result<IngestReport> {
        let doc_type = DocumentType::from_filename(filename)?;
        self.ingest_typed(filename, raw_bytes, doc_type).await
    }

    /// Igual que [`RagStore::ingest_document`] con el tipo declarado explícitamente
    /// (extensión o MIME).
    pub async fn ingest_declared(&self, filename: &str, raw_bytes: Vec<u8>, declared_type: &str) -> Result<IngestReport> {
        let doc_type = DocumentType::from_declared(declared_type)?;
        self.ingest_typed(filename, raw_bytes, doc_type).await
    }

    async fn ingest_typed(&self, filename: &str, raw_bytes: Vec<u8>, doc_type: DocumentType) -> Result<IngestReport> {
        info!("[RAG] Añadiendo documento: {} ({} bytes, {})", filename, raw_bytes.len(), doc_type.as_str());

        let text = extract::extract_blocking(raw_bytes, doc_type, filename).await?;
        let chunks = self.chunker.chunk(&text, filename);
        info!("[RAG] {} caracteres -> {} chunks.", text.chars().count(), chunks.len());

        if chunks.is_empty() {
            warn!("Fichero vacío o sin texto útil: {}", filename);
            return Ok(IngestReport {
                filename: filename.to_string(),
                chunks_added: 0,
                persisted: true,
            });
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(RagError::ArityMismatch {
                vectors: vectors.len(),
                metadata: chunks.len(),
            });
        }

        let chunks_added = chunks.len();
        let mut index = self.index.lock().await;
        index.bind_model(self.embedder.model_id())?;
        index.add(vectors, chunks)?;
        let persisted = self.persist(&index).await;
        info!("[RAG] {} chunks añadidos. Total en el índice: {}", chunks_added, index.size());

        Ok(IngestReport {
            filename: filename.to_string(),
            chunks_added,
            persisted,
        })
    }

    /// Recorre recursivamente un directorio e ingiere cada fichero soportado.
    /// Los fallos por fichero se registran y cuentan como omitidos.
    pub async fn ingest_directory(&self, root: &Path) -> Result<IngestionSummary> {
        if !root.is_dir() {
            return Err(RagError::Config(format!(
                "La ruta no es un directorio: {}",
                root.display()
            )));
        }

        let mut summary = IngestionSummary::default();
        let mut file_entries: Vec<PathBuf> = WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        file_entries.sort();

        for path in file_entries {
            summary.files_scanned += 1;
            let filename = path
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| path.to_string_lossy().to_string());

            if DocumentType::from_filename(&filename).is_err() {
                info!("Saltando fichero con tipo no soportado: {}", path.display());
                summary.files_skipped += 1;
                continue;
            }

            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!("No se pudo leer {}: {err}", path.display());
                    summary.files_skipped += 1;
                    continue;
                }
            };

            match self.ingest_document(&filename, bytes).await {
                Ok(report) if report.chunks_added > 0 => {
                    summary.files_ingested += 1;
                    summary.chunks_created += report.chunks_added;
                }
                Ok(_) => summary.files_skipped += 1,
                Err(err) => {
                    error!("Error ingiriendo {}: {err}", path.display());
                    summary.files_skipped += 1;
                }
            }
        }

        info!("{}", summary);
        Ok(summary)
    }

    /// Los `k` chunks más parecidos a `text` por encima de la puntuación mínima.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        if self.index.lock().await.is_empty() {
            info!("[RAG] Búsqueda omitida: el índice está vacío.");
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed_one(text).await?;

        let results = {
            let index = self.index.lock().await;
            index.check_model(self.embedder.model_id())?;
            index.search(&query_vector, k)?
        };

        let matches: Vec<ScoredChunk> = results
            .into_iter()
            .filter(|r| r.score >= self.min_score)
            .collect();
        info!(
            "[RAG] {} coincidencias por encima del umbral {:.2}.",
            matches.len(),
            self.min_score
        );
        Ok(matches)
    }

    /// Vacía el índice y lo persiste vacío.
    pub async fn reset(&self) -> ResetReport {
        info!("[RAG] Borrando todo el conocimiento...");
        let mut index = self.index.lock().await;
        index.reset();
        ResetReport {
            persisted: self.persist(&index).await,
        }
    }

    /// Vuelve a leer el índice desde disco. Si falla, se conserva el estado actual.
    pub async fn reload(&self) -> Result<usize> {
        let mut index = self.index.lock().await;
        index.load(&self.index_path)?;
        Ok(index.size())
    }

    /// Guarda el índice; un fallo degrada la durabilidad pero no la disponibilidad.
    ///
    /// Se llama con el lock del índice tomado: la serialización ocurre aquí y
    /// la escritura en un hilo bloqueante.
    async fn persist(&self, index: &VectorIndex) -> bool {
        let result = match index.to_bytes() {
            Ok(data) => {
                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                let path = self.index_path.clone();
                let saved_generation = Arc::clone(&self.saved_generation);
                tokio::task::spawn_blocking(move || -> Result<()> {
                    let mut saved = saved_generation.lock().unwrap_or_else(PoisonError::into_inner);
                    // Una instantánea posterior ya incluye este cambio.
                    if *saved > generation {
                        return Ok(());
                    }
                    vector_store::write_atomic(&path, &data)?;
                    *saved = generation;
                    Ok(())
                })
                .await
                .unwrap_or_else(|e| Err(RagError::Persistence(format!("la tarea de guardado abortó: {e}"))))
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {
                info!("Índice guardado en {} ({} entradas)", self.index_path.display(), index.size());
                true
            }
            Err(err) => {
                error!(
                    "No se pudo persistir el índice en {}: {err}. El índice en memoria sigue operativo.",
                    self.index_path.display()
                );
                false
            }
        }
    }
}
