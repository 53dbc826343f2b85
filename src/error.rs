//! Taxonomía de errores del núcleo RAG.
//!
//! Todos los fallos del núcleo son por operación: se devuelven al llamador
//! como `RagError` y nunca tumban el proceso.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// Tipo de documento declarado que no sabemos extraer.
    #[error("Tipo de fichero no soportado: '{0}'. Sube un PDF, DOCX o TXT.")]
    UnsupportedType(String),

    /// El parser subyacente no pudo leer el documento (fichero corrupto).
    #[error("No se pudo extraer texto de '{filename}': {message}")]
    Extraction { filename: String, message: String },

    #[error("Configuración inválida: {0}")]
    Config(String),

    /// Vector con dimensión distinta a la del índice, con valores no finitos,
    /// o índice construido con otro modelo de embeddings.
    #[error("Dimensión incompatible con el índice: {0}")]
    DimensionMismatch(String),

    #[error("Número de vectores ({vectors}) distinto al número de metadatos ({metadata})")]
    ArityMismatch { vectors: usize, metadata: usize },

    #[error("Error de persistencia del índice: {0}")]
    Persistence(String),

    #[error("Error del proveedor de embeddings: {0}")]
    Embedding(String),

    #[error("Error generando la respuesta: {0}")]
    Generation(String),
}

pub type Result<T> = std::result::Result<T, RagError>;
