//! Asistente de chat con RAG sobre documentos subidos por el usuario.
//!
//! El núcleo (`extract`, `chunker`, `embedding`, `vector_store`, `store`, `rag`)
//! no depende del servidor HTTP; `api` y `app_state` son una capa fina encima.

pub mod api;
pub mod app_state;
pub mod chunker;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod llm;
pub mod models;
pub mod rag;
pub mod store;
pub mod vector_store;

pub use error::{RagError, Result};
