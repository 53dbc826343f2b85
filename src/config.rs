//! Carga y validación de la configuración de la aplicación (núcleo RAG + servidor + LLM).

use std::{env, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{anyhow, Result};

use crate::{chunker::Chunker, embedding::HashEmbedder, error::RagError};

/// Configuración del núcleo RAG.
#[derive(Clone, Debug)]
pub struct RagConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embedding_model: String,
    pub top_k: usize,
    /// Puntuación mínima para que un chunk cuente como coincidencia.
    pub min_score: f32,
    pub data_dir: PathBuf,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1900,
            chunk_overlap: 150,
            embedding_model: "text-embedding-3-small".to_string(),
            top_k: 8,
            min_score: 0.20,
            data_dir: PathBuf::from("data"),
        }
    }
}

impl RagConfig {
    pub fn validate(&self) -> std::result::Result<(), RagError> {
        Chunker::new(self.chunk_size, self.chunk_overlap)?;
        if self.top_k == 0 {
            return Err(RagError::Config("top_k debe ser al menos 1".to_string()));
        }
        if !(-1.0..=1.0).contains(&self.min_score) {
            return Err(RagError::Config(format!(
                "min_score ({}) debe estar entre -1 y 1",
                self.min_score
            )));
        }
        if self.embedding_model.trim().is_empty() {
            return Err(RagError::Config("embedding_model no puede estar vacío".to_string()));
        }
        HashEmbedder::parse_model(&self.embedding_model)?;
        if self.data_dir.as_os_str().is_empty() {
            return Err(RagError::Config("data_dir no puede estar vacío".to_string()));
        }
        Ok(())
    }

    pub fn rag_dir(&self) -> PathBuf {
        self.data_dir.join("rag_index")
    }

    pub fn index_path(&self) -> PathBuf {
        self.rag_dir().join("index.json")
    }
}

/// Política de reintentos de la llamada al modelo de lenguaje.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Reintentos adicionales tras el primer intento (0 = sin reintentos).
    pub retries: u32,
    /// Espera antes del primer reintento; se duplica en cada uno.
    pub backoff: Duration,
    /// Tiempo máximo por intento.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 0,
            backoff: Duration::from_millis(500),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub rag: RagConfig,
    pub retry: RetryPolicy,

    pub llm_chat_model: String,
    pub llm_temperature: f64,
    pub llm_max_tokens: u64,
    pub history_turns: usize,

    pub server_addr: String,
    pub static_dir: PathBuf,
    pub preload_dir: Option<PathBuf>,
    pub open_browser: bool,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que [`AppConfig::from_env`] pero leyendo de una función arbitraria.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = RagConfig::default();
        let retry_defaults = RetryPolicy::default();

        let rag = RagConfig {
            chunk_size: parse_var(&lookup, "RAG_CHUNK_SIZE", defaults.chunk_size)?,
            chunk_overlap: parse_var(&lookup, "RAG_CHUNK_OVERLAP", defaults.chunk_overlap)?,
            embedding_model: lookup("EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            top_k: parse_var(&lookup, "RAG_TOP_K", defaults.top_k)?,
            min_score: parse_var(&lookup, "RAG_MIN_SCORE", defaults.min_score)?,
            data_dir: lookup("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
        };

        let retry = RetryPolicy {
            retries: parse_var(&lookup, "LLM_RETRIES", retry_defaults.retries)?,
            backoff: Duration::from_millis(parse_var(
                &lookup,
                "LLM_RETRY_BACKOFF_MS",
                retry_defaults.backoff.as_millis() as u64,
            )?),
            timeout: Duration::from_secs(parse_var(
                &lookup,
                "LLM_TIMEOUT_SECS",
                retry_defaults.timeout.as_secs(),
            )?),
        };

        let cfg = Self {
            rag,
            retry,
            llm_chat_model: lookup("LLM_CHAT_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            llm_temperature: parse_var(&lookup, "LLM_TEMPERATURE", 0.4)?,
            llm_max_tokens: parse_var(&lookup, "LLM_MAX_TOKENS", 4096)?,
            history_turns: parse_var(&lookup, "CHAT_HISTORY_TURNS", 8)?,
            server_addr: lookup("SERVER_ADDR").unwrap_or_else(|| "127.0.0.1:5000".to_string()),
            static_dir: lookup("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("static")),
            preload_dir: lookup("RAG_PRELOAD_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            open_browser: parse_var(&lookup, "OPEN_BROWSER", true)?,
        };

        cfg.validate()?;
        Ok(cfg)
    }

    /// Valida todas las opciones antes de atender ninguna petición.
    pub fn validate(&self) -> std::result::Result<(), RagError> {
        self.rag.validate()?;
        if !(0.0..=2.0).contains(&self.llm_temperature) {
            return Err(RagError::Config(format!(
                "LLM_TEMPERATURE ({}) debe estar entre 0 y 2",
                self.llm_temperature
            )));
        }
        if self.llm_max_tokens == 0 {
            return Err(RagError::Config("LLM_MAX_TOKENS debe ser mayor que 0".to_string()));
        }
        if self.retry.timeout.is_zero() {
            return Err(RagError::Config("LLM_TIMEOUT_SECS debe ser mayor que 0".to_string()));
        }
        Ok(())
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("Valor inválido para {key} ('{raw}'): {e}")),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(cfg.rag.chunk_size, 1900);
        assert_eq!(cfg.rag.chunk_overlap, 150);
        assert_eq!(cfg.rag.top_k, 8);
        assert_eq!(cfg.retry.retries, 0);
        assert_eq!(cfg.rag.index_path(), PathBuf::from("data/rag_index/index.json"));
        assert!(cfg.preload_dir.is_none());
    }

    #[test]
    fn overlap_not_smaller_than_chunk_size_fails_fast() {
        let err = AppConfig::from_lookup(lookup_from(&[
            ("RAG_CHUNK_SIZE", "100"),
            ("RAG_CHUNK_OVERLAP", "100"),
        ]))
        .unwrap_err();
        assert!(matches!(err.downcast_ref::<RagError>(), Some(RagError::Config(_))));
    }

    #[test]
    fn unparsable_values_are_reported() {
        let err = AppConfig::from_lookup(lookup_from(&[("RAG_TOP_K", "muchos")])).unwrap_err();
        assert!(err.to_string().contains("RAG_TOP_K"));
    }

    #[test]
    fn zero_top_k_is_rejected() {
        assert!(AppConfig::from_lookup(lookup_from(&[("RAG_TOP_K", "0")])).is_err());
    }

    #[test]
    fn invalid_hash_model_is_rejected() {
        assert!(AppConfig::from_lookup(lookup_from(&[("EMBEDDING_MODEL", "hash-x")])).is_err());
        let cfg = AppConfig::from_lookup(lookup_from(&[("EMBEDDING_MODEL", "hash-384")])).unwrap();
        assert_eq!(cfg.rag.embedding_model, "hash-384");
    }

    #[test]
    fn retry_policy_is_configurable() {
        let cfg = AppConfig::from_lookup(lookup_from(&[
            ("LLM_RETRIES", "2"),
            ("LLM_RETRY_BACKOFF_MS", "10"),
            ("LLM_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(cfg.retry.retries, 2);
        assert_eq!(cfg.retry.backoff, Duration::from_millis(10));
        assert_eq!(cfg.retry.timeout, Duration::from_secs(5));
        assert!(AppConfig::from_lookup(lookup_from(&[("LLM_TIMEOUT_SECS", "0")])).is_err());
    }
}
