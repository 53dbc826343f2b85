//! Pruebas del almacén RAG: ingesta todo-o-nada, consulta, reset y persistencia.

use std::{fs, sync::Arc};

use async_trait::async_trait;
use doc_chat_rag::{
    config::RagConfig,
    embedding::{Embedder, HashEmbedder},
    error::{RagError, Result},
    store::RagStore,
};
use tempfile::TempDir;

fn config(dir: &TempDir, chunk_size: usize, overlap: usize, model: &str) -> RagConfig {
    RagConfig {
        chunk_size,
        chunk_overlap: overlap,
        embedding_model: model.to_string(),
        top_k: 4,
        min_score: 0.0,
        data_dir: dir.path().to_path_buf(),
    }
}

fn open_store(dir: &TempDir, model: &str) -> RagStore {
    let dimension = HashEmbedder::parse_model(model).unwrap().unwrap();
    let embedder = Arc::new(HashEmbedder::new(dimension).unwrap());
    RagStore::open(&config(dir, 200, 50, model), embedder).unwrap()
}

/// Embedder que siempre falla, para comprobar que no se añade nada.
struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_id(&self) -> &str {
        "hash-64"
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(RagError::Embedding("servicio caído".to_string()))
    }
}

#[tokio::test]
async fn ingests_text_file_in_overlapping_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, "hash-64");

    let report = store.ingest_document("aes.txt", "A".repeat(500).into_bytes()).await.unwrap();
    assert_eq!(report.chunks_added, 3);
    assert!(report.persisted);
    assert_eq!(store.size().await, 3);
    assert!(store.index_path().exists());
    assert_eq!(store.sources().await, vec!["aes.txt".to_string()]);
}

#[tokio::test]
async fn query_returns_the_closest_chunk_first() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, "hash-1024");

    store
        .ingest_document("gatos.txt", b"Los gatos duermen mucho durante el dia".to_vec())
        .await
        .unwrap();
    store
        .ingest_document("coches.txt", b"Los motores de los coches consumen gasolina".to_vec())
        .await
        .unwrap();

    let results = store.query("cuanto duermen los gatos", 4).await.unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].chunk.source, "gatos.txt");
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(results.len() <= 4);
}

#[tokio::test]
async fn min_score_filters_weak_matches() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(&dir, 200, 50, "hash-1024");
    cfg.min_score = 0.99;
    let store = RagStore::open(&cfg, Arc::new(HashEmbedder::new(1024).unwrap())).unwrap();

    store
        .ingest_document("gatos.txt", b"Los gatos duermen mucho durante el dia".to_vec())
        .await
        .unwrap();
    assert!(store.query("motores y gasolina", 4).await.unwrap().is_empty());
    assert_eq!(
        store
            .query("Los gatos duermen mucho durante el dia", 4)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn reuploading_a_file_appends_new_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, "hash-64");
    store.ingest_document("a.txt", b"primera version".to_vec()).await.unwrap();
    store.ingest_document("a.txt", b"segunda version".to_vec()).await.unwrap();

    assert_eq!(store.size().await, 2);
    assert_eq!(store.sources().await, vec!["a.txt".to_string()]);
    let results = store.query("version", 4).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.chunk.source == "a.txt" && r.chunk.index == 0));
    assert_ne!(results[0].chunk.id, results[1].chunk.id);
}

#[tokio::test]
async fn reset_empties_index_and_queries() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, "hash-64");
    store.ingest_document("a.txt", b"hola mundo".to_vec()).await.unwrap();

    let report = store.reset().await;
    assert!(report.persisted);
    assert_eq!(store.size().await, 0);
    assert!(store.query("hola", 4).await.unwrap().is_empty());

    drop(store);
    let reopened = open_store(&dir, "hash-64");
    assert_eq!(reopened.size().await, 0);
}

#[tokio::test]
async fn malformed_pdf_leaves_index_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, "hash-64");
    store.ingest_document("a.txt", b"contenido previo".to_vec()).await.unwrap();

    let err = store
        .ingest_document("roto.pdf", b"%PDF-1.7 esto no es un pdf".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Extraction { .. }));
    assert_eq!(store.size().await, 1);
}

#[tokio::test]
async fn unsupported_type_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, "hash-64");

    let err = store.ingest_document("tabla.xlsx", vec![1, 2, 3]).await.unwrap_err();
    assert!(matches!(err, RagError::UnsupportedType(_)));
    let err = store
        .ingest_declared("datos", b"x".to_vec(), "image/png")
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::UnsupportedType(_)));
    assert_eq!(store.size().await, 0);
}

#[tokio::test]
async fn declared_type_overrides_filename() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, "hash-64");
    let report = store
        .ingest_declared("notas", b"texto plano".to_vec(), "text/plain")
        .await
        .unwrap();
    assert_eq!(report.chunks_added, 1);
}

#[tokio::test]
async fn blank_document_adds_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, "hash-64");
    let report = store.ingest_document("vacio.txt", b"   \n\t ".to_vec()).await.unwrap();
    assert_eq!(report.chunks_added, 0);
    assert_eq!(store.size().await, 0);
}

#[tokio::test]
async fn embedding_failure_is_all_or_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = RagStore::open(&config(&dir, 200, 50, "hash-64"), Arc::new(FailingEmbedder)).unwrap();

    let err = store
        .ingest_document("a.txt", "B".repeat(1000).into_bytes())
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Embedding(_)));
    assert_eq!(store.size().await, 0);
}

#[tokio::test]
async fn index_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open_store(&dir, "hash-256");
        store
            .ingest_document("gatos.txt", b"los gatos duermen".to_vec())
            .await
            .unwrap();
        store.ingest_document("perros.txt", b"los perros ladran".to_vec()).await.unwrap();
    }

    let store = open_store(&dir, "hash-256");
    assert_eq!(store.size().await, 2);
    assert_eq!(
        store.sources().await,
        vec!["gatos.txt".to_string(), "perros.txt".to_string()]
    );
    let results = store.query("los gatos duermen", 1).await.unwrap();
    assert_eq!(results[0].chunk.source, "gatos.txt");
}

#[tokio::test]
async fn changing_embedder_is_a_dimension_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open_store(&dir, "hash-64");
        store.ingest_document("a.txt", b"hola".to_vec()).await.unwrap();
    }

    let store = open_store(&dir, "hash-32");
    let err = store.ingest_document("b.txt", b"adios".to_vec()).await.unwrap_err();
    assert!(matches!(err, RagError::DimensionMismatch(_)));
    assert_eq!(store.size().await, 1);
    assert!(matches!(store.query("hola", 2).await, Err(RagError::DimensionMismatch(_))));

    // Tras un reset el nuevo modelo puede reconstruir el índice.
    store.reset().await;
    store.ingest_document("b.txt", b"adios".to_vec()).await.unwrap();
    assert_eq!(store.size().await, 1);
}

#[tokio::test]
async fn corrupt_index_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir, 200, 50, "hash-64");
    fs::create_dir_all(cfg.rag_dir()).unwrap();
    fs::write(cfg.index_path(), b"basura").unwrap();

    let result = RagStore::open(&cfg, Arc::new(HashEmbedder::new(64).unwrap()));
    assert!(matches!(result, Err(RagError::Persistence(_))));
}

#[tokio::test]
async fn failed_reload_keeps_current_index() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, "hash-64");
    store.ingest_document("a.txt", b"hola".to_vec()).await.unwrap();

    fs::write(store.index_path(), br#"{"version":2,"entries":[]}"#).unwrap();
    assert!(matches!(store.reload().await, Err(RagError::Persistence(_))));
    assert_eq!(store.size().await, 1);
}

#[tokio::test]
async fn save_failure_keeps_index_usable() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, "hash-64");
    // Un directorio en la ruta del índice impide el renombrado final.
    fs::create_dir_all(store.index_path().join("bloqueo")).unwrap();

    let report = store.ingest_document("a.txt", b"hola mundo".to_vec()).await.unwrap();
    assert!(!report.persisted);
    assert_eq!(store.size().await, 1);
    assert_eq!(store.query("hola mundo", 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_ingests_and_queries_stay_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(open_store(&dir, "hash-128"));

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let text = format!("documento numero {i} ").repeat(30);
            store.ingest_document(&format!("doc{i}.txt"), text.into_bytes()).await.unwrap();
            let results = store.query("documento numero", 4).await.unwrap();
            for result in results {
                assert!(result.chunk.source.starts_with("doc"));
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // 570 caracteres con chunks de 200/50 -> 4 chunks por documento.
    assert_eq!(store.size().await, 8 * 4);
    assert_eq!(store.sources().await.len(), 8);

    // El último guardado en disco refleja todas las ingestas.
    let reopened = open_store(&dir, "hash-128");
    assert_eq!(reopened.size().await, 8 * 4);
}

#[tokio::test(flavor = "current_thread")]
async fn saves_complete_on_a_single_threaded_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(open_store(&dir, "hash-64"));

    for i in 0..5 {
        let report = store
            .ingest_document(&format!("nota{i}.txt"), format!("nota numero {i}").into_bytes())
            .await
            .unwrap();
        assert!(report.persisted);
    }

    let reopened = open_store(&dir, "hash-64");
    assert_eq!(reopened.size().await, 5);
}

#[tokio::test]
async fn ingests_a_whole_directory() {
    let dir = tempfile::tempdir().unwrap();
    let docs = tempfile::tempdir().unwrap();
    fs::write(docs.path().join("a.txt"), "primer documento").unwrap();
    fs::create_dir_all(docs.path().join("sub")).unwrap();
    fs::write(docs.path().join("sub").join("b.txt"), "segundo documento").unwrap();
    fs::write(docs.path().join("imagen.png"), [0u8, 1, 2]).unwrap();
    fs::write(docs.path().join("roto.pdf"), "no es un pdf").unwrap();
    fs::write(docs.path().join("vacio.txt"), "  ").unwrap();

    let store = open_store(&dir, "hash-64");
    let summary = store.ingest_directory(docs.path()).await.unwrap();
    assert_eq!(summary.files_scanned, 5);
    assert_eq!(summary.files_ingested, 2);
    assert_eq!(summary.files_skipped, 3);
    assert_eq!(summary.chunks_created, 2);
    assert_eq!(store.size().await, 2);

    assert!(matches!(
        store.ingest_directory(&docs.path().join("a.txt")).await,
        Err(RagError::Config(_))
    ));
}
