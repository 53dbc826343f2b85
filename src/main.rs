use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use doc_chat_rag::{
    api,
    app_state::AppState,
    config::AppConfig,
    embedding,
    llm::LlmManager,
    rag::Assistant,
    store::RagStore,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar y validar configuración antes de atender peticiones
    let cfg = AppConfig::from_env().context("Error al cargar la configuración")?;
    if std::env::var("OPENAI_API_KEY").is_err() {
        warn!("OPENAI_API_KEY no está definida: el chat y los embeddings de OpenAI fallarán.");
    }

    // 3. Embedder y almacén RAG (carga el índice persistido si existe)
    let embedder = embedding::embedder_from_model(&cfg.rag.embedding_model)
        .context("Error inicializando el embedder")?;
    let store = Arc::new(
        RagStore::open(&cfg.rag, embedder).context("Error abriendo el índice RAG")?,
    );
    info!(
        "Índice RAG listo: {} chunks en {}",
        store.size().await,
        store.index_path().display()
    );

    if let Some(dir) = &cfg.preload_dir {
        match store.ingest_directory(dir).await {
            Ok(summary) => info!("Precarga de {} completada. {}", dir.display(), summary),
            Err(err) => error!("Error precargando {}: {}", dir.display(), err),
        }
    }

    // 4. Orquestador de respuestas
    let generator = Arc::new(LlmManager::from_config(&cfg));
    let assistant = Arc::new(Assistant::new(
        store.clone(),
        generator,
        cfg.retry.clone(),
        cfg.history_turns,
    ));

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState::new(cfg.clone(), store, assistant);

    // 6. Configurar el router de la API y el servicio de ficheros estáticos
    let app = Router::new()
        .merge(api::create_router(app_state))
        .fallback_service(ServeDir::new(&cfg.static_dir))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {}", cfg.server_addr))?;
    let server_url = format!("http://{}", cfg.server_addr);
    info!("🚀 Servidor escuchando en {}", &server_url);

    // Abrir el frontend en el navegador por defecto
    if cfg.open_browser && webbrowser::open(&server_url).is_err() {
        info!("No se pudo abrir el navegador. Por favor, accede a {} manualmente.", server_url);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .context("Error en el servidor HTTP")?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
