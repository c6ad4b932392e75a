use std::sync::{Arc, Mutex};

use axum::Router;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use vet_triage_rag::{
    api,
    app_state::AppState,
    config::AppConfig,
    consulta::JsonlConsultStore,
    llm::LlmManager,
    pipeline::TriageService,
};

#[tokio::main]
async fn main() {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = AppConfig::from_env().expect("Error al cargar la configuración");

    // 3. Construir los colaboradores del pipeline
    let llm = Arc::new(LlmManager::from_config(&cfg));
    let store = Arc::new(JsonlConsultStore::new(cfg.ruta_consultas.clone()));
    let servicio = Arc::new(TriageService::new(
        cfg.clone(),
        llm.clone(),
        llm,
        store,
    ));

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 4. Estado compartido y router de la API
    let app_state = AppState {
        servicio,
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
    };
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 5. Iniciar el servidor
    let server_addr = cfg.server_addr.clone();
    let listener = tokio::net::TcpListener::bind(&server_addr)
        .await
        .expect("No se pudo abrir el puerto del servidor");
    info!("🚀 Servidor de triaje escuchando en http://{server_addr}");

    // El índice se carga de forma perezosa en la primera consulta; véase
    // DocumentIndex::ensure_loaded.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .expect("El servidor terminó con error");

    info!("✅ Servidor cerrado correctamente.");
}
