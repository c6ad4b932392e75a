//! Abstracción sobre Rig para embeddings y generación con OpenAI.
//!
//! Las capacidades se exponen como traits (`Embedder`, `Generator`) para que
//! el orquestador y los tests puedan inyectar colaboradores simulados. El
//! gestor real clasifica los fallos del backend y reintenta sólo cuando el
//! proveedor señala throttling.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use rig::completion::Prompt;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::error::{clasificar_fallo_proveedor, AiError};

/// Texto generado junto al modelo candidato que lo produjo.
#[derive(Debug, Clone)]
pub struct Generacion {
    pub texto: String,
    pub modelo: String,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texto: &str) -> Result<Vec<f64>, AiError>;
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Generacion, AiError>;
}

/// Política de reintentos con retroceso exponencial y jitter acotado.
///
/// Sólo se reintenta ante `RateLimited`; agotar los reintentos produce un
/// `RateLimited` terminal. Las esperas son suspensiones no bloqueantes.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_reintentos: u32,
    pub espera_base: Duration,
    pub jitter_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_reintentos: 3,
            espera_base: Duration::from_millis(500),
            jitter_max: Duration::from_millis(200),
        }
    }
}

/// Ejecuta `operacion` reintentando sólo los fallos por cuota, doblando la
/// espera en cada intento.
pub async fn with_retry<T, F, Fut>(politica: &RetryPolicy, mut operacion: F) -> Result<T, AiError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, AiError>>,
{
    let mut espera = politica.espera_base;
    let mut intento = 0u32;
    loop {
        match operacion().await {
            Ok(valor) => return Ok(valor),
            Err(AiError::RateLimited) if intento < politica.max_reintentos => {
                let jitter = rand::thread_rng()
                    .gen_range(0..=politica.jitter_max.as_millis() as u64);
                let pausa = espera + Duration::from_millis(jitter);
                debug!(
                    intento = intento + 1,
                    espera_ms = pausa.as_millis() as u64,
                    "backend limitado por cuota, reintentando"
                );
                tokio::time::sleep(pausa).await;
                espera = espera.saturating_mul(2);
                intento += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Gestor de LLMs sobre el proveedor OpenAI de Rig.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub modelo_embeddings: String,
    pub modelos_generacion: Vec<String>,
    pub reintentos: RetryPolicy,
}

const PROMPT_SISTEMA: &str = r#"
Eres un asistente veterinario orientativo. Usa SOLO la EVIDENCIA proporcionada
para elaborar un prediagnóstico preliminar. Responde ÚNICAMENTE con un objeto
JSON con estas propiedades exactas:
animal (string), urgencia ("baja"|"media"|"alta"|"emergencia"|"desconocida"),
causas_frecuentes (array de strings), pasos_recomendados (array de strings),
alerta (string, puede ser vacía), responsabilidad (string).
Nunca inventes fuentes; si la información es insuficiente indica incertidumbre
con urgencia "desconocida". No añadas texto fuera del JSON.
"#;

impl LlmManager {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            modelo_embeddings: cfg.modelo_embeddings.clone(),
            modelos_generacion: cfg.modelos_generacion.clone(),
            reintentos: RetryPolicy {
                max_reintentos: cfg.max_reintentos,
                espera_base: Duration::from_millis(cfg.espera_base_ms),
                jitter_max: Duration::from_millis(cfg.jitter_max_ms),
            },
        }
    }

    fn clave_presente() -> Result<(), AiError> {
        match std::env::var("OPENAI_API_KEY") {
            Ok(clave) if !clave.is_empty() => Ok(()),
            _ => Err(AiError::NotConfigured("OPENAI_API_KEY".to_string())),
        }
    }

    async fn embed_una_vez(&self, texto: &str) -> Result<Vec<f64>, AiError> {
        use rig::client::EmbeddingsClient as _;
        use rig::embeddings::EmbeddingModel as _;
        use rig::providers::openai::{self, TEXT_EMBEDDING_3_SMALL};

        let client = openai::Client::from_env();
        let nombre = if self.modelo_embeddings.is_empty() {
            TEXT_EMBEDDING_3_SMALL
        } else {
            self.modelo_embeddings.as_str()
        };
        let modelo = client.embedding_model(nombre);

        let embeddings = modelo
            .embed_texts(vec![texto.to_string()])
            .await
            .map_err(|e| clasificar_fallo_proveedor(&e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .map(|e| e.vec)
            .ok_or_else(|| AiError::Provider("el backend no devolvió ningún embedding".to_string()))
    }

    async fn generar_una_vez(&self, modelo: &str, prompt: &str) -> Result<String, AiError> {
        use rig::client::CompletionClient as _;
        use rig::providers::openai;

        let client = openai::Client::from_env();
        let agente = client.agent(modelo).preamble(PROMPT_SISTEMA).build();
        agente
            .prompt(prompt)
            .await
            .map_err(|e| clasificar_fallo_proveedor(&e.to_string()))
    }
}

#[async_trait]
impl Embedder for LlmManager {
    async fn embed(&self, texto: &str) -> Result<Vec<f64>, AiError> {
        Self::clave_presente()?;
        with_retry(&self.reintentos, || self.embed_una_vez(texto)).await
    }
}

#[async_trait]
impl Generator for LlmManager {
    /// Prueba los modelos candidatos en orden; gana el primero que devuelva
    /// texto no vacío. Si todos fallan se propaga el último error.
    async fn generate(&self, prompt: &str) -> Result<Generacion, AiError> {
        Self::clave_presente()?;

        let mut ultimo_error =
            AiError::Provider("sin modelos de generación configurados".to_string());
        for modelo in &self.modelos_generacion {
            match with_retry(&self.reintentos, || self.generar_una_vez(modelo, prompt)).await {
                Ok(texto) if !texto.trim().is_empty() => {
                    return Ok(Generacion {
                        texto,
                        modelo: modelo.clone(),
                    });
                }
                Ok(_) => {
                    warn!("el modelo {modelo} devolvió texto vacío, probando el siguiente");
                    ultimo_error =
                        AiError::Provider(format!("respuesta vacía del modelo {modelo}"));
                }
                Err(e) => {
                    warn!("fallo del modelo {modelo}: {e}");
                    ultimo_error = e;
                }
            }
        }
        Err(ultimo_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn reintenta_rate_limited_hasta_agotar() {
        let politica = RetryPolicy {
            max_reintentos: 3,
            espera_base: Duration::from_millis(10),
            jitter_max: Duration::ZERO,
        };
        let intentos = AtomicU32::new(0);
        let inicio = tokio::time::Instant::now();

        let resultado: Result<(), AiError> = with_retry(&politica, || {
            intentos.fetch_add(1, Ordering::SeqCst);
            async { Err(AiError::RateLimited) }
        })
        .await;

        assert_eq!(resultado, Err(AiError::RateLimited));
        assert_eq!(intentos.load(Ordering::SeqCst), 4);
        // Esperas de 10, 20 y 40 ms, dobladas y sin jitter.
        assert!(inicio.elapsed() >= Duration::from_millis(70));
    }

    #[tokio::test]
    async fn no_reintenta_fallos_no_recuperables() {
        let politica = RetryPolicy {
            max_reintentos: 3,
            espera_base: Duration::from_millis(1),
            jitter_max: Duration::ZERO,
        };
        let intentos = AtomicU32::new(0);

        let resultado: Result<(), AiError> = with_retry(&politica, || {
            intentos.fetch_add(1, Ordering::SeqCst);
            async { Err(AiError::Provider("boom".to_string())) }
        })
        .await;

        assert_eq!(resultado, Err(AiError::Provider("boom".to_string())));
        assert_eq!(intentos.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn devuelve_el_primer_exito_tras_reintentos() {
        let politica = RetryPolicy {
            max_reintentos: 3,
            espera_base: Duration::from_millis(1),
            jitter_max: Duration::ZERO,
        };
        let intentos = AtomicU32::new(0);

        let resultado = with_retry(&politica, || {
            let n = intentos.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AiError::RateLimited)
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(resultado, Ok(2));
        assert_eq!(intentos.load(Ordering::SeqCst), 3);
    }
}
