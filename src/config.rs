//! Carga y gestión de configuración de la aplicación (corpus, índice y LLM).

use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Result};

/// Qué responder cuando la salida generada no supera la validación: `Soft`
/// devuelve un éxito degradado con aviso de revisión; `Hard` lo trata como
/// error degradado en la superficie HTTP. El registro persistido es idéntico.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoliticaSalidaInvalida {
    Soft,
    Hard,
}

impl PoliticaSalidaInvalida {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "soft" => Ok(Self::Soft),
            "hard" => Ok(Self::Hard),
            otro => Err(anyhow!("política de salida inválida no soportada: {otro}")),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub corpus_dir: PathBuf,
    pub ruta_indice: PathBuf,
    pub ruta_consultas: PathBuf,

    pub modelo_embeddings: String,
    pub modelos_generacion: Vec<String>,
    pub top_k: usize,

    pub species_gating: bool,
    pub validacion_schema: bool,
    pub embeddings_activados: bool,
    pub politica_salida_invalida: PoliticaSalidaInvalida,

    pub max_reintentos: u32,
    pub espera_base_ms: u64,
    pub jitter_max_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:3344".to_string(),
            corpus_dir: PathBuf::from("data/vet"),
            ruta_indice: PathBuf::from("data/vet_index.json"),
            ruta_consultas: PathBuf::from("data/consultas.jsonl"),
            modelo_embeddings: "text-embedding-3-small".to_string(),
            modelos_generacion: vec!["gpt-4o-mini".to_string(), "gpt-4o".to_string()],
            top_k: 4,
            species_gating: false,
            validacion_schema: true,
            embeddings_activados: true,
            politica_salida_invalida: PoliticaSalidaInvalida::Soft,
            max_reintentos: 3,
            espera_base_ms: 500,
            jitter_max_ms: 200,
        }
    }
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let defecto = Self::default();

        let server_addr =
            env::var("SERVER_ADDR").unwrap_or(defecto.server_addr);
        let corpus_dir = env::var("CORPUS_DIR")
            .map(PathBuf::from)
            .unwrap_or(defecto.corpus_dir);
        let ruta_indice = env::var("INDEX_FILE")
            .map(PathBuf::from)
            .unwrap_or(defecto.ruta_indice);
        let ruta_consultas = env::var("CONSULTS_FILE")
            .map(PathBuf::from)
            .unwrap_or(defecto.ruta_consultas);

        let modelo_embeddings =
            env::var("LLM_EMBEDDING_MODEL").unwrap_or(defecto.modelo_embeddings);
        let modelos_generacion = match env::var("LLM_CHAT_MODELS") {
            Ok(lista) => {
                let modelos: Vec<String> = lista
                    .split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(str::to_string)
                    .collect();
                if modelos.is_empty() {
                    return Err(anyhow!("LLM_CHAT_MODELS no contiene ningún modelo"));
                }
                modelos
            }
            Err(_) => defecto.modelos_generacion,
        };
        let top_k = leer_numero("TOP_K", defecto.top_k as u64)? as usize;

        let species_gating = leer_bool("SPECIES_GATING", defecto.species_gating)?;
        let validacion_schema = leer_bool("SCHEMA_VALIDATION", defecto.validacion_schema)?;
        let embeddings_activados = leer_bool("EMBEDDINGS_ENABLED", defecto.embeddings_activados)?;
        let politica_salida_invalida = match env::var("INVALID_OUTPUT_POLICY") {
            Ok(valor) => PoliticaSalidaInvalida::from_str(&valor)?,
            Err(_) => defecto.politica_salida_invalida,
        };

        let max_reintentos = leer_numero("AI_MAX_RETRIES", defecto.max_reintentos as u64)? as u32;
        let espera_base_ms = leer_numero("AI_BACKOFF_BASE_MS", defecto.espera_base_ms)?;
        let jitter_max_ms = leer_numero("AI_BACKOFF_JITTER_MS", defecto.jitter_max_ms)?;

        Ok(Self {
            server_addr,
            corpus_dir,
            ruta_indice,
            ruta_consultas,
            modelo_embeddings,
            modelos_generacion,
            top_k,
            species_gating,
            validacion_schema,
            embeddings_activados,
            politica_salida_invalida,
            max_reintentos,
            espera_base_ms,
            jitter_max_ms,
        })
    }
}

fn leer_bool(clave: &str, defecto: bool) -> Result<bool> {
    match env::var(clave) {
        Ok(valor) => match valor.to_lowercase().as_str() {
            "1" | "true" | "si" | "sí" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            otro => Err(anyhow!("valor no booleano en {clave}: {otro}")),
        },
        Err(_) => Ok(defecto),
    }
}

fn leer_numero(clave: &str, defecto: u64) -> Result<u64> {
    match env::var(clave) {
        Ok(valor) => valor
            .parse::<u64>()
            .map_err(|_| anyhow!("valor no numérico en {clave}: {valor}")),
        Err(_) => Ok(defecto),
    }
}
