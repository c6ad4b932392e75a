//! Orquestador del pipeline de triaje.
//!
//! Flujo: validar la entrada, intentar el embedding de la consulta, recuperar
//! evidencia, generar el prediagnóstico, sanear y validar la salida. Los
//! fallos por cuota o falta de credencial bajan por la escalera de
//! degradación hasta el prediagnóstico local; cualquier otro fallo del
//! proveedor se propaga para que el operador lo vea. Todos los caminos
//! (salvo el rechazo) terminan persistiendo un registro de consulta antes de
//! responder.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::consulta::{ConsultRecord, ConsultStore};
use crate::error::AiError;
use crate::extract;
use crate::fallback::{self, FallbackResult};
use crate::index::DocumentIndex;
use crate::llm::{Embedder, Generator};
use crate::retrieval::{self, EvidenceItem};
use crate::schema::{self, TriageResult};
use crate::species;

/// Consulta de triaje tal y como llega del colaborador de rutas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageQuery {
    #[serde(default)]
    pub usuario_id: Option<String>,
    pub sintomas: String,
    #[serde(default)]
    pub especie: Option<String>,
    #[serde(default)]
    pub edad: Option<String>,
    #[serde(default)]
    pub contexto: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EstadoRespuesta {
    Ok,
    Degraded,
    Rejected,
}

/// Respuesta del pipeline. `nota` distingue los dos modos degradados:
/// `fallback` (proveedor caído) y `invalid_json_from_llm` (salida inválida).
#[derive(Debug, Clone, Serialize)]
pub struct SubmitResponse {
    pub estado: EstadoRespuesta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consult_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resultado: Option<TriageResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackResult>,
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub evidencia: Vec<EvidenceItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mensaje: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modelo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nota: Option<String>,
}

impl SubmitResponse {
    fn rechazada(mensaje: impl Into<String>) -> Self {
        Self {
            estado: EstadoRespuesta::Rejected,
            consult_id: None,
            resultado: None,
            fallback: None,
            sources: Vec::new(),
            evidencia: Vec::new(),
            mensaje: Some(mensaje.into()),
            modelo: None,
            nota: None,
        }
    }
}

const MENSAJE_FALLBACK: &str = "El backend de IA no está disponible. Se devolvió un \
    prediagnóstico orientativo local, pendiente de revisión profesional.";
const MENSAJE_INVALIDO: &str = "La respuesta generada no superó la validación. La consulta \
    queda registrada para revisión profesional.";

/// Servicio de triaje: posee el índice, los proveedores y el almacén.
pub struct TriageService {
    config: AppConfig,
    indice: DocumentIndex,
    embedder: Arc<dyn Embedder>,
    generador: Arc<dyn Generator>,
    store: Arc<dyn ConsultStore>,
}

impl TriageService {
    pub fn new(
        config: AppConfig,
        embedder: Arc<dyn Embedder>,
        generador: Arc<dyn Generator>,
        store: Arc<dyn ConsultStore>,
    ) -> Self {
        let indice = DocumentIndex::new(
            config.corpus_dir.clone(),
            config.ruta_indice.clone(),
            config.embeddings_activados,
        );
        Self {
            config,
            indice,
            embedder,
            generador,
            store,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn indice(&self) -> &DocumentIndex {
        &self.indice
    }

    /// Punto de entrada del pipeline. Una consulta produce exactamente un
    /// registro, salvo los rechazos, que no producen ninguno.
    pub async fn submit(&self, consulta: TriageQuery) -> Result<SubmitResponse> {
        // VALIDATE_INPUT
        let sintomas = consulta.sintomas.trim().to_string();
        if sintomas.is_empty() {
            return Ok(SubmitResponse::rechazada("sintomas requerido"));
        }

        let declarada = consulta
            .especie
            .as_deref()
            .map(species::normalizar)
            .filter(|e| !e.is_empty());
        let reconocida = declarada
            .as_deref()
            .and_then(species::canonica)
            .or_else(|| species::inferir(&sintomas));
        if self.config.species_gating && reconocida.is_none() {
            let mensaje = match &declarada {
                Some(e) => format!("especie no reconocida: {e}"),
                None => "especie requerida: indícala o descríbela en los síntomas".to_string(),
            };
            return Ok(SubmitResponse::rechazada(mensaje));
        }
        let especie = reconocida.or(declarada);

        self.indice.ensure_loaded(self.embedder.as_ref()).await?;

        // EMBEDDING_ATTEMPT
        let mut vector_consulta = None;
        if self.config.embeddings_activados {
            match self.embedder.embed(&sintomas).await {
                Ok(vector) => vector_consulta = Some(vector),
                Err(e) if e.es_recuperable() => {
                    let nota = match &e {
                        AiError::RateLimited => "embedding_rate_limited",
                        _ => "embedding_not_configured",
                    };
                    warn!("embedding no disponible ({e}), degradando a fallback");
                    return self.responder_fallback(&consulta, &sintomas, especie, nota).await;
                }
                Err(e) => {
                    return Err(anyhow!(e).context("fallo del backend de embeddings"));
                }
            }
        }

        // RETRIEVE_EVIDENCE
        let docs = self.indice.documentos().await;
        let evidencia = retrieval::top_k(
            &docs,
            &sintomas,
            vector_consulta.as_deref(),
            especie.as_deref(),
            self.config.top_k,
        );
        let sources: Vec<String> = evidencia.iter().map(|e| e.id.clone()).collect();

        // GENERATE
        let prompt = construir_prompt(&consulta, &sintomas, especie.as_deref(), &evidencia);
        let generacion = match self.generador.generate(&prompt).await {
            Ok(g) => g,
            Err(e) if e.es_recuperable() => {
                let nota = match &e {
                    AiError::RateLimited => "generation_rate_limited",
                    _ => "generation_not_configured",
                };
                warn!("generación no disponible ({e}), degradando a fallback");
                return self.responder_fallback(&consulta, &sintomas, especie, nota).await;
            }
            Err(e) => {
                return Err(anyhow!(e).context("fallo del backend de generación"));
            }
        };

        // PARSE_AND_VALIDATE
        let limpio = extract::strip_fences(&generacion.texto);
        let candidato = extract::extract_json_object(limpio)
            .and_then(|objeto| serde_json::from_str::<serde_json::Value>(objeto).ok());
        let parsed: Option<TriageResult> = match &candidato {
            None => None,
            Some(valor) if self.config.validacion_schema => {
                let resultado = schema::validate(valor);
                if !resultado.valido {
                    warn!(errores = ?resultado.errores, "salida generada inválida");
                }
                resultado.saneado
            }
            Some(valor) => Some(schema::sanear_laxo(valor)),
        };

        let registro = ConsultRecord::nueva(
            consulta.usuario_id.clone(),
            sintomas,
            especie,
            consulta.edad.clone(),
            consulta.contexto.clone(),
            sources.clone(),
            generacion.texto.clone(),
            parsed.clone(),
            parsed.is_none().then(|| "invalid_json_from_llm".to_string()),
        );
        let consult_id = self
            .store
            .create(registro)
            .await
            .context("no se pudo persistir la consulta")?;

        match parsed {
            Some(resultado) => {
                info!(consulta = %consult_id, modelo = %generacion.modelo, "triaje generado");
                Ok(SubmitResponse {
                    estado: EstadoRespuesta::Ok,
                    consult_id: Some(consult_id),
                    resultado: Some(resultado),
                    fallback: None,
                    sources,
                    evidencia: Vec::new(),
                    mensaje: None,
                    modelo: Some(generacion.modelo),
                    nota: None,
                })
            }
            None => Ok(SubmitResponse {
                estado: EstadoRespuesta::Degraded,
                consult_id: Some(consult_id),
                resultado: None,
                fallback: None,
                sources,
                evidencia: Vec::new(),
                mensaje: Some(MENSAJE_INVALIDO.to_string()),
                modelo: Some(generacion.modelo),
                nota: Some("invalid_json_from_llm".to_string()),
            }),
        }
    }

    /// Reconstruye el índice y devuelve el número de documentos.
    pub async fn reindex(&self) -> Result<usize> {
        self.indice.build(self.embedder.as_ref()).await
    }

    async fn responder_fallback(
        &self,
        consulta: &TriageQuery,
        sintomas: &str,
        especie: Option<String>,
        nota: &str,
    ) -> Result<SubmitResponse> {
        let resultado = fallback::generate(sintomas);
        let docs = self.indice.documentos().await;
        let (evidencia, sources) = fallback::evidencia_lexica(&docs, sintomas);

        let registro = ConsultRecord::nueva(
            consulta.usuario_id.clone(),
            sintomas.to_string(),
            especie,
            consulta.edad.clone(),
            consulta.contexto.clone(),
            sources.clone(),
            "fallback".to_string(),
            None,
            Some(nota.to_string()),
        );
        let consult_id = self
            .store
            .create(registro)
            .await
            .context("no se pudo persistir la consulta")?;
        info!(consulta = %consult_id, nota, "triaje degradado a fallback local");

        Ok(SubmitResponse {
            estado: EstadoRespuesta::Degraded,
            consult_id: Some(consult_id),
            resultado: None,
            fallback: Some(resultado),
            sources,
            evidencia,
            mensaje: Some(MENSAJE_FALLBACK.to_string()),
            modelo: None,
            nota: Some(nota.to_string()),
        })
    }
}

/// Prompt de usuario con la evidencia etiquetada por fuente.
fn construir_prompt(
    consulta: &TriageQuery,
    sintomas: &str,
    especie: Option<&str>,
    evidencia: &[EvidenceItem],
) -> String {
    let bloques: Vec<String> = evidencia
        .iter()
        .map(|e| format!("SOURCE:{}\n{}", e.id, e.text))
        .collect();
    format!(
        "Síntomas: {}\nEspecie: {}\nEdad: {}\nContexto adicional: {}\n\nEVIDENCIA:\n{}",
        sintomas,
        especie.unwrap_or("N/D"),
        consulta.edad.as_deref().unwrap_or("N/D"),
        consulta.contexto.as_deref().unwrap_or("N/A"),
        bloques.join("\n\n---\n\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consulta::MemoryConsultStore;
    use crate::error::AiError;
    use crate::llm::Generacion;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EmbedderFijo(Vec<f64>);

    #[async_trait]
    impl Embedder for EmbedderFijo {
        async fn embed(&self, _texto: &str) -> std::result::Result<Vec<f64>, AiError> {
            Ok(self.0.clone())
        }
    }

    struct GeneradorFijo(String);

    #[async_trait]
    impl Generator for GeneradorFijo {
        async fn generate(&self, _prompt: &str) -> std::result::Result<Generacion, AiError> {
            Ok(Generacion {
                texto: self.0.clone(),
                modelo: "modelo-prueba".to_string(),
            })
        }
    }

    struct GeneradorContador {
        llamadas: AtomicUsize,
        error: AiError,
    }

    #[async_trait]
    impl Generator for GeneradorContador {
        async fn generate(&self, _prompt: &str) -> std::result::Result<Generacion, AiError> {
            self.llamadas.fetch_add(1, Ordering::SeqCst);
            Err(self.error.clone())
        }
    }

    fn config_de_prueba(corpus: &std::path::Path) -> AppConfig {
        AppConfig {
            corpus_dir: corpus.to_path_buf(),
            ruta_indice: corpus.join("indice.json"),
            ..AppConfig::default()
        }
    }

    fn consulta(sintomas: &str) -> TriageQuery {
        TriageQuery {
            usuario_id: Some("dueno-1".to_string()),
            sintomas: sintomas.to_string(),
            especie: None,
            edad: None,
            contexto: None,
        }
    }

    #[tokio::test]
    async fn rechaza_sintomas_vacios_sin_crear_registro() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryConsultStore::new());
        let servicio = TriageService::new(
            config_de_prueba(dir.path()),
            Arc::new(EmbedderFijo(vec![1.0])),
            Arc::new(GeneradorFijo("{}".into())),
            store.clone(),
        );

        let respuesta = servicio.submit(consulta("   ")).await.unwrap();
        assert_eq!(respuesta.estado, EstadoRespuesta::Rejected);
        assert!(respuesta.consult_id.is_none());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn gating_de_especie_rechaza_no_reconocidas() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_de_prueba(dir.path());
        config.species_gating = true;
        let servicio = TriageService::new(
            config,
            Arc::new(EmbedderFijo(vec![1.0])),
            Arc::new(GeneradorFijo("{}".into())),
            Arc::new(MemoryConsultStore::new()),
        );

        let respuesta = servicio
            .submit(consulta("mi iguana no se mueve"))
            .await
            .unwrap();
        assert_eq!(respuesta.estado, EstadoRespuesta::Rejected);

        // Con especie inferible el gating deja pasar.
        let respuesta = servicio
            .submit(consulta("mi perro tiene fiebre"))
            .await
            .unwrap();
        assert_ne!(respuesta.estado, EstadoRespuesta::Rejected);
    }

    #[tokio::test]
    async fn fallo_provider_del_embedding_es_fatal() {
        struct EmbedderRoto;
        #[async_trait]
        impl Embedder for EmbedderRoto {
            async fn embed(&self, _texto: &str) -> std::result::Result<Vec<f64>, AiError> {
                Err(AiError::Provider("tls handshake".into()))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryConsultStore::new());
        let servicio = TriageService::new(
            config_de_prueba(dir.path()),
            Arc::new(EmbedderRoto),
            Arc::new(GeneradorFijo("{}".into())),
            store.clone(),
        );

        let resultado = servicio.submit(consulta("mi gato vomita")).await;
        assert!(resultado.is_err());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rate_limit_en_embedding_salta_directo_al_fallback() {
        struct EmbedderLimitado;
        #[async_trait]
        impl Embedder for EmbedderLimitado {
            async fn embed(&self, _texto: &str) -> std::result::Result<Vec<f64>, AiError> {
                Err(AiError::RateLimited)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("convulsiones.md"), "convulsiones caninas").unwrap();
        let config = config_de_prueba(dir.path());

        let generador = Arc::new(GeneradorContador {
            llamadas: AtomicUsize::new(0),
            error: AiError::RateLimited,
        });
        let servicio = TriageService::new(
            config,
            Arc::new(EmbedderLimitado),
            generador.clone(),
            Arc::new(MemoryConsultStore::new()),
        );

        let respuesta = servicio
            .submit(consulta("mi perro tiene convulsiones"))
            .await
            .unwrap();
        assert_eq!(respuesta.estado, EstadoRespuesta::Degraded);
        assert_eq!(respuesta.nota.as_deref(), Some("embedding_rate_limited"));
        assert!(respuesta.consult_id.is_some());
        assert_eq!(generador.llamadas.load(Ordering::SeqCst), 0);
        assert_eq!(respuesta.sources, vec!["convulsiones.md".to_string()]);
    }
}
