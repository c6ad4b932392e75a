//! Prediagnóstico local por reglas, sin dependencias de red.
//!
//! Es el último peldaño de la escalera de degradación: siempre responde.
//! Busca frases de alarma sobre el texto normalizado y acompaña el resultado
//! con hasta tres fragmentos de referencia elegidos por puntuación léxica.

use serde::{Deserialize, Serialize};

use crate::index::Document;
use crate::retrieval::{self, EvidenceItem};

/// Confianza del prediagnóstico por reglas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confianza {
    Baja,
    Media,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackResult {
    pub recomendaciones: String,
    pub red_flags: Vec<String>,
    pub confidence: Confianza,
    pub disclaimer: String,
}

/// Categorías fijas de señales de alarma y los patrones que las disparan.
const BANDERAS_ROJAS: &[(&str, &[&str])] = &[
    ("Convulsiones", &["convuls"]),
    ("Dificultad respiratoria", &["dificultad respir", "respiraci"]),
    (
        "Pérdida de conciencia/colapso",
        &["colaps", "desmay", "inconscien"],
    ),
    ("Sangrado profuso", &["sangr", "hemorrag"]),
    (
        "Tos persistente / dificultad respiratoria",
        &["sibil", "tos persistente", "tos seca"],
    ),
];

const RECOMENDACION_GENERAL: &str = "Mantén a la mascota en reposo, ofrece agua en pequeñas \
    cantidades, evita medicar por tu cuenta y observa durante 24 horas. Si empeora, acude a \
    urgencias.";
const RECOMENDACION_URGENTE: &str = "Se detectaron signos de alerta. Lleva al animal a urgencias \
    veterinarias inmediatamente.";
const DISCLAIMER: &str = "Respuesta orientativa generada por reglas locales; no sustituye la \
    consulta veterinaria.";

/// Análisis determinista del texto de síntomas. Mismo texto, mismo resultado.
pub fn generate(sintomas: &str) -> FallbackResult {
    let texto = sintomas.to_lowercase();
    let red_flags: Vec<String> = BANDERAS_ROJAS
        .iter()
        .filter(|(_, patrones)| patrones.iter().any(|p| texto.contains(p)))
        .map(|(etiqueta, _)| etiqueta.to_string())
        .collect();

    let (recomendaciones, confidence) = if red_flags.is_empty() {
        (RECOMENDACION_GENERAL.to_string(), Confianza::Baja)
    } else {
        (RECOMENDACION_URGENTE.to_string(), Confianza::Media)
    };

    FallbackResult {
        recomendaciones,
        red_flags,
        confidence,
        disclaimer: DISCLAIMER.to_string(),
    }
}

/// Selecciona hasta 3 fragmentos de apoyo por puntuación léxica. Sólo cuentan
/// los documentos con puntuación positiva; los fragmentos se recortan a 400
/// caracteres.
pub fn evidencia_lexica(docs: &[Document], sintomas: &str) -> (Vec<EvidenceItem>, Vec<String>) {
    let evidencia: Vec<EvidenceItem> = retrieval::top_k(docs, sintomas, None, None, 3)
        .into_iter()
        .filter(|e| e.score > 0.0)
        .map(|e| EvidenceItem {
            text: e.text.chars().take(400).collect(),
            ..e
        })
        .collect();
    let fuentes = evidencia.iter().map(|e| e.id.clone()).collect();
    (evidencia, fuentes)
}
