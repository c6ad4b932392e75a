//! Selección de evidencia: similitud vectorial cuando hay embeddings y
//! puntuación léxica como camino de respaldo.
//!
//! Las dos puntuaciones no son comparables entre sí: el coseno vive en
//! [-1, 1] y la léxica cuenta apariciones de términos.

use serde::Serialize;

use crate::index::Document;

/// Un fragmento de referencia seleccionado como contexto.
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceItem {
    pub id: String,
    pub text: String,
    pub score: f64,
}

/// Similitud coseno con un épsilon que evita la división por cero.
pub fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let mut dot = 0.0;
    let mut na = 0.0;
    let mut nb = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    dot / (na.sqrt() * nb.sqrt() + 1e-10)
}

/// Puntuación léxica: suma de apariciones de cada término de la consulta
/// (en minúsculas) como subcadena del texto.
pub fn puntuacion_lexica(consulta: &str, texto: &str) -> f64 {
    let texto = texto.to_lowercase();
    consulta
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| texto.matches(t).count() as f64)
        .sum()
}

/// Devuelve hasta `k` evidencias ordenadas por puntuación descendente.
///
/// Con `vector_consulta` presente y algún documento con embedding se usa el
/// camino vectorial; si no, el léxico, que nunca falla. Los empates
/// conservan el orden de inserción del índice. Si la consulta trae especie,
/// los documentos etiquetados con la misma especie se prefieren sin reducir
/// el número de resultados disponibles.
pub fn top_k(
    docs: &[Document],
    consulta: &str,
    vector_consulta: Option<&[f64]>,
    especie: Option<&str>,
    k: usize,
) -> Vec<EvidenceItem> {
    let vectorial = vector_consulta
        .filter(|_| docs.iter().any(|d| d.embedding.is_some()));

    let mut puntuados: Vec<(usize, f64)> = match vectorial {
        Some(qv) => docs
            .iter()
            .enumerate()
            .filter_map(|(i, d)| d.embedding.as_ref().map(|e| (i, cosine(qv, e))))
            .collect(),
        None => docs
            .iter()
            .enumerate()
            .map(|(i, d)| (i, puntuacion_lexica(consulta, &d.text)))
            .collect(),
    };

    // Orden estable: preferencia de especie, luego puntuación; los empates
    // quedan en orden de inserción.
    let misma_especie = |i: usize| -> bool {
        match especie {
            Some(e) => docs[i].especie.as_deref() == Some(e),
            None => false,
        }
    };
    puntuados.sort_by(|a, b| {
        misma_especie(b.0)
            .cmp(&misma_especie(a.0))
            .then(b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal))
    });
    puntuados.truncate(k);

    puntuados
        .into_iter()
        .map(|(i, score)| EvidenceItem {
            id: docs[i].id.clone(),
            text: docs[i].text.clone(),
            score,
        })
        .collect()
}
