//! Índice de documentos de referencia con embeddings opcionales.
//!
//! El índice es una caché reconstruible: se persiste como un artefacto JSON
//! y puede cargarse en procesos posteriores en lugar de reconstruirse. Los
//! embeddings son un extra; un corpus indexado sin vectores sigue siendo
//! útil por el camino léxico.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::llm::Embedder;
use crate::species;

/// Un documento de referencia del corpus. El id es el nombre del fichero,
/// extensión incluida.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub embedding: Option<Vec<f64>>,
    #[serde(default)]
    pub especie: Option<String>,
}

/// Servicio de índice con carga perezosa por instancia.
///
/// Sustituye al clásico flag global "ya indexado": cada instancia guarda su
/// propia caché, así los tests construyen índices independientes. Dos
/// peticiones que compitan durante el arranque pueden reconstruir de más;
/// es inocuo porque la reconstrucción es idempotente.
pub struct DocumentIndex {
    corpus_dir: PathBuf,
    ruta_indice: PathBuf,
    embeddings_activados: bool,
    docs: RwLock<Option<Vec<Document>>>,
}

impl DocumentIndex {
    pub fn new(corpus_dir: PathBuf, ruta_indice: PathBuf, embeddings_activados: bool) -> Self {
        Self {
            corpus_dir,
            ruta_indice,
            embeddings_activados,
            docs: RwLock::new(None),
        }
    }

    /// Garantiza que el índice esté en memoria: primero intenta cargar el
    /// artefacto persistido y, si no existe o está corrupto, reconstruye.
    pub async fn ensure_loaded(&self, embedder: &dyn Embedder) -> Result<()> {
        if self.docs.read().await.is_some() {
            return Ok(());
        }
        if let Some(cargados) = self.cargar_desde_disco() {
            info!(
                documentos = cargados.len(),
                "índice cargado desde {}",
                self.ruta_indice.display()
            );
            *self.docs.write().await = Some(cargados);
            return Ok(());
        }
        self.build(embedder).await?;
        Ok(())
    }

    /// Reconstruye el índice desde el corpus y lo persiste.
    ///
    /// Reconstruir sobre un corpus sin cambios produce los mismos ids y el
    /// mismo recuento. Si el backend de embeddings falla, los documentos
    /// restantes quedan sin vector y la construcción continúa.
    pub async fn build(&self, embedder: &dyn Embedder) -> Result<usize> {
        let ficheros = listar_corpus(&self.corpus_dir)?;
        let mut docs = Vec::with_capacity(ficheros.len());
        let mut backend_agotado = !self.embeddings_activados;

        for (id, texto) in ficheros {
            let embedding = if backend_agotado {
                None
            } else {
                match embedder.embed(&texto).await {
                    Ok(vector) => Some(vector),
                    Err(e) => {
                        warn!("sin embedding para {id}: {e}; el índice continúa sin vectores");
                        backend_agotado = true;
                        None
                    }
                }
            };
            let especie = species::desde_nombre_fichero(&id);
            docs.push(Document {
                id,
                text: texto,
                embedding,
                especie,
            });
        }

        self.persistir(&docs);
        let total = docs.len();
        info!(documentos = total, "índice reconstruido desde {}", self.corpus_dir.display());
        *self.docs.write().await = Some(docs);
        Ok(total)
    }

    /// Copia de los documentos indexados; vacía si aún no se ha cargado.
    pub async fn documentos(&self) -> Vec<Document> {
        self.docs.read().await.clone().unwrap_or_default()
    }

    fn cargar_desde_disco(&self) -> Option<Vec<Document>> {
        if !self.ruta_indice.exists() {
            return None;
        }
        let crudo = match fs::read_to_string(&self.ruta_indice) {
            Ok(c) => c,
            Err(e) => {
                warn!("no se pudo leer el índice persistido: {e}");
                return None;
            }
        };
        match serde_json::from_str::<Vec<Document>>(&crudo) {
            Ok(docs) => Some(docs),
            Err(e) => {
                warn!("índice persistido corrupto, se reconstruirá: {e}");
                None
            }
        }
    }

    fn persistir(&self, docs: &[Document]) {
        // El índice es una caché: si no se puede guardar se avisa y se sigue.
        let resultado = (|| -> Result<()> {
            if let Some(padre) = self.ruta_indice.parent() {
                fs::create_dir_all(padre)?;
            }
            let json = serde_json::to_string(docs)?;
            fs::write(&self.ruta_indice, json)?;
            Ok(())
        })();
        if let Err(e) = resultado {
            warn!("no se pudo persistir el índice en disco: {e}");
        }
    }
}

/// Lee los ficheros `.md`/`.txt` del corpus en orden de nombre. Un directorio
/// inexistente produce un corpus vacío, no un error.
fn listar_corpus(dir: &Path) -> Result<Vec<(String, String)>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut entradas: Vec<(String, PathBuf)> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let nombre = e.file_name().to_string_lossy().to_string();
            let extension = e
                .path()
                .extension()
                .map(|x| x.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            matches!(extension.as_str(), "md" | "txt").then(|| (nombre, e.path().to_path_buf()))
        })
        .collect();
    entradas.sort_by(|a, b| a.0.cmp(&b.0));

    let mut ficheros = Vec::with_capacity(entradas.len());
    for (nombre, ruta) in entradas {
        match fs::read_to_string(&ruta) {
            Ok(texto) => ficheros.push((nombre, texto)),
            Err(e) => warn!("saltando fichero no legible {}: {e}", ruta.display()),
        }
    }
    Ok(ficheros)
}
