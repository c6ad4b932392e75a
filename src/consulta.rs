//! Registro auditable de consultas y sus almacenes.
//!
//! Cada envío de síntomas produce exactamente un registro, siempre en estado
//! `pending`. Los registros nunca se borran y sus campos de consulta y
//! respuesta son inmutables tras la creación; sólo la operación de revisión
//! cambia el estado y adjunta los campos del veterinario.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::RwLock;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::TriageResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsultStatus {
    Pending,
    Reviewed,
    Closed,
}

/// La entrada de auditoría de un prediagnóstico, con éxito o sin él.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultRecord {
    pub id: String,
    pub usuario_id: Option<String>,
    pub sintomas: String,
    pub especie: Option<String>,
    pub edad: Option<String>,
    pub contexto: Option<String>,
    pub sources: Vec<String>,
    pub raw_response: String,
    pub parsed_response: Option<TriageResult>,
    pub status: ConsultStatus,
    pub vet_id: Option<String>,
    pub vet_comment: Option<String>,
    pub nota: Option<String>,
    pub created_at: String,
}

impl ConsultRecord {
    /// Crea un registro nuevo en estado `pending` con id y marca de tiempo.
    #[allow(clippy::too_many_arguments)]
    pub fn nueva(
        usuario_id: Option<String>,
        sintomas: String,
        especie: Option<String>,
        edad: Option<String>,
        contexto: Option<String>,
        sources: Vec<String>,
        raw_response: String,
        parsed_response: Option<TriageResult>,
        nota: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            usuario_id,
            sintomas,
            especie,
            edad,
            contexto,
            sources,
            raw_response,
            parsed_response,
            status: ConsultStatus::Pending,
            vet_id: None,
            vet_comment: None,
            nota,
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Almacén del historial de consultas. A diferencia del índice de documentos
/// este almacén es autoritativo: si falla, el pipeline falla.
#[async_trait]
pub trait ConsultStore: Send + Sync {
    async fn create(&self, registro: ConsultRecord) -> Result<String>;
    async fn find_by_id(&self, id: &str) -> Result<Option<ConsultRecord>>;
    async fn list(&self) -> Result<Vec<ConsultRecord>>;
    /// Operación de revisión: sólo admite `reviewed` o `closed`.
    async fn review(
        &self,
        id: &str,
        vet_id: &str,
        comentario: Option<String>,
        estado: ConsultStatus,
    ) -> Result<Option<ConsultRecord>>;
}

fn aplicar_revision(
    registro: &mut ConsultRecord,
    vet_id: &str,
    comentario: Option<String>,
    estado: ConsultStatus,
) {
    registro.status = estado;
    registro.vet_id = Some(vet_id.to_string());
    registro.vet_comment = comentario;
}

/// Almacén en memoria, pensado para tests y desarrollo.
#[derive(Default)]
pub struct MemoryConsultStore {
    registros: RwLock<Vec<ConsultRecord>>,
}

impl MemoryConsultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConsultStore for MemoryConsultStore {
    async fn create(&self, registro: ConsultRecord) -> Result<String> {
        let id = registro.id.clone();
        self.registros.write().unwrap().push(registro);
        Ok(id)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ConsultRecord>> {
        Ok(self
            .registros
            .read()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<ConsultRecord>> {
        Ok(self.registros.read().unwrap().clone())
    }

    async fn review(
        &self,
        id: &str,
        vet_id: &str,
        comentario: Option<String>,
        estado: ConsultStatus,
    ) -> Result<Option<ConsultRecord>> {
        if estado == ConsultStatus::Pending {
            bail!("una revisión no puede devolver la consulta a 'pending'");
        }
        let mut registros = self.registros.write().unwrap();
        let Some(registro) = registros.iter_mut().find(|r| r.id == id) else {
            return Ok(None);
        };
        aplicar_revision(registro, vet_id, comentario, estado);
        Ok(Some(registro.clone()))
    }
}

/// Almacén durable en un fichero JSONL, un registro por línea.
///
/// La creación es un append; la revisión reescribe el fichero completo a
/// través de un temporal para no perder líneas ante un corte.
pub struct JsonlConsultStore {
    ruta: PathBuf,
    candado: tokio::sync::Mutex<()>,
}

impl JsonlConsultStore {
    pub fn new(ruta: PathBuf) -> Self {
        Self {
            ruta,
            candado: tokio::sync::Mutex::new(()),
        }
    }

    fn leer_todos(&self) -> Result<Vec<ConsultRecord>> {
        if !self.ruta.exists() {
            return Ok(Vec::new());
        }
        let crudo = fs::read_to_string(&self.ruta)
            .with_context(|| format!("no se pudo leer {}", self.ruta.display()))?;
        let mut registros = Vec::new();
        for linea in crudo.lines().filter(|l| !l.trim().is_empty()) {
            let registro: ConsultRecord = serde_json::from_str(linea)
                .with_context(|| "registro de consulta corrupto en el almacén")?;
            registros.push(registro);
        }
        Ok(registros)
    }

    fn escribir_todos(&self, registros: &[ConsultRecord]) -> Result<()> {
        let temporal = self.ruta.with_extension("jsonl.tmp");
        let mut cuerpo = String::new();
        for registro in registros {
            cuerpo.push_str(&serde_json::to_string(registro)?);
            cuerpo.push('\n');
        }
        fs::write(&temporal, cuerpo)?;
        fs::rename(&temporal, &self.ruta)?;
        Ok(())
    }
}

#[async_trait]
impl ConsultStore for JsonlConsultStore {
    async fn create(&self, registro: ConsultRecord) -> Result<String> {
        let _guia = self.candado.lock().await;
        if let Some(padre) = self.ruta.parent() {
            fs::create_dir_all(padre)?;
        }
        let mut fichero = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.ruta)
            .with_context(|| format!("no se pudo abrir {}", self.ruta.display()))?;
        let linea = serde_json::to_string(&registro)?;
        writeln!(fichero, "{linea}")?;
        Ok(registro.id)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ConsultRecord>> {
        let _guia = self.candado.lock().await;
        Ok(self.leer_todos()?.into_iter().find(|r| r.id == id))
    }

    async fn list(&self) -> Result<Vec<ConsultRecord>> {
        let _guia = self.candado.lock().await;
        self.leer_todos()
    }

    async fn review(
        &self,
        id: &str,
        vet_id: &str,
        comentario: Option<String>,
        estado: ConsultStatus,
    ) -> Result<Option<ConsultRecord>> {
        if estado == ConsultStatus::Pending {
            bail!("una revisión no puede devolver la consulta a 'pending'");
        }
        let _guia = self.candado.lock().await;
        let mut registros = self.leer_todos()?;
        let Some(registro) = registros.iter_mut().find(|r| r.id == id) else {
            return Ok(None);
        };
        aplicar_revision(registro, vet_id, comentario, estado);
        let copia = registro.clone();
        self.escribir_todos(&registros)?;
        Ok(Some(copia))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registro_de_prueba() -> ConsultRecord {
        ConsultRecord::nueva(
            Some("dueno-1".into()),
            "mi perro tose".into(),
            Some("perro".into()),
            None,
            None,
            vec!["tos.md".into()],
            "fallback".into(),
            None,
            Some("generation_not_configured".into()),
        )
    }

    #[tokio::test]
    async fn memoria_crea_y_encuentra() {
        let store = MemoryConsultStore::new();
        let registro = registro_de_prueba();
        let id = store.create(registro.clone()).await.unwrap();
        assert_eq!(id, registro.id);

        let recuperado = store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(recuperado.status, ConsultStatus::Pending);
        assert_eq!(recuperado.sintomas, "mi perro tose");
        assert!(store.find_by_id("no-existe").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn la_revision_adjunta_campos_sin_tocar_la_consulta() {
        let store = MemoryConsultStore::new();
        let registro = registro_de_prueba();
        let sintomas = registro.sintomas.clone();
        let id = store.create(registro).await.unwrap();

        let revisado = store
            .review(&id, "vet-9", Some("ver en 24h".into()), ConsultStatus::Reviewed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(revisado.status, ConsultStatus::Reviewed);
        assert_eq!(revisado.vet_id.as_deref(), Some("vet-9"));
        assert_eq!(revisado.sintomas, sintomas);
    }

    #[tokio::test]
    async fn la_revision_rechaza_volver_a_pending() {
        let store = MemoryConsultStore::new();
        let id = store.create(registro_de_prueba()).await.unwrap();
        assert!(store
            .review(&id, "vet-9", None, ConsultStatus::Pending)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn jsonl_persiste_entre_instancias() {
        let dir = tempfile::tempdir().unwrap();
        let ruta = dir.path().join("consultas.jsonl");
        let id = {
            let store = JsonlConsultStore::new(ruta.clone());
            store.create(registro_de_prueba()).await.unwrap()
        };

        let store = JsonlConsultStore::new(ruta);
        let registros = store.list().await.unwrap();
        assert_eq!(registros.len(), 1);

        let revisado = store
            .review(&id, "vet-1", None, ConsultStatus::Closed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(revisado.status, ConsultStatus::Closed);
        assert_eq!(
            store.find_by_id(&id).await.unwrap().unwrap().status,
            ConsultStatus::Closed
        );
    }
}
