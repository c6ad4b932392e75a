//! Contrato estructurado del prediagnóstico y su validador.
//!
//! El validador es estricto con la completitud: nunca se presenta texto
//! crudo del modelo como hecho estructurado. Los campos desconocidos se
//! eliminan del resultado saneado en lugar de rechazar la respuesta.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Nivel de urgencia del prediagnóstico.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgencia {
    Baja,
    Media,
    Alta,
    Emergencia,
    Desconocida,
}

/// Salida estructurada validada del modelo generativo.
///
/// Deserializar con serde ya descarta las propiedades desconocidas, por lo
/// que el saneado es el propio paso de tipado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageResult {
    pub animal: String,
    pub urgencia: Urgencia,
    pub causas_frecuentes: Vec<String>,
    pub pasos_recomendados: Vec<String>,
    pub alerta: String,
    pub responsabilidad: String,
}

impl Default for TriageResult {
    fn default() -> Self {
        Self {
            animal: String::new(),
            urgencia: Urgencia::Desconocida,
            causas_frecuentes: Vec::new(),
            pasos_recomendados: Vec::new(),
            alerta: String::new(),
            responsabilidad: String::new(),
        }
    }
}

/// Resultado de validar un candidato contra el contrato.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub valido: bool,
    pub saneado: Option<TriageResult>,
    pub errores: Vec<String>,
}

const VALORES_URGENCIA: &[&str] = &["baja", "media", "alta", "emergencia", "desconocida"];

/// Valida y sanea un candidato JSON contra el contrato de `TriageResult`.
pub fn validate(candidato: &Value) -> ValidationOutcome {
    let mut errores = Vec::new();

    let Some(objeto) = candidato.as_object() else {
        return ValidationOutcome {
            valido: false,
            saneado: None,
            errores: vec!["el candidato no es un objeto JSON".to_string()],
        };
    };

    comprobar_string(objeto, "animal", &mut errores);
    match objeto.get("urgencia") {
        None => errores.push("falta el campo requerido 'urgencia'".to_string()),
        Some(Value::String(s)) if VALORES_URGENCIA.contains(&s.as_str()) => {}
        Some(Value::String(s)) => {
            errores.push(format!("valor de 'urgencia' fuera de la enumeración: '{s}'"))
        }
        Some(_) => errores.push("el campo 'urgencia' no es una cadena".to_string()),
    }
    comprobar_lista_strings(objeto, "causas_frecuentes", &mut errores);
    comprobar_lista_strings(objeto, "pasos_recomendados", &mut errores);
    comprobar_string(objeto, "alerta", &mut errores);
    comprobar_string(objeto, "responsabilidad", &mut errores);

    if !errores.is_empty() {
        return ValidationOutcome {
            valido: false,
            saneado: None,
            errores,
        };
    }

    match serde_json::from_value::<TriageResult>(candidato.clone()) {
        Ok(saneado) => ValidationOutcome {
            valido: true,
            saneado: Some(saneado),
            errores,
        },
        Err(e) => ValidationOutcome {
            valido: false,
            saneado: None,
            errores: vec![format!("no se pudo tipar el candidato: {e}")],
        },
    }
}

/// Tipado laxo para cuando la validación de esquema está desactivada:
/// toma lo que haya de cada campo conocido y rellena el resto con defectos.
pub fn sanear_laxo(candidato: &Value) -> TriageResult {
    let texto = |clave: &str| {
        candidato
            .get(clave)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let lista = |clave: &str| {
        candidato
            .get(clave)
            .and_then(Value::as_array)
            .map(|v| {
                v.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };
    let urgencia = candidato
        .get("urgencia")
        .cloned()
        .and_then(|v| serde_json::from_value::<Urgencia>(v).ok())
        .unwrap_or(Urgencia::Desconocida);

    TriageResult {
        animal: texto("animal"),
        urgencia,
        causas_frecuentes: lista("causas_frecuentes"),
        pasos_recomendados: lista("pasos_recomendados"),
        alerta: texto("alerta"),
        responsabilidad: texto("responsabilidad"),
    }
}

fn comprobar_string(
    objeto: &serde_json::Map<String, Value>,
    clave: &str,
    errores: &mut Vec<String>,
) {
    match objeto.get(clave) {
        None => errores.push(format!("falta el campo requerido '{clave}'")),
        Some(Value::String(_)) => {}
        Some(_) => errores.push(format!("el campo '{clave}' no es una cadena")),
    }
}

fn comprobar_lista_strings(
    objeto: &serde_json::Map<String, Value>,
    clave: &str,
    errores: &mut Vec<String>,
) {
    match objeto.get(clave) {
        None => errores.push(format!("falta el campo requerido '{clave}'")),
        Some(Value::Array(elementos)) => {
            if !elementos.iter().all(Value::is_string) {
                errores.push(format!("'{clave}' contiene elementos que no son cadenas"));
            }
        }
        Some(_) => errores.push(format!("el campo '{clave}' no es una lista")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidato_completo() -> Value {
        json!({
            "animal": "perro",
            "urgencia": "alta",
            "causas_frecuentes": ["epilepsia idiopática", "intoxicación"],
            "pasos_recomendados": ["acudir a urgencias"],
            "alerta": "convulsiones activas",
            "responsabilidad": "orientativo, no sustituye consulta veterinaria"
        })
    }

    #[test]
    fn acepta_candidato_completo() {
        let resultado = validate(&candidato_completo());
        assert!(resultado.valido);
        let saneado = resultado.saneado.expect("debe haber saneado");
        assert_eq!(saneado.urgencia, Urgencia::Alta);
        assert_eq!(saneado.causas_frecuentes.len(), 2);
    }

    #[test]
    fn rechaza_sin_urgencia() {
        let mut candidato = candidato_completo();
        candidato.as_object_mut().unwrap().remove("urgencia");
        let resultado = validate(&candidato);
        assert!(!resultado.valido);
        assert!(resultado.saneado.is_none());
        assert!(resultado
            .errores
            .iter()
            .any(|e| e.contains("urgencia")));
    }

    #[test]
    fn rechaza_urgencia_fuera_de_enumeracion() {
        let mut candidato = candidato_completo();
        candidato["urgencia"] = json!("gravísima");
        assert!(!validate(&candidato).valido);
    }

    #[test]
    fn rechaza_campo_mal_tipado() {
        let mut candidato = candidato_completo();
        candidato["causas_frecuentes"] = json!("una sola causa");
        let resultado = validate(&candidato);
        assert!(!resultado.valido);
        assert!(resultado
            .errores
            .iter()
            .any(|e| e.contains("causas_frecuentes")));
    }

    #[test]
    fn elimina_campos_desconocidos() {
        let mut candidato = candidato_completo();
        candidato["campo_inventado"] = json!("sobra");
        let resultado = validate(&candidato);
        assert!(resultado.valido);
        let serializado =
            serde_json::to_value(resultado.saneado.unwrap()).unwrap();
        assert!(serializado.get("campo_inventado").is_none());
    }

    #[test]
    fn saneado_laxo_rellena_defectos() {
        let candidato = json!({"animal": "gato", "urgencia": "inventada"});
        let resultado = sanear_laxo(&candidato);
        assert_eq!(resultado.animal, "gato");
        assert_eq!(resultado.urgencia, Urgencia::Desconocida);
        assert!(resultado.pasos_recomendados.is_empty());
    }
}
