//! Saneado de la salida libre del modelo generativo.
//!
//! Dos etapas puras e independientes del backend: primero se retiran las
//! vallas de código Markdown que rodean el texto, después se localiza el
//! primer objeto JSON sintácticamente equilibrado. Nada de regex voraces:
//! el extractor cuenta llaves respetando literales de cadena y escapes.

/// Retira las vallas de código (```json ... ```) que rodean el texto, si
/// están presentes. Las vallas intercaladas en medio del texto no se tocan.
pub fn strip_fences(texto: &str) -> &str {
    let recortado = texto.trim();
    let Some(resto) = recortado.strip_prefix("```") else {
        return recortado;
    };
    // La primera línea puede llevar etiqueta de lenguaje (```json).
    let resto = match resto.find('\n') {
        Some(i) => &resto[i + 1..],
        None => resto,
    };
    resto.strip_suffix("```").unwrap_or(resto).trim()
}

/// Devuelve el primer objeto `{...}` equilibrado dentro del texto, o `None`
/// si no existe ninguno. Las llaves dentro de literales de cadena no cuentan.
pub fn extract_json_object(texto: &str) -> Option<&str> {
    let inicio = texto.find('{')?;
    let mut profundidad = 0usize;
    let mut en_cadena = false;
    let mut escapado = false;

    for (i, c) in texto[inicio..].char_indices() {
        if en_cadena {
            if escapado {
                escapado = false;
            } else if c == '\\' {
                escapado = true;
            } else if c == '"' {
                en_cadena = false;
            }
            continue;
        }
        match c {
            '"' => en_cadena = true,
            '{' => profundidad += 1,
            '}' => {
                profundidad -= 1;
                if profundidad == 0 {
                    return Some(&texto[inicio..inicio + i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retira_vallas_con_etiqueta() {
        let texto = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_fences(texto), "{\"a\": 1}");
    }

    #[test]
    fn retira_vallas_sin_etiqueta() {
        let texto = "```\n{\"a\": 1}\n```";
        assert_eq!(strip_fences(texto), "{\"a\": 1}");
    }

    #[test]
    fn texto_sin_vallas_queda_igual() {
        assert_eq!(strip_fences("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn extrae_objeto_con_llaves_anidadas() {
        let texto = "prefacio {\"a\": {\"b\": 2}} epílogo {\"c\": 3}";
        assert_eq!(extract_json_object(texto), Some("{\"a\": {\"b\": 2}}"));
    }

    #[test]
    fn ignora_llaves_dentro_de_cadenas() {
        let texto = r#"{"alerta": "usa {corchetes} con \"cuidado\"", "n": 1}"#;
        let objeto = extract_json_object(texto).expect("debe haber objeto");
        assert_eq!(objeto, texto);
        assert!(serde_json::from_str::<serde_json::Value>(objeto).is_ok());
    }

    #[test]
    fn sin_objeto_devuelve_none() {
        assert_eq!(extract_json_object("no hay nada estructurado aquí"), None);
        assert_eq!(extract_json_object("llave sin cerrar { \"a\": 1"), None);
    }

    #[test]
    fn vallas_mas_extraccion() {
        let texto = "```json\nEl modelo opina:\n{\"urgencia\": \"alta\"}\n```";
        let limpio = strip_fences(texto);
        assert_eq!(extract_json_object(limpio), Some("{\"urgencia\": \"alta\"}"));
    }
}
