//! Especies domésticas reconocidas e inferencia desde texto libre.

/// Especie canónica junto a las variantes con las que suele aparecer en los
/// síntomas que escribe el dueño.
const ESPECIES: &[(&str, &[&str])] = &[
    ("perro", &["perro", "perra", "perrito", "cachorro"]),
    ("gato", &["gato", "gata", "gatito", "minino"]),
    ("conejo", &["conejo", "coneja"]),
    ("hurón", &["hurón", "huron"]),
    ("hámster", &["hámster", "hamster"]),
    ("ave", &["ave", "pájaro", "pajaro", "loro", "periquito", "canario"]),
    ("tortuga", &["tortuga"]),
    ("cobaya", &["cobaya", "cuy"]),
];

pub fn normalizar(texto: &str) -> String {
    texto.trim().to_lowercase()
}

/// Devuelve la especie canónica si el texto es una variante reconocida.
pub fn canonica(texto: &str) -> Option<String> {
    let normalizado = normalizar(texto);
    ESPECIES
        .iter()
        .find(|(canon, variantes)| *canon == normalizado || variantes.contains(&normalizado.as_str()))
        .map(|(canon, _)| canon.to_string())
}

pub fn es_reconocida(texto: &str) -> bool {
    canonica(texto).is_some()
}

/// Infiere la especie buscando variantes reconocidas dentro del texto de
/// síntomas ("mi perro tiene convulsiones" implica perro).
pub fn inferir(sintomas: &str) -> Option<String> {
    let texto = normalizar(sintomas);
    for (canon, variantes) in ESPECIES {
        if variantes.iter().any(|v| texto.contains(v)) {
            return Some(canon.to_string());
        }
    }
    None
}

/// Etiqueta de especie de un documento de referencia, derivada del nombre de
/// fichero (por ejemplo `perro_convulsiones.md`).
pub fn desde_nombre_fichero(nombre: &str) -> Option<String> {
    let nombre = nombre.to_lowercase();
    for (canon, variantes) in ESPECIES {
        if variantes.iter().any(|v| nombre.contains(v)) {
            return Some(canon.to_string());
        }
    }
    None
}
