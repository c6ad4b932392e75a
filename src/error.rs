//! Taxonomía de fallos de los backends externos (embeddings y generación).
//!
//! El pipeline sólo trata como recuperables los fallos por cuota y la
//! ausencia de credencial; cualquier otro fallo del proveedor se propaga
//! para que el operador lo vea.

use thiserror::Error;

/// Fallo clasificado de una llamada a un backend de IA.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AiError {
    /// El backend señaló throttling o cuota agotada.
    #[error("límite de cuota del proveedor alcanzado")]
    RateLimited,

    /// No hay credencial disponible para el backend.
    #[error("credencial no configurada: {0}")]
    NotConfigured(String),

    /// Cualquier otro fallo del backend (respuesta malformada, red, auth).
    #[error("fallo del proveedor: {0}")]
    Provider(String),
}

impl AiError {
    /// Indica si el fallo entra en la escalera de degradación local.
    pub fn es_recuperable(&self) -> bool {
        matches!(self, AiError::RateLimited | AiError::NotConfigured(_))
    }
}

/// Clasifica el mensaje de error devuelto por el backend remoto.
///
/// Los proveedores señalan el throttling de formas distintas (HTTP 429,
/// `insufficient_quota`, "rate limit"); todo lo demás se considera un fallo
/// genérico del proveedor.
pub fn clasificar_fallo_proveedor(mensaje: &str) -> AiError {
    let m = mensaje.to_lowercase();
    let limitado = m.contains("429")
        || m.contains("rate limit")
        || m.contains("too many requests")
        || m.contains("insufficient_quota")
        || m.contains("quota")
        || m.contains("resource_exhausted");
    if limitado {
        AiError::RateLimited
    } else {
        AiError::Provider(mensaje.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clasifica_429_como_rate_limited() {
        assert_eq!(
            clasificar_fallo_proveedor("http status: 429 Too Many Requests"),
            AiError::RateLimited
        );
        assert_eq!(
            clasificar_fallo_proveedor("insufficient_quota: please check your plan"),
            AiError::RateLimited
        );
    }

    #[test]
    fn clasifica_otros_fallos_como_provider() {
        let err = clasificar_fallo_proveedor("connection reset by peer");
        assert_eq!(
            err,
            AiError::Provider("connection reset by peer".to_string())
        );
        assert!(!err.es_recuperable());
    }

    #[test]
    fn rate_limited_y_not_configured_son_recuperables() {
        assert!(AiError::RateLimited.es_recuperable());
        assert!(AiError::NotConfigured("OPENAI_API_KEY".into()).es_recuperable());
    }
}
