//! # Error Types Module
//!
//! Questo modulo definisce tutti i tipi di errore custom della libreria.
//!
//! ## Responsabilità:
//! - Definisce `ShrinkError` enum per categorizzare gli errori di un job
//! - Distingue errori di trasporto, di protocollo e di I/O locale
//! - Integra con `thiserror` per automatic error conversion
//!
//! ## Categorie di errori:
//! - `Io`: Errori di I/O locale (hash, copia, scrittura destinazione)
//! - `Transport`: Errori di connessione/TLS verso il servizio remoto
//! - `Api`: Risposta di upload diversa da 201, con il body come dettaglio
//! - `BadStatus`: Download del risultato con status non 2xx
//! - `Protocol`: Risposta 201 malformata (Location mancante, JSON invalido)
//! - `Signature`: Errori del file delle firme
//! - `Validation`: Errori di validazione configurazione
//! - `InvalidPhase`: Azione richiesta nella fase sbagliata del job
//! - `Halted`: Azione scartata perché il batch è stato fermato
//!
//! ## Esempio:
//! ```rust,ignore
//! if status != StatusCode::CREATED {
//!     return Err(ShrinkError::Api { status: status.as_u16(), body });
//! }
//! ```

/// Custom error types for remote compression
#[derive(thiserror::Error, Debug)]
pub enum ShrinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("problem with request: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("got error response from api (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("got bad status code {status} requesting {url}")]
    BadStatus { status: u16, url: String },

    #[error("Malformed api response: {0}")]
    Protocol(String),

    #[error("Signature file error: {0}")]
    Signature(String),

    #[error("Configuration error: {0}")]
    Validation(String),

    #[error("Job is in phase {0:?}, action not allowed")]
    InvalidPhase(crate::job::Phase),

    #[error("Batch halted before the action started")]
    Halted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_carries_body() {
        let err = ShrinkError::Api {
            status: 401,
            body: r#"{"error":"Unauthorized"}"#.to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("401"));
        assert!(message.contains("Unauthorized"));
    }

    #[test]
    fn test_io_error_converts() {
        let err: ShrinkError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, ShrinkError::Io(_)));
        assert!(err.to_string().starts_with("IO error"));
    }
}
