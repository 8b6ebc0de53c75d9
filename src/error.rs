//! Error taxonomy for the NEXUS back-office core.
//!
//! Manual single-record operations (save, close, create) fail fast and
//! visibly with one of these variants. Batch imports never surface row-level
//! errors: a bad row is silently skipped and only the aggregate
//! imported/total count is reported, so nothing here models a per-row
//! failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NexusError {
    /// Malformed or out-of-range user input on a manual form. The operation
    /// is rejected before any persistence call.
    #[error("Dados inválidos: {0}")]
    Validation(String),

    /// Attempt to mutate a cash closing that is no longer editable
    /// (status outside ABERTO/REABERTO). No write is performed.
    #[error("Fechamento bloqueado para edição (status atual: {status})")]
    LockedRecord { status: String },

    /// The acting user's role does not permit this operation.
    #[error("Acesso negado: {0}")]
    Forbidden(String),

    #[error("Registro não encontrado: {0}")]
    NotFound(String),

    /// The underlying store rejected a read or write (constraint violation,
    /// I/O failure). Surfaced as a generic failure for manual operations.
    #[error("Erro de persistência: {0}")]
    Persistence(#[from] rusqlite::Error),

    /// The input spreadsheet could not be read at all. Row-level problems
    /// are never reported through this variant.
    #[error("Erro ao ler planilha: {0}")]
    Spreadsheet(String),

    /// Transport failure talking to the AI report gateway.
    #[error("Falha ao contatar o gateway de relatórios: {0}")]
    Gateway(String),

    /// Unexpected internal failure (poisoned lock, invalid stored state).
    #[error("Erro interno: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, NexusError>;
