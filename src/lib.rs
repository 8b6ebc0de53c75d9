//! NEXUS — multi-tenant retail back-office core.
//!
//! Implements the operational heart of the back office: daily cash-register
//! closing with its reconciliation state machine, PDV reconciliation with
//! an append-only audit history, and the tolerant spreadsheet import
//! pipeline that turns Portuguese-labeled CSV/XLSX rows into typed
//! financial records (payables, receivables, payroll, goals, audits,
//! maintenance, campaigns). Routing, component trees and chart rendering
//! live in the web frontend; authentication lives in the external identity
//! provider. Every operation here takes an explicit [`auth::RequestContext`]
//! and the shared [`db::DbState`].

use std::path::Path;

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod auth;
pub mod cadastros;
pub mod conciliacao;
pub mod contas;
pub mod db;
pub mod error;
pub mod fechamento;
pub mod import;
pub mod parsing;
pub mod report;
pub mod spreadsheet;

pub use auth::{RequestContext, Role};
pub use conciliacao::{reconcile, Conciliacao, ConciliacaoStatus};
pub use error::{NexusError, Result};
pub use fechamento::{
    compute_totals, save_fechamento, Fechamento, FechamentoInput, FechamentoStatus, SaveAction,
};
pub use import::{import_batch, ImportResult, Lookups, RowMapper};
pub use parsing::{parse_currency, parse_date, parse_status, Cell, DateOrder, ImportRow};

/// Initialize structured logging (console + daily rolling file).
///
/// Call once at process startup. The returned guard must stay alive for
/// the process lifetime — dropping it flushes and stops the file writer.
pub fn init_tracing(log_dir: &Path) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,nexus_backoffice=debug"));

    std::fs::create_dir_all(log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(log_dir, "nexus");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("NEXUS back-office core v{}", env!("CARGO_PKG_VERSION"));

    guard
}
