//! AI executive report gateway client.
//!
//! The gateway is an opaque free-text producer: we send it a pre-aggregated
//! snapshot of the tenant's period (closings, reconciliations, payables) and
//! return whatever text comes back. No core logic depends on the content
//! structure of the response.

use chrono::NaiveDate;
use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::info;

use crate::conciliacao::ConciliacaoStatus;
use crate::db::DbState;
use crate::error::{NexusError, Result};
use crate::fechamento::{self, FechamentoStatus};
use crate::parsing::round_centavos;

/// Default timeout for gateway requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the gateway URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_gateway_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

/// Convert a `reqwest::Error` into a user-facing message.
fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Não foi possível conectar ao gateway em {url}");
    }
    if err.is_timeout() {
        return format!("Tempo esgotado aguardando o gateway em {url}");
    }
    format!("Falha na requisição ao gateway: {err}")
}

// ---------------------------------------------------------------------------
// Payload aggregation
// ---------------------------------------------------------------------------

/// Period snapshot sent to the gateway. All aggregation happens here,
/// client-side, from the same queries the dashboards use.
#[derive(Debug, Clone, Serialize)]
pub struct ReportPayload {
    pub empresa_id: String,
    pub periodo_inicio: String,
    pub periodo_fim: String,
    pub total_fechamentos: usize,
    pub total_entradas: f64,
    pub fechamentos_pendentes: usize,
    pub fechamentos_divergentes: usize,
    pub conciliacoes_divergentes: usize,
}

/// Aggregate a tenant's period into the report payload.
pub fn build_report_payload(
    db: &DbState,
    empresa_id: &str,
    date_from: NaiveDate,
    date_to: NaiveDate,
) -> Result<ReportPayload> {
    let fechamentos = fechamento::list_fechamentos_periodo(db, empresa_id, date_from, date_to)?;

    let total_entradas = round_centavos(fechamentos.iter().map(|f| f.total_entradas).sum());
    let fechamentos_pendentes = fechamentos
        .iter()
        .filter(|f| f.status == FechamentoStatus::FechadoPendenteConciliacao)
        .count();
    let fechamentos_divergentes = fechamentos
        .iter()
        .filter(|f| f.status == FechamentoStatus::ConciliadoDivergencia)
        .count();

    // Latest reconciliation per store/date decides divergence; the history
    // table keeps every attempt.
    let conciliacoes_divergentes = {
        let conn = db
            .conn
            .lock()
            .map_err(|e| NexusError::Internal(e.to_string()))?;
        let mut stmt = conn.prepare(
            "SELECT status FROM conciliacoes c
             WHERE empresa_id = ?1 AND data >= ?2 AND data <= ?3
               AND rowid = (SELECT MAX(rowid) FROM conciliacoes
                            WHERE loja_id = c.loja_id AND data = c.data)",
        )?;
        let statuses: Vec<String> = stmt
            .query_map(
                rusqlite::params![
                    empresa_id,
                    date_from.format("%Y-%m-%d").to_string(),
                    date_to.format("%Y-%m-%d").to_string()
                ],
                |row| row.get(0),
            )?
            .filter_map(|r| r.ok())
            .collect();
        statuses
            .iter()
            .filter(|s| {
                ConciliacaoStatus::parse(s) == Some(ConciliacaoStatus::Divergencia)
            })
            .count()
    };

    Ok(ReportPayload {
        empresa_id: empresa_id.to_string(),
        periodo_inicio: date_from.format("%Y-%m-%d").to_string(),
        periodo_fim: date_to.format("%Y-%m-%d").to_string(),
        total_fechamentos: fechamentos.len(),
        total_entradas,
        fechamentos_pendentes,
        fechamentos_divergentes,
        conciliacoes_divergentes,
    })
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct ReportClient {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl ReportClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<ReportClient> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| NexusError::Gateway(format!("construir cliente HTTP: {e}")))?;
        Ok(ReportClient {
            base_url: normalize_gateway_url(base_url),
            api_key,
            client,
        })
    }

    /// Request an executive report for the given period snapshot.
    ///
    /// The gateway answers either `{"report": "..."}` or plain text; both
    /// are passed through opaquely.
    pub fn generate_executive_report(&self, payload: &ReportPayload) -> Result<String> {
        let url = format!("{}/api/reports/executive", self.base_url);

        let mut request = self.client.post(&url).json(payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .map_err(|e| NexusError::Gateway(friendly_error(&self.base_url, &e)))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| NexusError::Gateway(friendly_error(&self.base_url, &e)))?;

        if !status.is_success() {
            return Err(NexusError::Gateway(format!(
                "gateway respondeu {status}: {body}"
            )));
        }

        info!(empresa_id = %payload.empresa_id, "Relatório executivo recebido");

        if let Ok(parsed) = serde_json::from_str::<Value>(&body) {
            if let Some(text) = parsed.get("report").and_then(Value::as_str) {
                return Ok(text.to_string());
            }
        }
        Ok(body)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{RequestContext, Role};
    use crate::db;
    use crate::fechamento::{save_fechamento, FechamentoInput, SaveAction};
    use rusqlite::Connection;

    #[test]
    fn test_normalize_gateway_url() {
        assert_eq!(
            normalize_gateway_url("reports.nexus.app"),
            "https://reports.nexus.app"
        );
        assert_eq!(
            normalize_gateway_url("https://reports.nexus.app/api/"),
            "https://reports.nexus.app"
        );
        assert_eq!(
            normalize_gateway_url("localhost:8787"),
            "http://localhost:8787"
        );
        assert_eq!(
            normalize_gateway_url("  https://reports.nexus.app///  "),
            "https://reports.nexus.app"
        );
    }

    fn test_db() -> DbState {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::run_migrations_for_test(&conn);
        DbState {
            conn: std::sync::Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
        }
    }

    #[test]
    fn test_build_report_payload_aggregates() {
        let db = test_db();
        let ctx = RequestContext {
            user_id: "user-fin".into(),
            user_name: "Ana".into(),
            role: Role::Financeiro,
            empresa_id: "emp-1".into(),
            loja_id: None,
        };
        let dia = NaiveDate::from_ymd_opt(2025, 3, 15).unwrap();
        let input = FechamentoInput {
            dinheiro: 100.0,
            pix: 50.0,
            cartao: 30.0,
            ..Default::default()
        };
        save_fechamento(&db, &ctx, "loja-1", dia, &input, SaveAction::Close).unwrap();
        save_fechamento(&db, &ctx, "loja-2", dia, &input, SaveAction::Save).unwrap();

        let payload = build_report_payload(&db, "emp-1", dia, dia).unwrap();
        assert_eq!(payload.total_fechamentos, 2);
        assert_eq!(payload.total_entradas, 360.0);
        assert_eq!(payload.fechamentos_pendentes, 1);
        assert_eq!(payload.fechamentos_divergentes, 0);
        assert_eq!(payload.conciliacoes_divergentes, 0);
    }
}
