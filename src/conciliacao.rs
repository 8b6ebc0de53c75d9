//! PDV reconciliation (conciliação bancária/PDV).
//!
//! Compares the point-of-sale export total against a store's declared cash
//! closing for the same date. Reconciliation is observational: it records an
//! outcome but never mutates the closing itself — settling the closing's
//! status is the separate financial-review step in [`crate::fechamento`].
//!
//! History is append-only by design. Every run inserts a new row, even for
//! the same store/date; the "current" outcome is always derived as the most
//! recent row, never stored.

use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::auth::RequestContext;
use crate::db::DbState;
use crate::error::{NexusError, Result};
use crate::parsing::{centavos, parse_currency, round_centavos, ImportRow};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConciliacaoStatus {
    Ok,
    Divergencia,
}

impl ConciliacaoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConciliacaoStatus::Ok => "OK",
            ConciliacaoStatus::Divergencia => "DIVERGENCIA",
        }
    }

    pub fn parse(raw: &str) -> Option<ConciliacaoStatus> {
        match raw {
            "OK" => Some(ConciliacaoStatus::Ok),
            "DIVERGENCIA" => Some(ConciliacaoStatus::Divergencia),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conciliacao {
    pub id: String,
    pub empresa_id: String,
    pub loja_id: String,
    pub data: NaiveDate,
    /// Sum of the chosen value column across all imported PDV rows.
    pub valor_pdv: f64,
    /// `total_entradas` of the matching closing, or 0 when the store never
    /// closed its cash for that date (still diagnostic, so recorded).
    pub valor_caixa: f64,
    /// Signed: `valor_pdv - valor_caixa`.
    pub diferenca: f64,
    pub status: ConciliacaoStatus,
    pub criado_por: Option<String>,
    pub criado_por_nome: Option<String>,
    pub created_at: String,
}

const CONCILIACAO_COLUMNS: &str = "id, empresa_id, loja_id, data, valor_pdv, valor_caixa,
     diferenca, status, criado_por, criado_por_nome, created_at";

fn map_conciliacao(row: &Row) -> rusqlite::Result<Conciliacao> {
    let data_raw: String = row.get(3)?;
    let status_raw: String = row.get(7)?;
    Ok(Conciliacao {
        id: row.get(0)?,
        empresa_id: row.get(1)?,
        loja_id: row.get(2)?,
        data: NaiveDate::parse_from_str(&data_raw, "%Y-%m-%d").unwrap_or_default(),
        valor_pdv: row.get(4)?,
        valor_caixa: row.get(5)?,
        diferenca: row.get(6)?,
        status: ConciliacaoStatus::parse(&status_raw).unwrap_or(ConciliacaoStatus::Divergencia),
        criado_por: row.get(8)?,
        criado_por_nome: row.get(9)?,
        created_at: row.get(10)?,
    })
}

// ---------------------------------------------------------------------------
// Reconcile
// ---------------------------------------------------------------------------

/// Sum the value column over the PDV rows. Missing or unparseable cells
/// contribute 0; a typo'd column name therefore sums to 0 rather than
/// erroring, same as any other unreadable cell.
pub fn sum_value_column(rows: &[ImportRow], value_column: &str) -> f64 {
    let total: f64 = rows
        .iter()
        .map(|row| row.get(value_column).map(parse_currency).unwrap_or(0.0))
        .sum();
    round_centavos(total)
}

/// Reconcile a store's date against a parsed PDV export.
///
/// Computes `valor_pdv` from the chosen value column, looks up the matching
/// closing's `total_entradas` (0 when absent — the reconciliation proceeds
/// regardless), and records the signed difference. Status is OK only on an
/// exact zero difference in centavos; there is no tolerance band.
///
/// Always inserts a new history row; repeated runs for the same store/date
/// accumulate as an audit trail. The closing record's own status is not
/// touched.
pub fn reconcile(
    db: &DbState,
    ctx: &RequestContext,
    loja_id: &str,
    data: NaiveDate,
    pdv_rows: &[ImportRow],
    value_column: &str,
) -> Result<Conciliacao> {
    ctx.require_financeiro()?;
    if pdv_rows.is_empty() {
        return Err(NexusError::Validation(
            "nenhuma linha de PDV para conciliar".into(),
        ));
    }

    let valor_pdv = sum_value_column(pdv_rows, value_column);
    let data_str = data.format("%Y-%m-%d").to_string();

    let conn = db
        .conn
        .lock()
        .map_err(|e| NexusError::Internal(e.to_string()))?;

    let valor_caixa: f64 = conn
        .query_row(
            "SELECT total_entradas FROM fechamentos_caixa
             WHERE loja_id = ?1 AND data = ?2 AND deleted_at IS NULL",
            params![loja_id, data_str],
            |row| row.get(0),
        )
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(0.0),
            other => Err(other),
        })?;

    let diferenca = round_centavos(valor_pdv - valor_caixa);
    let status = if centavos(diferenca) == 0 {
        ConciliacaoStatus::Ok
    } else {
        ConciliacaoStatus::Divergencia
    };

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO conciliacoes (
            id, empresa_id, loja_id, data, valor_pdv, valor_caixa,
            diferenca, status, criado_por, criado_por_nome
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            id,
            ctx.empresa_id,
            loja_id,
            data_str,
            valor_pdv,
            valor_caixa,
            diferenca,
            status.as_str(),
            ctx.user_id,
            ctx.user_name,
        ],
    )?;

    info!(
        loja_id = %loja_id,
        data = %data_str,
        valor_pdv = %valor_pdv,
        valor_caixa = %valor_caixa,
        diferenca = %diferenca,
        status = status.as_str(),
        "Conciliação registrada"
    );

    fetch_by_id(&conn, &id)
}

fn fetch_by_id(conn: &Connection, id: &str) -> Result<Conciliacao> {
    let sql = format!("SELECT {CONCILIACAO_COLUMNS} FROM conciliacoes WHERE id = ?1");
    conn.query_row(&sql, params![id], map_conciliacao)
        .map_err(Into::into)
}

// ---------------------------------------------------------------------------
// Derived queries
// ---------------------------------------------------------------------------

/// The most recent reconciliation for a store/date, if any. This is the
/// only correct way to display "current reconciliation status" — the
/// history table holds every attempt.
pub fn latest_conciliacao(
    db: &DbState,
    loja_id: &str,
    data: NaiveDate,
) -> Result<Option<Conciliacao>> {
    let conn = db
        .conn
        .lock()
        .map_err(|e| NexusError::Internal(e.to_string()))?;
    let sql = format!(
        "SELECT {CONCILIACAO_COLUMNS} FROM conciliacoes
         WHERE loja_id = ?1 AND data = ?2
         ORDER BY created_at DESC, rowid DESC LIMIT 1"
    );
    conn.query_row(
        &sql,
        params![loja_id, data.format("%Y-%m-%d").to_string()],
        map_conciliacao,
    )
    .map(Some)
    .or_else(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other.into()),
    })
}

/// Full reconciliation history for a store/date, newest first.
pub fn list_conciliacoes(
    db: &DbState,
    loja_id: &str,
    data: NaiveDate,
) -> Result<Vec<Conciliacao>> {
    let conn = db
        .conn
        .lock()
        .map_err(|e| NexusError::Internal(e.to_string()))?;
    let sql = format!(
        "SELECT {CONCILIACAO_COLUMNS} FROM conciliacoes
         WHERE loja_id = ?1 AND data = ?2
         ORDER BY created_at DESC, rowid DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![loja_id, data.format("%Y-%m-%d").to_string()],
        map_conciliacao,
    )?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::db;
    use crate::fechamento::{save_fechamento, FechamentoInput, SaveAction};
    use crate::parsing::Cell;
    use rusqlite::Connection;
    use std::collections::HashMap;

    fn test_db() -> DbState {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )
        .expect("pragma setup");
        db::run_migrations_for_test(&conn);
        DbState {
            conn: std::sync::Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
        }
    }

    fn fin_ctx() -> RequestContext {
        RequestContext {
            user_id: "user-fin".into(),
            user_name: "Ana Financeiro".into(),
            role: Role::Financeiro,
            empresa_id: "emp-1".into(),
            loja_id: None,
        }
    }

    fn dia() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 15).unwrap()
    }

    fn pdv_row(valor: &str) -> ImportRow {
        let mut row = HashMap::new();
        row.insert("Valor".to_string(), Cell::Text(valor.to_string()));
        row
    }

    fn close_sample_day(db: &DbState) {
        let input = FechamentoInput {
            saldo_inicial: 20.0,
            dinheiro: 100.0,
            pix: 50.0,
            cartao: 30.0,
            sangrias: 10.0,
            suprimentos: 0.0,
            saidas: 5.0,
            valor_caixa_declarado: None,
        };
        save_fechamento(db, &fin_ctx(), "loja-1", dia(), &input, SaveAction::Close).unwrap();
    }

    #[test]
    fn test_reconcile_exact_match_is_ok() {
        let db = test_db();
        close_sample_day(&db);

        let rows = vec![pdv_row("R$ 100,00"), pdv_row("50,00"), pdv_row("30,00")];
        let c = reconcile(&db, &fin_ctx(), "loja-1", dia(), &rows, "Valor").unwrap();
        assert_eq!(c.valor_pdv, 180.0);
        assert_eq!(c.valor_caixa, 180.0);
        assert_eq!(c.diferenca, 0.0);
        assert_eq!(c.status, ConciliacaoStatus::Ok);
    }

    #[test]
    fn test_reconcile_signed_difference() {
        let db = test_db();
        close_sample_day(&db);

        // PDV below cash: negative difference, still a divergence
        let rows = vec![pdv_row("170,00")];
        let c = reconcile(&db, &fin_ctx(), "loja-1", dia(), &rows, "Valor").unwrap();
        assert_eq!(c.diferenca, -10.0);
        assert_eq!(c.status, ConciliacaoStatus::Divergencia);

        // PDV above cash: positive difference
        let rows = vec![pdv_row("200,50")];
        let c = reconcile(&db, &fin_ctx(), "loja-1", dia(), &rows, "Valor").unwrap();
        assert_eq!(c.diferenca, 20.5);
        assert_eq!(c.status, ConciliacaoStatus::Divergencia);
    }

    #[test]
    fn test_reconcile_without_closing_uses_zero() {
        let db = test_db();
        let rows = vec![pdv_row("99,90")];
        let c = reconcile(&db, &fin_ctx(), "loja-9", dia(), &rows, "Valor").unwrap();
        assert_eq!(c.valor_caixa, 0.0);
        assert_eq!(c.valor_pdv, 99.9);
        assert_eq!(c.diferenca, 99.9);
        assert_eq!(c.status, ConciliacaoStatus::Divergencia);
    }

    #[test]
    fn test_unparseable_cells_contribute_zero() {
        let db = test_db();
        close_sample_day(&db);
        let mut junk = HashMap::new();
        junk.insert("Valor".to_string(), Cell::Text("estorno".to_string()));
        let rows = vec![pdv_row("180,00"), junk, pdv_row("")];
        let c = reconcile(&db, &fin_ctx(), "loja-1", dia(), &rows, "Valor").unwrap();
        assert_eq!(c.valor_pdv, 180.0);
        assert_eq!(c.status, ConciliacaoStatus::Ok);
    }

    #[test]
    fn test_empty_rows_rejected() {
        let db = test_db();
        let err = reconcile(&db, &fin_ctx(), "loja-1", dia(), &[], "Valor").unwrap_err();
        assert!(matches!(err, NexusError::Validation(_)));
    }

    #[test]
    fn test_repeated_runs_append_history() {
        let db = test_db();
        close_sample_day(&db);
        let rows = vec![pdv_row("180,00")];
        reconcile(&db, &fin_ctx(), "loja-1", dia(), &rows, "Valor").unwrap();
        let rows = vec![pdv_row("170,00")];
        reconcile(&db, &fin_ctx(), "loja-1", dia(), &rows, "Valor").unwrap();

        let history = list_conciliacoes(&db, "loja-1", dia()).unwrap();
        assert_eq!(history.len(), 2, "append-only, never upserts");

        let latest = latest_conciliacao(&db, "loja-1", dia()).unwrap().unwrap();
        assert_eq!(latest.valor_pdv, 170.0);
        assert_eq!(latest.status, ConciliacaoStatus::Divergencia);
    }

    #[test]
    fn test_reconcile_does_not_touch_closing_status() {
        let db = test_db();
        close_sample_day(&db);
        let rows = vec![pdv_row("180,00")];
        reconcile(&db, &fin_ctx(), "loja-1", dia(), &rows, "Valor").unwrap();

        let f = crate::fechamento::get_fechamento(&db, "loja-1", dia())
            .unwrap()
            .unwrap();
        assert_eq!(
            f.status,
            crate::fechamento::FechamentoStatus::FechadoPendenteConciliacao,
            "reconciliation is observational"
        );
    }

    #[test]
    fn test_loja_role_cannot_reconcile() {
        let db = test_db();
        let ctx = RequestContext {
            user_id: "u".into(),
            user_name: "U".into(),
            role: Role::Loja,
            empresa_id: "emp-1".into(),
            loja_id: Some("loja-1".into()),
        };
        let rows = vec![pdv_row("10,00")];
        let err = reconcile(&db, &ctx, "loja-1", dia(), &rows, "Valor").unwrap_err();
        assert!(matches!(err, NexusError::Forbidden(_)));
    }
}
