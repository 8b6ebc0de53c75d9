//! Daily cash-register closing (fechamento de caixa).
//!
//! Owns the lifecycle of one store's closing record for one calendar date:
//! derived totals, the editing lock once the day is closed, and the
//! administrative transitions driven by the financial review. The PDV
//! comparison itself lives in [`crate::conciliacao`]; it never mutates the
//! closing record.
//!
//! Status flow:
//! ABERTO -> (CLOSE) -> FECHADO_PENDENTE_CONCILIACAO -> (review) ->
//! CONCILIADO_OK | CONCILIADO_DIVERGENCIA -> (reopen) -> REABERTO, which
//! behaves like ABERTO again. Nothing is strictly terminal; corrections
//! must remain possible.

use std::collections::HashMap;

use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::RequestContext;
use crate::db::DbState;
use crate::error::{NexusError, Result};
use crate::parsing::{parse_currency_str, round_centavos};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FechamentoStatus {
    Aberto,
    FechadoPendenteConciliacao,
    ConciliadoOk,
    ConciliadoDivergencia,
    Reaberto,
}

impl FechamentoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FechamentoStatus::Aberto => "ABERTO",
            FechamentoStatus::FechadoPendenteConciliacao => "FECHADO_PENDENTE_CONCILIACAO",
            FechamentoStatus::ConciliadoOk => "CONCILIADO_OK",
            FechamentoStatus::ConciliadoDivergencia => "CONCILIADO_DIVERGENCIA",
            FechamentoStatus::Reaberto => "REABERTO",
        }
    }

    pub fn parse(raw: &str) -> Option<FechamentoStatus> {
        match raw {
            "ABERTO" => Some(FechamentoStatus::Aberto),
            "FECHADO_PENDENTE_CONCILIACAO" => Some(FechamentoStatus::FechadoPendenteConciliacao),
            "CONCILIADO_OK" => Some(FechamentoStatus::ConciliadoOk),
            "CONCILIADO_DIVERGENCIA" => Some(FechamentoStatus::ConciliadoDivergencia),
            "REABERTO" => Some(FechamentoStatus::Reaberto),
            _ => None,
        }
    }

    /// Only open and reopened records accept SAVE/CLOSE.
    pub fn is_editable(&self) -> bool {
        matches!(self, FechamentoStatus::Aberto | FechamentoStatus::Reaberto)
    }
}

// ---------------------------------------------------------------------------
// Input and derived totals
// ---------------------------------------------------------------------------

/// The seven monetary fields a store user enters, plus the optional
/// manually-counted cash amount kept for audit comparison.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FechamentoInput {
    pub saldo_inicial: f64,
    pub dinheiro: f64,
    pub pix: f64,
    pub cartao: f64,
    pub sangrias: f64,
    pub suprimentos: f64,
    pub saidas: f64,
    pub valor_caixa_declarado: Option<f64>,
}

impl FechamentoInput {
    /// Build from raw form values. Blank or unparseable fields become 0 —
    /// data entry is never blocked by a half-filled form. Validation of
    /// ranges happens separately in [`FechamentoInput::validate`].
    pub fn from_form(form: &HashMap<String, String>) -> FechamentoInput {
        let field = |key: &str| -> f64 {
            form.get(key).map(|v| parse_currency_str(v)).unwrap_or(0.0)
        };
        let declarado = form
            .get("valor_caixa_declarado")
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(|v| parse_currency_str(v));
        FechamentoInput {
            saldo_inicial: field("saldo_inicial"),
            dinheiro: field("dinheiro"),
            pix: field("pix"),
            cartao: field("cartao"),
            sangrias: field("sangrias"),
            suprimentos: field("suprimentos"),
            saidas: field("saidas"),
            valor_caixa_declarado: declarado,
        }
    }

    /// Reject out-of-range manual input before any persistence call.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("saldo_inicial", self.saldo_inicial),
            ("dinheiro", self.dinheiro),
            ("pix", self.pix),
            ("cartao", self.cartao),
            ("sangrias", self.sangrias),
            ("suprimentos", self.suprimentos),
            ("saidas", self.saidas),
        ];
        for (name, value) in fields {
            if value < 0.0 {
                return Err(NexusError::Validation(format!(
                    "campo {name} não pode ser negativo"
                )));
            }
        }
        if let Some(declarado) = self.valor_caixa_declarado {
            if declarado < 0.0 {
                return Err(NexusError::Validation(
                    "valor_caixa_declarado não pode ser negativo".into(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FechamentoTotais {
    pub total_entradas: f64,
    pub saldo_final: f64,
}

/// Derived totals. Pure; no side effects.
///
/// `total_entradas = dinheiro + pix + cartao`
/// `saldo_final = saldo_inicial + total_entradas + suprimentos - sangrias - saidas`
pub fn compute_totals(input: &FechamentoInput) -> FechamentoTotais {
    let total_entradas = round_centavos(input.dinheiro + input.pix + input.cartao);
    let saldo_final = round_centavos(
        input.saldo_inicial + total_entradas + input.suprimentos - input.sangrias - input.saidas,
    );
    FechamentoTotais {
        total_entradas,
        saldo_final,
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fechamento {
    pub id: String,
    pub empresa_id: String,
    pub loja_id: String,
    pub data: NaiveDate,
    pub saldo_inicial: f64,
    pub dinheiro: f64,
    pub pix: f64,
    pub cartao: f64,
    pub sangrias: f64,
    pub suprimentos: f64,
    pub saidas: f64,
    pub total_entradas: f64,
    pub saldo_final: f64,
    pub valor_caixa_declarado: Option<f64>,
    pub status: FechamentoStatus,
    /// Snapshot taken at closing time; never updated afterwards, even if
    /// the user's profile name changes.
    pub responsavel_usuario_id: Option<String>,
    pub responsavel_nome: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

const FECHAMENTO_COLUMNS: &str = "id, empresa_id, loja_id, data, saldo_inicial, dinheiro, pix,
     cartao, sangrias, suprimentos, saidas, total_entradas, saldo_final,
     valor_caixa_declarado, status, responsavel_usuario_id, responsavel_nome,
     created_at, updated_at";

fn map_fechamento(row: &Row) -> rusqlite::Result<Fechamento> {
    let data_raw: String = row.get(3)?;
    let status_raw: String = row.get(14)?;
    Ok(Fechamento {
        id: row.get(0)?,
        empresa_id: row.get(1)?,
        loja_id: row.get(2)?,
        data: NaiveDate::parse_from_str(&data_raw, "%Y-%m-%d").unwrap_or_default(),
        saldo_inicial: row.get(4)?,
        dinheiro: row.get(5)?,
        pix: row.get(6)?,
        cartao: row.get(7)?,
        sangrias: row.get(8)?,
        suprimentos: row.get(9)?,
        saidas: row.get(10)?,
        total_entradas: row.get(11)?,
        saldo_final: row.get(12)?,
        valor_caixa_declarado: row.get(13)?,
        status: FechamentoStatus::parse(&status_raw).unwrap_or(FechamentoStatus::Aberto),
        responsavel_usuario_id: row.get(15)?,
        responsavel_nome: row.get(16)?,
        created_at: row.get(17)?,
        updated_at: row.get(18)?,
    })
}

// ---------------------------------------------------------------------------
// Save / Close
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveAction {
    Save,
    Close,
}

/// Save or close the daily closing for `(loja_id, data)`.
///
/// Upserts: the first save of the day creates the record (implicitly
/// ABERTO before the action applies). The locked-record precondition is
/// checked inside the same write transaction, before any mutation: a record
/// whose status is outside {ABERTO, REABERTO} rejects both actions with
/// [`NexusError::LockedRecord`] and is left untouched.
///
/// On CLOSE the status becomes FECHADO_PENDENTE_CONCILIACAO and the acting
/// user's id and display name are snapshotted as the responsible party.
pub fn save_fechamento(
    db: &DbState,
    ctx: &RequestContext,
    loja_id: &str,
    data: NaiveDate,
    input: &FechamentoInput,
    action: SaveAction,
) -> Result<Fechamento> {
    ctx.require_closing_access(loja_id)?;
    input.validate()?;
    let totais = compute_totals(input);
    let data_str = data.format("%Y-%m-%d").to_string();

    let conn = db
        .conn
        .lock()
        .map_err(|e| NexusError::Internal(e.to_string()))?;

    conn.execute_batch("BEGIN IMMEDIATE")?;

    let result = (|| -> Result<String> {
        let existing: Option<(String, String)> = conn
            .query_row(
                "SELECT id, status FROM fechamentos_caixa
                 WHERE loja_id = ?1 AND data = ?2 AND deleted_at IS NULL",
                params![loja_id, data_str],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        if let Some((_, ref status_raw)) = existing {
            let status =
                FechamentoStatus::parse(status_raw).unwrap_or(FechamentoStatus::Aberto);
            if !status.is_editable() {
                return Err(NexusError::LockedRecord {
                    status: status_raw.clone(),
                });
            }
        }

        match existing {
            Some((id, _)) => {
                match action {
                    // SAVE leaves status as-is (ABERTO or REABERTO)
                    SaveAction::Save => {
                        conn.execute(
                            "UPDATE fechamentos_caixa SET
                                saldo_inicial = ?1, dinheiro = ?2, pix = ?3, cartao = ?4,
                                sangrias = ?5, suprimentos = ?6, saidas = ?7,
                                total_entradas = ?8, saldo_final = ?9,
                                valor_caixa_declarado = ?10,
                                updated_at = datetime('now')
                             WHERE id = ?11",
                            params![
                                input.saldo_inicial,
                                input.dinheiro,
                                input.pix,
                                input.cartao,
                                input.sangrias,
                                input.suprimentos,
                                input.saidas,
                                totais.total_entradas,
                                totais.saldo_final,
                                input.valor_caixa_declarado,
                                id,
                            ],
                        )?;
                    }
                    SaveAction::Close => {
                        conn.execute(
                            "UPDATE fechamentos_caixa SET
                                saldo_inicial = ?1, dinheiro = ?2, pix = ?3, cartao = ?4,
                                sangrias = ?5, suprimentos = ?6, saidas = ?7,
                                total_entradas = ?8, saldo_final = ?9,
                                valor_caixa_declarado = ?10,
                                status = ?11,
                                responsavel_usuario_id = ?12,
                                responsavel_nome = ?13,
                                updated_at = datetime('now')
                             WHERE id = ?14",
                            params![
                                input.saldo_inicial,
                                input.dinheiro,
                                input.pix,
                                input.cartao,
                                input.sangrias,
                                input.suprimentos,
                                input.saidas,
                                totais.total_entradas,
                                totais.saldo_final,
                                input.valor_caixa_declarado,
                                FechamentoStatus::FechadoPendenteConciliacao.as_str(),
                                ctx.user_id,
                                ctx.user_name,
                                id,
                            ],
                        )?;
                    }
                }
                Ok(id)
            }
            None => {
                let id = Uuid::new_v4().to_string();
                let (status, resp_id, resp_nome) = match action {
                    SaveAction::Save => (FechamentoStatus::Aberto, None, None),
                    SaveAction::Close => (
                        FechamentoStatus::FechadoPendenteConciliacao,
                        Some(ctx.user_id.clone()),
                        Some(ctx.user_name.clone()),
                    ),
                };
                conn.execute(
                    "INSERT INTO fechamentos_caixa (
                        id, empresa_id, loja_id, data,
                        saldo_inicial, dinheiro, pix, cartao,
                        sangrias, suprimentos, saidas,
                        total_entradas, saldo_final, valor_caixa_declarado,
                        status, responsavel_usuario_id, responsavel_nome
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                    params![
                        id,
                        ctx.empresa_id,
                        loja_id,
                        data_str,
                        input.saldo_inicial,
                        input.dinheiro,
                        input.pix,
                        input.cartao,
                        input.sangrias,
                        input.suprimentos,
                        input.saidas,
                        totais.total_entradas,
                        totais.saldo_final,
                        input.valor_caixa_declarado,
                        status.as_str(),
                        resp_id,
                        resp_nome,
                    ],
                )?;
                Ok(id)
            }
        }
    })();

    match result {
        Ok(_) => {
            conn.execute_batch("COMMIT")?;
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e);
        }
    }

    info!(
        loja_id = %loja_id,
        data = %data_str,
        action = ?action,
        total_entradas = %totais.total_entradas,
        saldo_final = %totais.saldo_final,
        "Fechamento salvo"
    );

    fetch_fechamento(&conn, loja_id, &data_str)?
        .ok_or_else(|| NexusError::NotFound(format!("fechamento {loja_id}/{data_str}")))
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

fn fetch_fechamento(
    conn: &Connection,
    loja_id: &str,
    data_str: &str,
) -> Result<Option<Fechamento>> {
    let sql = format!(
        "SELECT {FECHAMENTO_COLUMNS} FROM fechamentos_caixa
         WHERE loja_id = ?1 AND data = ?2 AND deleted_at IS NULL"
    );
    conn.query_row(&sql, params![loja_id, data_str], map_fechamento)
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other.into()),
        })
}

/// The closing for one store and date, if any (soft-deleted rows excluded).
pub fn get_fechamento(db: &DbState, loja_id: &str, data: NaiveDate) -> Result<Option<Fechamento>> {
    let conn = db
        .conn
        .lock()
        .map_err(|e| NexusError::Internal(e.to_string()))?;
    fetch_fechamento(&conn, loja_id, &data.format("%Y-%m-%d").to_string())
}

/// All closings of a tenant in a date range, ordered by date then store.
/// Dashboard aggregation reads from this.
pub fn list_fechamentos_periodo(
    db: &DbState,
    empresa_id: &str,
    date_from: NaiveDate,
    date_to: NaiveDate,
) -> Result<Vec<Fechamento>> {
    let conn = db
        .conn
        .lock()
        .map_err(|e| NexusError::Internal(e.to_string()))?;
    let sql = format!(
        "SELECT {FECHAMENTO_COLUMNS} FROM fechamentos_caixa
         WHERE empresa_id = ?1 AND data >= ?2 AND data <= ?3 AND deleted_at IS NULL
         ORDER BY data, loja_id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![
            empresa_id,
            date_from.format("%Y-%m-%d").to_string(),
            date_to.format("%Y-%m-%d").to_string()
        ],
        map_fechamento,
    )?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

// ---------------------------------------------------------------------------
// Administrative transitions (financial review / reopen)
// ---------------------------------------------------------------------------

/// Financial review: settle a pending closing using its most recent
/// reconciliation outcome.
///
/// FECHADO_PENDENTE_CONCILIACAO becomes CONCILIADO_OK or
/// CONCILIADO_DIVERGENCIA depending on the latest `conciliacoes` row for the
/// same store/date. Requires FINANCEIRO or ADMIN; fails if the closing is
/// not pending or was never reconciled.
pub fn review_fechamento(
    db: &DbState,
    ctx: &RequestContext,
    loja_id: &str,
    data: NaiveDate,
) -> Result<Fechamento> {
    ctx.require_financeiro()?;
    let data_str = data.format("%Y-%m-%d").to_string();
    let conn = db
        .conn
        .lock()
        .map_err(|e| NexusError::Internal(e.to_string()))?;

    let current = fetch_fechamento(&conn, loja_id, &data_str)?
        .ok_or_else(|| NexusError::NotFound(format!("fechamento {loja_id}/{data_str}")))?;
    if current.status != FechamentoStatus::FechadoPendenteConciliacao {
        return Err(NexusError::Validation(format!(
            "revisão exige status FECHADO_PENDENTE_CONCILIACAO (atual: {})",
            current.status.as_str()
        )));
    }

    // Latest attempt wins; history is append-only so this must be derived,
    // never stored on the closing itself.
    let latest_status: Option<String> = conn
        .query_row(
            "SELECT status FROM conciliacoes
             WHERE loja_id = ?1 AND data = ?2
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            params![loja_id, data_str],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    let new_status = match latest_status.as_deref() {
        Some("OK") => FechamentoStatus::ConciliadoOk,
        Some(_) => FechamentoStatus::ConciliadoDivergencia,
        None => {
            return Err(NexusError::Validation(format!(
                "nenhuma conciliação registrada para {loja_id}/{data_str}"
            )))
        }
    };

    conn.execute(
        "UPDATE fechamentos_caixa SET status = ?1, updated_at = datetime('now')
         WHERE id = ?2",
        params![new_status.as_str(), current.id],
    )?;

    info!(
        loja_id = %loja_id,
        data = %data_str,
        status = new_status.as_str(),
        revisado_por = %ctx.user_id,
        "Fechamento revisado"
    );

    fetch_fechamento(&conn, loja_id, &data_str)?
        .ok_or_else(|| NexusError::NotFound(format!("fechamento {loja_id}/{data_str}")))
}

/// Reopen a closed (or already reviewed) closing for correction.
///
/// Requires FINANCEIRO or ADMIN. A reopened record accepts SAVE/CLOSE
/// exactly like an open one.
pub fn reopen_fechamento(
    db: &DbState,
    ctx: &RequestContext,
    loja_id: &str,
    data: NaiveDate,
) -> Result<Fechamento> {
    ctx.require_financeiro()?;
    let data_str = data.format("%Y-%m-%d").to_string();
    let conn = db
        .conn
        .lock()
        .map_err(|e| NexusError::Internal(e.to_string()))?;

    let current = fetch_fechamento(&conn, loja_id, &data_str)?
        .ok_or_else(|| NexusError::NotFound(format!("fechamento {loja_id}/{data_str}")))?;
    if current.status.is_editable() {
        return Err(NexusError::Validation(format!(
            "fechamento já está editável (status: {})",
            current.status.as_str()
        )));
    }

    conn.execute(
        "UPDATE fechamentos_caixa SET status = ?1, updated_at = datetime('now')
         WHERE id = ?2",
        params![FechamentoStatus::Reaberto.as_str(), current.id],
    )?;

    warn!(
        loja_id = %loja_id,
        data = %data_str,
        reaberto_por = %ctx.user_id,
        status_anterior = current.status.as_str(),
        "Fechamento reaberto"
    );

    fetch_fechamento(&conn, loja_id, &data_str)?
        .ok_or_else(|| NexusError::NotFound(format!("fechamento {loja_id}/{data_str}")))
}

/// Soft-delete a closing. The row stays for audit but disappears from all
/// queries and aggregates. ADMIN only.
pub fn soft_delete_fechamento(
    db: &DbState,
    ctx: &RequestContext,
    loja_id: &str,
    data: NaiveDate,
) -> Result<()> {
    ctx.require_admin()?;
    let data_str = data.format("%Y-%m-%d").to_string();
    let conn = db
        .conn
        .lock()
        .map_err(|e| NexusError::Internal(e.to_string()))?;
    let changed = conn.execute(
        "UPDATE fechamentos_caixa SET deleted_at = datetime('now')
         WHERE loja_id = ?1 AND data = ?2 AND deleted_at IS NULL",
        params![loja_id, data_str],
    )?;
    if changed == 0 {
        return Err(NexusError::NotFound(format!(
            "fechamento {loja_id}/{data_str}"
        )));
    }
    info!(loja_id = %loja_id, data = %data_str, por = %ctx.user_id, "Fechamento excluído (soft)");
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
