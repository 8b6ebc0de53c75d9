//! Accounts payable and receivable (contas a pagar / a receber).
//!
//! Manual operations fail fast and visibly: validation happens before any
//! persistence call and errors propagate to the caller. The bulk-import
//! path reuses the low-level inserts through the normalizer, which applies
//! its own skip-and-continue policy instead.

use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::auth::RequestContext;
use crate::db::DbState;
use crate::error::{NexusError, Result};
use crate::parsing::round_centavos;

pub const STATUS_CONTA_PAGAR: &[&str] = &["PENDENTE", "PAGO", "VENCIDO"];
pub const STATUS_CONTA_RECEBER: &[&str] = &["PENDENTE", "RECEBIDO", "VENCIDO"];

// ---------------------------------------------------------------------------
// Contas a pagar
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContaPagar {
    pub id: String,
    pub empresa_id: String,
    pub loja_id: Option<String>,
    pub fornecedor: String,
    pub descricao: Option<String>,
    pub categoria: Option<String>,
    pub valor: f64,
    pub vencimento: NaiveDate,
    pub status: String,
    pub pago_em: Option<String>,
}

impl ContaPagar {
    pub fn new(empresa_id: &str, fornecedor: &str, valor: f64, vencimento: NaiveDate) -> ContaPagar {
        ContaPagar {
            id: Uuid::new_v4().to_string(),
            empresa_id: empresa_id.to_string(),
            loja_id: None,
            fornecedor: fornecedor.to_string(),
            descricao: None,
            categoria: None,
            valor: round_centavos(valor),
            vencimento,
            status: "PENDENTE".to_string(),
            pago_em: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.fornecedor.trim().is_empty() {
            return Err(NexusError::Validation("fornecedor é obrigatório".into()));
        }
        if self.valor < 0.0 {
            return Err(NexusError::Validation("valor não pode ser negativo".into()));
        }
        Ok(())
    }
}

fn map_conta_pagar(row: &Row) -> rusqlite::Result<ContaPagar> {
    let venc_raw: String = row.get(7)?;
    Ok(ContaPagar {
        id: row.get(0)?,
        empresa_id: row.get(1)?,
        loja_id: row.get(2)?,
        fornecedor: row.get(3)?,
        descricao: row.get(4)?,
        categoria: row.get(5)?,
        valor: row.get(6)?,
        vencimento: NaiveDate::parse_from_str(&venc_raw, "%Y-%m-%d").unwrap_or_default(),
        status: row.get(8)?,
        pago_em: row.get(9)?,
    })
}

const CONTA_PAGAR_COLUMNS: &str =
    "id, empresa_id, loja_id, fornecedor, descricao, categoria, valor, vencimento, status, pago_em";

/// Low-level insert, shared by the manual path and the bulk importer.
pub fn insert_conta_pagar(conn: &Connection, conta: &ContaPagar) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO contas_pagar (
            id, empresa_id, loja_id, fornecedor, descricao, categoria,
            valor, vencimento, status, pago_em
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            conta.id,
            conta.empresa_id,
            conta.loja_id,
            conta.fornecedor,
            conta.descricao,
            conta.categoria,
            conta.valor,
            conta.vencimento.format("%Y-%m-%d").to_string(),
            conta.status,
            conta.pago_em,
        ],
    )?;
    Ok(())
}

/// Manual creation (form submission). Fails fast on invalid input.
pub fn create_conta_pagar(
    db: &DbState,
    ctx: &RequestContext,
    conta: ContaPagar,
) -> Result<ContaPagar> {
    ctx.require_financeiro()?;
    conta.validate()?;
    let conn = db
        .conn
        .lock()
        .map_err(|e| NexusError::Internal(e.to_string()))?;
    insert_conta_pagar(&conn, &conta)?;
    info!(id = %conta.id, fornecedor = %conta.fornecedor, valor = %conta.valor, "Conta a pagar criada");
    Ok(conta)
}

/// Mark a payable as settled.
pub fn mark_conta_paga(db: &DbState, ctx: &RequestContext, id: &str) -> Result<()> {
    ctx.require_financeiro()?;
    let conn = db
        .conn
        .lock()
        .map_err(|e| NexusError::Internal(e.to_string()))?;
    let changed = conn.execute(
        "UPDATE contas_pagar SET status = 'PAGO', pago_em = datetime('now'),
            updated_at = datetime('now')
         WHERE id = ?1 AND empresa_id = ?2 AND deleted_at IS NULL",
        params![id, ctx.empresa_id],
    )?;
    if changed == 0 {
        return Err(NexusError::NotFound(format!("conta a pagar {id}")));
    }
    Ok(())
}

/// Payables of a tenant due inside a date range, ordered by due date.
pub fn list_contas_pagar_periodo(
    db: &DbState,
    empresa_id: &str,
    date_from: NaiveDate,
    date_to: NaiveDate,
) -> Result<Vec<ContaPagar>> {
    let conn = db
        .conn
        .lock()
        .map_err(|e| NexusError::Internal(e.to_string()))?;
    let sql = format!(
        "SELECT {CONTA_PAGAR_COLUMNS} FROM contas_pagar
         WHERE empresa_id = ?1 AND vencimento >= ?2 AND vencimento <= ?3
           AND deleted_at IS NULL
         ORDER BY vencimento, fornecedor"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![
            empresa_id,
            date_from.format("%Y-%m-%d").to_string(),
            date_to.format("%Y-%m-%d").to_string()
        ],
        map_conta_pagar,
    )?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

// ---------------------------------------------------------------------------
// Contas a receber
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContaReceber {
    pub id: String,
    pub empresa_id: String,
    pub loja_id: Option<String>,
    pub cliente: String,
    pub descricao: Option<String>,
    pub valor: f64,
    pub vencimento: NaiveDate,
    pub status: String,
    pub recebido_em: Option<String>,
}

impl ContaReceber {
    pub fn new(empresa_id: &str, cliente: &str, valor: f64, vencimento: NaiveDate) -> ContaReceber {
        ContaReceber {
            id: Uuid::new_v4().to_string(),
            empresa_id: empresa_id.to_string(),
            loja_id: None,
            cliente: cliente.to_string(),
            descricao: None,
            valor: round_centavos(valor),
            vencimento,
            status: "PENDENTE".to_string(),
            recebido_em: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.cliente.trim().is_empty() {
            return Err(NexusError::Validation("cliente é obrigatório".into()));
        }
        if self.valor < 0.0 {
            return Err(NexusError::Validation("valor não pode ser negativo".into()));
        }
        Ok(())
    }
}

fn map_conta_receber(row: &Row) -> rusqlite::Result<ContaReceber> {
    let venc_raw: String = row.get(6)?;
    Ok(ContaReceber {
        id: row.get(0)?,
        empresa_id: row.get(1)?,
        loja_id: row.get(2)?,
        cliente: row.get(3)?,
        descricao: row.get(4)?,
        valor: row.get(5)?,
        vencimento: NaiveDate::parse_from_str(&venc_raw, "%Y-%m-%d").unwrap_or_default(),
        status: row.get(7)?,
        recebido_em: row.get(8)?,
    })
}

const CONTA_RECEBER_COLUMNS: &str =
    "id, empresa_id, loja_id, cliente, descricao, valor, vencimento, status, recebido_em";

pub fn insert_conta_receber(conn: &Connection, conta: &ContaReceber) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO contas_receber (
            id, empresa_id, loja_id, cliente, descricao,
            valor, vencimento, status, recebido_em
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            conta.id,
            conta.empresa_id,
            conta.loja_id,
            conta.cliente,
            conta.descricao,
            conta.valor,
            conta.vencimento.format("%Y-%m-%d").to_string(),
            conta.status,
            conta.recebido_em,
        ],
    )?;
    Ok(())
}

pub fn create_conta_receber(
    db: &DbState,
    ctx: &RequestContext,
    conta: ContaReceber,
) -> Result<ContaReceber> {
    ctx.require_financeiro()?;
    conta.validate()?;
    let conn = db
        .conn
        .lock()
        .map_err(|e| NexusError::Internal(e.to_string()))?;
    insert_conta_receber(&conn, &conta)?;
    info!(id = %conta.id, cliente = %conta.cliente, valor = %conta.valor, "Conta a receber criada");
    Ok(conta)
}

pub fn mark_conta_recebida(db: &DbState, ctx: &RequestContext, id: &str) -> Result<()> {
    ctx.require_financeiro()?;
    let conn = db
        .conn
        .lock()
        .map_err(|e| NexusError::Internal(e.to_string()))?;
    let changed = conn.execute(
        "UPDATE contas_receber SET status = 'RECEBIDO', recebido_em = datetime('now'),
            updated_at = datetime('now')
         WHERE id = ?1 AND empresa_id = ?2 AND deleted_at IS NULL",
        params![id, ctx.empresa_id],
    )?;
    if changed == 0 {
        return Err(NexusError::NotFound(format!("conta a receber {id}")));
    }
    Ok(())
}

pub fn list_contas_receber_periodo(
    db: &DbState,
    empresa_id: &str,
    date_from: NaiveDate,
    date_to: NaiveDate,
) -> Result<Vec<ContaReceber>> {
    let conn = db
        .conn
        .lock()
        .map_err(|e| NexusError::Internal(e.to_string()))?;
    let sql = format!(
        "SELECT {CONTA_RECEBER_COLUMNS} FROM contas_receber
         WHERE empresa_id = ?1 AND vencimento >= ?2 AND vencimento <= ?3
           AND deleted_at IS NULL
         ORDER BY vencimento, cliente"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![
            empresa_id,
            date_from.format("%Y-%m-%d").to_string(),
            date_to.format("%Y-%m-%d").to_string()
        ],
        map_conta_receber,
    )?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

// ---------------------------------------------------------------------------
// Soft delete
// ---------------------------------------------------------------------------

/// Soft-delete a payable. ADMIN only; the row stays for audit.
pub fn soft_delete_conta_pagar(db: &DbState, ctx: &RequestContext, id: &str) -> Result<()> {
    ctx.require_admin()?;
    let conn = db
        .conn
        .lock()
        .map_err(|e| NexusError::Internal(e.to_string()))?;
    let changed = conn.execute(
        "UPDATE contas_pagar SET deleted_at = datetime('now')
         WHERE id = ?1 AND empresa_id = ?2 AND deleted_at IS NULL",
        params![id, ctx.empresa_id],
    )?;
    if changed == 0 {
        return Err(NexusError::NotFound(format!("conta a pagar {id}")));
    }
    Ok(())
}

/// Soft-delete a receivable. ADMIN only.
pub fn soft_delete_conta_receber(db: &DbState, ctx: &RequestContext, id: &str) -> Result<()> {
    ctx.require_admin()?;
    let conn = db
        .conn
        .lock()
        .map_err(|e| NexusError::Internal(e.to_string()))?;
    let changed = conn.execute(
        "UPDATE contas_receber SET deleted_at = datetime('now')
         WHERE id = ?1 AND empresa_id = ?2 AND deleted_at IS NULL",
        params![id, ctx.empresa_id],
    )?;
    if changed == 0 {
        return Err(NexusError::NotFound(format!("conta a receber {id}")));
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::db;
    use rusqlite::Connection;

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

    fn venc() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, 10).unwrap()
    }

    #[test]
    fn test_create_and_settle_conta_pagar() {
        let db = test_db();
        let conta = create_conta_pagar(
            &db,
            &fin_ctx(),
            ContaPagar::new("emp-1", "Padaria Central", 1250.0, venc()),
        )
        .unwrap();
        assert_eq!(conta.status, "PENDENTE");

        mark_conta_paga(&db, &fin_ctx(), &conta.id).unwrap();
        let listed = list_contas_pagar_periodo(&db, "emp-1", venc(), venc()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, "PAGO");
        assert!(listed[0].pago_em.is_some());
    }

    #[test]
    fn test_validation_fails_fast() {
        let db = test_db();
        let err = create_conta_pagar(
            &db,
            &fin_ctx(),
            ContaPagar::new("emp-1", "   ", 10.0, venc()),
        )
        .unwrap_err();
        assert!(matches!(err, NexusError::Validation(_)));

        let err = create_conta_pagar(
            &db,
            &fin_ctx(),
            ContaPagar::new("emp-1", "Fornecedor X", -5.0, venc()),
        )
        .unwrap_err();
        assert!(matches!(err, NexusError::Validation(_)));

        // nothing was written
        let listed = list_contas_pagar_periodo(&db, "emp-1", venc(), venc()).unwrap();
        assert!(listed.is_empty());
    }

    #[test]
    fn test_mark_missing_conta_not_found() {
        let db = test_db();
        let err = mark_conta_recebida(&db, &fin_ctx(), "nope").unwrap_err();
        assert!(matches!(err, NexusError::NotFound(_)));
    }

    #[test]
    fn test_soft_delete_hides_from_listing() {
        let db = test_db();
        let admin = RequestContext {
            user_id: "adm".into(),
            user_name: "Admin".into(),
            role: Role::Admin,
            empresa_id: "emp-1".into(),
            loja_id: None,
        };
        let conta = create_conta_pagar(
            &db,
            &admin,
            ContaPagar::new("emp-1", "Fornecedor X", 10.0, venc()),
        )
        .unwrap();

        // FINANCEIRO cannot delete
        assert!(matches!(
            soft_delete_conta_pagar(&db, &fin_ctx(), &conta.id),
            Err(NexusError::Forbidden(_))
        ));

        soft_delete_conta_pagar(&db, &admin, &conta.id).unwrap();
        let listed = list_contas_pagar_periodo(&db, "emp-1", venc(), venc()).unwrap();
        assert!(listed.is_empty());
    }

    #[test]
    fn test_conta_receber_roundtrip() {
        let db = test_db();
        let mut conta = ContaReceber::new("emp-1", "Cliente VIP", 99.9, venc());
        conta.loja_id = Some("loja-1".into());
        create_conta_receber(&db, &fin_ctx(), conta).unwrap();

        let listed = list_contas_receber_periodo(&db, "emp-1", venc(), venc()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].cliente, "Cliente VIP");
        assert_eq!(listed[0].valor, 99.9);
        assert_eq!(listed[0].loja_id.as_deref(), Some("loja-1"));
    }
}
