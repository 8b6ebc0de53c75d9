//! Reference/registry entities fed by spreadsheet import: employees
//! (payroll), sales goals, store audits, maintenance tickets and campaigns.
//!
//! Thin typed records over their tables. The import normalizer constructs
//! these and calls the `insert_*` functions row by row; listing functions
//! exist for the dashboard side.

use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::DbState;
use crate::error::{NexusError, Result};
use crate::parsing::round_centavos;

pub const STATUS_FUNCIONARIO: &[&str] = &["ATIVO", "AFASTADO", "DESLIGADO"];
pub const STATUS_AUDITORIA: &[&str] = &["PENDENTE", "EM_ANDAMENTO", "CONCLUIDA"];
pub const STATUS_MANUTENCAO: &[&str] = &["ABERTA", "EM_EXECUCAO", "CONCLUIDA"];
pub const STATUS_CAMPANHA: &[&str] = &["PLANEJADA", "ATIVA", "ENCERRADA"];

// ---------------------------------------------------------------------------
// Funcionario (payroll)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Funcionario {
    pub id: String,
    pub empresa_id: String,
    pub loja_id: Option<String>,
    pub nome: String,
    pub cargo: Option<String>,
    pub salario: f64,
    pub admissao: Option<NaiveDate>,
    pub status: String,
}

impl Funcionario {
    pub fn new(empresa_id: &str, nome: &str) -> Funcionario {
        Funcionario {
            id: Uuid::new_v4().to_string(),
            empresa_id: empresa_id.to_string(),
            loja_id: None,
            nome: nome.to_string(),
            cargo: None,
            salario: 0.0,
            admissao: None,
            status: "ATIVO".to_string(),
        }
    }
}

pub fn insert_funcionario(conn: &Connection, f: &Funcionario) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO funcionarios (id, empresa_id, loja_id, nome, cargo, salario, admissao, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            f.id,
            f.empresa_id,
            f.loja_id,
            f.nome,
            f.cargo,
            round_centavos(f.salario),
            f.admissao.map(|d| d.format("%Y-%m-%d").to_string()),
            f.status,
        ],
    )?;
    Ok(())
}

pub fn list_funcionarios(db: &DbState, empresa_id: &str) -> Result<Vec<Funcionario>> {
    let conn = db
        .conn
        .lock()
        .map_err(|e| NexusError::Internal(e.to_string()))?;
    let mut stmt = conn.prepare(
        "SELECT id, empresa_id, loja_id, nome, cargo, salario, admissao, status
         FROM funcionarios
         WHERE empresa_id = ?1 AND deleted_at IS NULL
         ORDER BY nome",
    )?;
    let rows = stmt.query_map(params![empresa_id], |row: &Row| {
        let admissao_raw: Option<String> = row.get(6)?;
        Ok(Funcionario {
            id: row.get(0)?,
            empresa_id: row.get(1)?,
            loja_id: row.get(2)?,
            nome: row.get(3)?,
            cargo: row.get(4)?,
            salario: row.get(5)?,
            admissao: admissao_raw
                .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
            status: row.get(7)?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

// ---------------------------------------------------------------------------
// Meta (monthly sales goal per store)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub id: String,
    pub empresa_id: String,
    pub loja_id: String,
    /// Month key `YYYY-MM`.
    pub mes: String,
    pub valor_meta: f64,
}

impl Meta {
    pub fn new(empresa_id: &str, loja_id: &str, mes: &str, valor_meta: f64) -> Meta {
        Meta {
            id: Uuid::new_v4().to_string(),
            empresa_id: empresa_id.to_string(),
            loja_id: loja_id.to_string(),
            mes: mes.to_string(),
            valor_meta: round_centavos(valor_meta),
        }
    }
}

pub fn insert_meta(conn: &Connection, m: &Meta) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO metas (id, empresa_id, loja_id, mes, valor_meta)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![m.id, m.empresa_id, m.loja_id, m.mes, m.valor_meta],
    )?;
    Ok(())
}

pub fn list_metas(db: &DbState, empresa_id: &str, mes: &str) -> Result<Vec<Meta>> {
    let conn = db
        .conn
        .lock()
        .map_err(|e| NexusError::Internal(e.to_string()))?;
    let mut stmt = conn.prepare(
        "SELECT id, empresa_id, loja_id, mes, valor_meta FROM metas
         WHERE empresa_id = ?1 AND mes = ?2 AND deleted_at IS NULL
         ORDER BY loja_id",
    )?;
    let rows = stmt.query_map(params![empresa_id, mes], |row| {
        Ok(Meta {
            id: row.get(0)?,
            empresa_id: row.get(1)?,
            loja_id: row.get(2)?,
            mes: row.get(3)?,
            valor_meta: row.get(4)?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

// ---------------------------------------------------------------------------
// Auditoria
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auditoria {
    pub id: String,
    pub empresa_id: String,
    pub loja_id: Option<String>,
    pub data: Option<NaiveDate>,
    pub titulo: String,
    pub observacoes: Option<String>,
    pub status: String,
}

impl Auditoria {
    pub fn new(empresa_id: &str, titulo: &str) -> Auditoria {
        Auditoria {
            id: Uuid::new_v4().to_string(),
            empresa_id: empresa_id.to_string(),
            loja_id: None,
            data: None,
            titulo: titulo.to_string(),
            observacoes: None,
            status: "PENDENTE".to_string(),
        }
    }
}

pub fn insert_auditoria(conn: &Connection, a: &Auditoria) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO auditorias (id, empresa_id, loja_id, data, titulo, observacoes, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            a.id,
            a.empresa_id,
            a.loja_id,
            a.data.map(|d| d.format("%Y-%m-%d").to_string()),
            a.titulo,
            a.observacoes,
            a.status,
        ],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Manutencao
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manutencao {
    pub id: String,
    pub empresa_id: String,
    pub loja_id: Option<String>,
    pub descricao: String,
    pub data_abertura: Option<NaiveDate>,
    pub custo: f64,
    pub status: String,
}

impl Manutencao {
    pub fn new(empresa_id: &str, descricao: &str) -> Manutencao {
        Manutencao {
            id: Uuid::new_v4().to_string(),
            empresa_id: empresa_id.to_string(),
            loja_id: None,
            descricao: descricao.to_string(),
            data_abertura: None,
            custo: 0.0,
            status: "ABERTA".to_string(),
        }
    }
}

pub fn insert_manutencao(conn: &Connection, m: &Manutencao) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO manutencoes (id, empresa_id, loja_id, descricao, data_abertura, custo, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            m.id,
            m.empresa_id,
            m.loja_id,
            m.descricao,
            m.data_abertura.map(|d| d.format("%Y-%m-%d").to_string()),
            round_centavos(m.custo),
            m.status,
        ],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Campanha
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campanha {
    pub id: String,
    pub empresa_id: String,
    pub nome: String,
    pub inicio: Option<NaiveDate>,
    pub fim: Option<NaiveDate>,
    pub verba: f64,
    pub status: String,
}

impl Campanha {
    pub fn new(empresa_id: &str, nome: &str) -> Campanha {
        Campanha {
            id: Uuid::new_v4().to_string(),
            empresa_id: empresa_id.to_string(),
            nome: nome.to_string(),
            inicio: None,
            fim: None,
            verba: 0.0,
            status: "PLANEJADA".to_string(),
        }
    }
}

pub fn insert_campanha(conn: &Connection, c: &Campanha) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO campanhas (id, empresa_id, nome, inicio, fim, verba, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            c.id,
            c.empresa_id,
            c.nome,
            c.inicio.map(|d| d.format("%Y-%m-%d").to_string()),
            c.fim.map(|d| d.format("%Y-%m-%d").to_string()),
            round_centavos(c.verba),
            c.status,
        ],
    )?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use rusqlite::Connection;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::run_migrations_for_test(&conn);
        conn
    }

    #[test]
    fn test_insert_funcionario_roundtrip() {
        let conn = test_conn();
        let mut f = Funcionario::new("emp-1", "Carlos Souza");
        f.cargo = Some("Gerente".into());
        f.salario = 3500.0;
        f.admissao = NaiveDate::from_ymd_opt(2024, 1, 2);
        insert_funcionario(&conn, &f).unwrap();

        let nome: String = conn
            .query_row(
                "SELECT nome FROM funcionarios WHERE id = ?1",
                params![f.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(nome, "Carlos Souza");
    }

    #[test]
    fn test_insert_meta_and_campanha() {
        let conn = test_conn();
        insert_meta(&conn, &Meta::new("emp-1", "loja-1", "2025-03", 50000.0)).unwrap();
        insert_campanha(&conn, &Campanha::new("emp-1", "Black Friday")).unwrap();

        let metas: i64 = conn
            .query_row("SELECT COUNT(*) FROM metas", [], |r| r.get(0))
            .unwrap();
        let campanhas: i64 = conn
            .query_row("SELECT COUNT(*) FROM campanhas", [], |r| r.get(0))
            .unwrap();
        assert_eq!((metas, campanhas), (1, 1));
    }
}
