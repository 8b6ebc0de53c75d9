//! Spreadsheet import normalizer.
//!
//! Converts loosely-typed spreadsheet rows (Portuguese column names,
//! inconsistent formatting) into validated domain records and inserts them
//! one by one. The batch contract is best-effort per row: a missing required
//! field, an unresolvable store name or a failed insert skips that row and
//! moves on — the batch itself never fails, and the caller only sees the
//! aggregate imported/total count. Users fix the leftover rows in the
//! spreadsheet and re-import; that beats debugging a transactional rollback
//! of a 400-row file.
//!
//! Rows are processed strictly in input order, one insert at a time.

use chrono::{Datelike, NaiveDate};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::auth::RequestContext;
use crate::cadastros::{
    insert_auditoria, insert_campanha, insert_funcionario, insert_manutencao, insert_meta,
    Auditoria, Campanha, Funcionario, Manutencao, Meta, STATUS_AUDITORIA, STATUS_CAMPANHA,
    STATUS_FUNCIONARIO, STATUS_MANUTENCAO,
};
use crate::contas::{
    insert_conta_pagar, insert_conta_receber, ContaPagar, ContaReceber, STATUS_CONTA_PAGAR,
    STATUS_CONTA_RECEBER,
};
use crate::db::{self, DbState};
use crate::error::{NexusError, Result};
use crate::parsing::{
    excel_serial_to_date, parse_currency, parse_date, parse_status, Cell, DateOrder, ImportRow,
};

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LojaRef {
    pub id: String,
    pub nome: String,
}

/// Reference data used to resolve foreign keys by name during import.
#[derive(Debug, Clone, Default)]
pub struct Lookups {
    pub lojas: Vec<LojaRef>,
    /// Field order applied to slash dates by mappers that don't pin their
    /// own policy. Comes from the `import.date_order` local setting.
    pub date_order: DateOrder,
}

impl Lookups {
    /// Load the tenant's stores and the configured date-order policy.
    pub fn from_db(db: &DbState, empresa_id: &str) -> Result<Lookups> {
        let conn = db
            .conn
            .lock()
            .map_err(|e| NexusError::Internal(e.to_string()))?;
        let mut stmt = conn.prepare(
            "SELECT id, nome FROM lojas
             WHERE empresa_id = ?1 AND deleted_at IS NULL
             ORDER BY nome",
        )?;
        let lojas = stmt
            .query_map([empresa_id], |row| {
                Ok(LojaRef {
                    id: row.get(0)?,
                    nome: row.get(1)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        let date_order = db::get_setting(&conn, "import", "date_order")
            .map(|raw| DateOrder::from_setting(&raw))
            .unwrap_or(DateOrder::DayFirst);
        Ok(Lookups { lojas, date_order })
    }

    /// Resolve a store by name, tolerant of partial or abbreviated entry:
    /// case-insensitive, and a match if either name contains the other
    /// ("centro" finds "Loja Centro"; "Loja Centro - Matriz" finds
    /// "Loja Centro"). First match in store order wins.
    pub fn resolve_loja(&self, raw: &str) -> Option<String> {
        let needle = raw.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        self.lojas
            .iter()
            .find(|loja| {
                let nome = loja.nome.trim().to_lowercase();
                !nome.is_empty() && (nome.contains(&needle) || needle.contains(&nome))
            })
            .map(|loja| loja.id.clone())
    }
}

// ---------------------------------------------------------------------------
// Field extraction
// ---------------------------------------------------------------------------

/// First alias whose column exists with a non-empty cell. Header matching
/// is case-insensitive, so alias lists only carry semantic variants.
pub fn field<'a>(row: &'a ImportRow, aliases: &[&str]) -> Option<&'a Cell> {
    for alias in aliases {
        let hit = row
            .iter()
            .find(|(key, cell)| key.trim().eq_ignore_ascii_case(alias) && !cell.is_empty())
            .map(|(_, cell)| cell);
        if hit.is_some() {
            return hit;
        }
    }
    None
}

pub fn text_field(row: &ImportRow, aliases: &[&str]) -> Option<String> {
    field(row, aliases).and_then(|c| c.as_text())
}

/// Currency value of the first matching non-empty cell. `None` means the
/// column is absent/blank; a present-but-junk cell parses to 0.0 (the
/// tolerant-parse contract).
pub fn currency_field(row: &ImportRow, aliases: &[&str]) -> Option<f64> {
    field(row, aliases).map(parse_currency)
}

pub fn date_field(row: &ImportRow, aliases: &[&str], order: DateOrder) -> Option<NaiveDate> {
    field(row, aliases).and_then(|c| parse_date(c, order))
}

/// Month key (`YYYY-MM`) from a cell: a date cell's month, `MM/YYYY`,
/// `YYYY-MM`, or an Excel serial.
fn month_field(row: &ImportRow, aliases: &[&str]) -> Option<String> {
    let cell = field(row, aliases)?;
    match cell {
        Cell::Date(d) => Some(format!("{:04}-{:02}", d.year(), d.month())),
        Cell::Number(n) => {
            excel_serial_to_date(*n).map(|d| format!("{:04}-{:02}", d.year(), d.month()))
        }
        Cell::Text(s) => {
            let s = s.trim();
            if let Some((mes, ano)) = s.split_once('/') {
                let mes: u32 = mes.trim().parse().ok()?;
                let ano: i32 = ano.trim().parse().ok()?;
                if (1..=12).contains(&mes) {
                    return Some(format!("{ano:04}-{mes:02}"));
                }
                None
            } else if let Some((ano, mes)) = s.split_once('-') {
                let ano: i32 = ano.trim().parse().ok()?;
                let mes: u32 = mes.trim().parse().ok()?;
                if (1..=12).contains(&mes) {
                    return Some(format!("{ano:04}-{mes:02}"));
                }
                None
            } else {
                None
            }
        }
        Cell::Empty => None,
    }
}

const LOJA_ALIASES: &[&str] = &["Loja", "Filial", "Unidade"];

/// Optional store column: absent is fine, present-but-unresolvable is a
/// row skip (a wrong store silently landing company-wide would be worse
/// than a skipped row).
fn optional_loja(row: &ImportRow, lookups: &Lookups) -> std::result::Result<Option<String>, ()> {
    match text_field(row, LOJA_ALIASES) {
        None => Ok(None),
        Some(raw) => match lookups.resolve_loja(&raw) {
            Some(id) => Ok(Some(id)),
            None => Err(()),
        },
    }
}

// ---------------------------------------------------------------------------
// Mapper trait and batch driver
// ---------------------------------------------------------------------------

/// Per-entity-type row mapping: which aliases feed which fields, what is
/// required, and how a normalized record is persisted.
pub trait RowMapper {
    type Record;

    fn entity(&self) -> &'static str;

    /// Normalize one row. `None` means the row is skipped (missing required
    /// field or failed lookup) — never an error.
    fn normalize(&self, row: &ImportRow, lookups: &Lookups) -> Option<Self::Record>;

    fn insert(&self, conn: &Connection, record: &Self::Record) -> rusqlite::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportResult {
    pub imported_count: usize,
    pub total_count: usize,
}

/// Normalize a batch without touching the database. Skipped rows simply
/// don't appear in the output.
pub fn normalize_batch<M: RowMapper>(
    rows: &[ImportRow],
    mapper: &M,
    lookups: &Lookups,
) -> Vec<M::Record> {
    rows.iter()
        .filter_map(|row| mapper.normalize(row, lookups))
        .collect()
}

/// Run a full import: normalize and insert each row independently, in
/// input order, one insert at a time. A row failing at either stage is
/// counted as not-imported and the loop continues; the batch call itself
/// only errors on environment-level problems (lock poisoning, role gate).
pub fn import_batch<M: RowMapper>(
    db: &DbState,
    ctx: &RequestContext,
    rows: &[ImportRow],
    mapper: &M,
    lookups: &Lookups,
) -> Result<ImportResult> {
    ctx.require_financeiro()?;

    let conn = db
        .conn
        .lock()
        .map_err(|e| NexusError::Internal(e.to_string()))?;

    let mut result = ImportResult {
        imported_count: 0,
        total_count: rows.len(),
    };

    for (index, row) in rows.iter().enumerate() {
        let Some(record) = mapper.normalize(row, lookups) else {
            debug!(entity = mapper.entity(), row = index + 1, "Linha ignorada na normalização");
            continue;
        };
        match mapper.insert(&conn, &record) {
            Ok(()) => result.imported_count += 1,
            Err(e) => {
                warn!(
                    entity = mapper.entity(),
                    row = index + 1,
                    error = %e,
                    "Falha ao inserir linha importada"
                );
            }
        }
    }

    info!(
        entity = mapper.entity(),
        imported = result.imported_count,
        total = result.total_count,
        "Importação concluída"
    );
    Ok(result)
}

// ---------------------------------------------------------------------------
// Entity mappers
// ---------------------------------------------------------------------------

/// Accounts payable. This path keeps the production heuristic for slash
/// dates (first component > 12 means day-first) instead of the configured
/// order; pin it explicitly with [`ContaPagarMapper::with_date_order`].
pub struct ContaPagarMapper {
    empresa_id: String,
    date_order: DateOrder,
}

impl ContaPagarMapper {
    pub fn new(ctx: &RequestContext) -> ContaPagarMapper {
        ContaPagarMapper {
            empresa_id: ctx.empresa_id.clone(),
            date_order: DateOrder::Heuristic,
        }
    }

    pub fn with_date_order(mut self, order: DateOrder) -> ContaPagarMapper {
        self.date_order = order;
        self
    }
}

impl RowMapper for ContaPagarMapper {
    type Record = ContaPagar;

    fn entity(&self) -> &'static str {
        "contas_pagar"
    }

    fn normalize(&self, row: &ImportRow, lookups: &Lookups) -> Option<ContaPagar> {
        let fornecedor = text_field(row, &["Fornecedor", "Credor"])?;
        let valor = currency_field(row, &["Valor", "Valor (R$)", "Vlr"])?;
        let vencimento = date_field(
            row,
            &["Vencimento", "Data de Vencimento", "Data Venc.", "Data"],
            self.date_order,
        )?;
        let loja_id = optional_loja(row, lookups).ok()?;

        let mut conta = ContaPagar::new(&self.empresa_id, &fornecedor, valor, vencimento);
        conta.loja_id = loja_id;
        conta.descricao = text_field(row, &["Descrição", "Descricao", "Histórico", "Historico"]);
        conta.categoria = text_field(row, &["Categoria"]);
        conta.status = parse_status(
            &text_field(row, &["Status", "Situação", "Situacao"]).unwrap_or_default(),
            STATUS_CONTA_PAGAR,
            "PENDENTE",
        );
        Some(conta)
    }

    fn insert(&self, conn: &Connection, record: &ContaPagar) -> rusqlite::Result<()> {
        insert_conta_pagar(conn, record)
    }
}

pub struct ContaReceberMapper {
    empresa_id: String,
}

impl ContaReceberMapper {
    pub fn new(ctx: &RequestContext) -> ContaReceberMapper {
        ContaReceberMapper {
            empresa_id: ctx.empresa_id.clone(),
        }
    }
}

impl RowMapper for ContaReceberMapper {
    type Record = ContaReceber;

    fn entity(&self) -> &'static str {
        "contas_receber"
    }

    fn normalize(&self, row: &ImportRow, lookups: &Lookups) -> Option<ContaReceber> {
        let cliente = text_field(row, &["Cliente", "Devedor"])?;
        let valor = currency_field(row, &["Valor", "Valor (R$)", "Vlr"])?;
        let vencimento = date_field(
            row,
            &["Vencimento", "Data de Vencimento", "Data"],
            lookups.date_order,
        )?;
        let loja_id = optional_loja(row, lookups).ok()?;

        let mut conta = ContaReceber::new(&self.empresa_id, &cliente, valor, vencimento);
        conta.loja_id = loja_id;
        conta.descricao = text_field(row, &["Descrição", "Descricao", "Histórico", "Historico"]);
        conta.status = parse_status(
            &text_field(row, &["Status", "Situação", "Situacao"]).unwrap_or_default(),
            STATUS_CONTA_RECEBER,
            "PENDENTE",
        );
        Some(conta)
    }

    fn insert(&self, conn: &Connection, record: &ContaReceber) -> rusqlite::Result<()> {
        insert_conta_receber(conn, record)
    }
}

pub struct FuncionarioMapper {
    empresa_id: String,
}

impl FuncionarioMapper {
    pub fn new(ctx: &RequestContext) -> FuncionarioMapper {
        FuncionarioMapper {
            empresa_id: ctx.empresa_id.clone(),
        }
    }
}

impl RowMapper for FuncionarioMapper {
    type Record = Funcionario;

    fn entity(&self) -> &'static str {
        "funcionarios"
    }

    fn normalize(&self, row: &ImportRow, lookups: &Lookups) -> Option<Funcionario> {
        let nome = text_field(row, &["Nome", "Funcionário", "Funcionario", "Colaborador"])?;
        let loja_id = optional_loja(row, lookups).ok()?;

        let mut f = Funcionario::new(&self.empresa_id, &nome);
        f.loja_id = loja_id;
        f.cargo = text_field(row, &["Cargo", "Função", "Funcao"]);
        f.salario = currency_field(row, &["Salário", "Salario", "Salário Base", "Salario Base"])
            .unwrap_or(0.0);
        f.admissao = date_field(
            row,
            &["Admissão", "Admissao", "Data de Admissão", "Data de Admissao"],
            lookups.date_order,
        );
        f.status = parse_status(
            &text_field(row, &["Status", "Situação", "Situacao"]).unwrap_or_default(),
            STATUS_FUNCIONARIO,
            "ATIVO",
        );
        Some(f)
    }

    fn insert(&self, conn: &Connection, record: &Funcionario) -> rusqlite::Result<()> {
        insert_funcionario(conn, record)
    }
}

pub struct MetaMapper {
    empresa_id: String,
}

impl MetaMapper {
    pub fn new(ctx: &RequestContext) -> MetaMapper {
        MetaMapper {
            empresa_id: ctx.empresa_id.clone(),
        }
    }
}

impl RowMapper for MetaMapper {
    type Record = Meta;

    fn entity(&self) -> &'static str {
        "metas"
    }

    fn normalize(&self, row: &ImportRow, lookups: &Lookups) -> Option<Meta> {
        // store is required here: a goal without a store is meaningless
        let loja_raw = text_field(row, LOJA_ALIASES)?;
        let loja_id = lookups.resolve_loja(&loja_raw)?;
        let mes = month_field(row, &["Mês", "Mes", "Competência", "Competencia"])?;
        let valor_meta = currency_field(row, &["Meta", "Valor Meta", "Valor da Meta"])?;
        Some(Meta::new(&self.empresa_id, &loja_id, &mes, valor_meta))
    }

    fn insert(&self, conn: &Connection, record: &Meta) -> rusqlite::Result<()> {
        insert_meta(conn, record)
    }
}

pub struct AuditoriaMapper {
    empresa_id: String,
}

impl AuditoriaMapper {
    pub fn new(ctx: &RequestContext) -> AuditoriaMapper {
        AuditoriaMapper {
            empresa_id: ctx.empresa_id.clone(),
        }
    }
}

impl RowMapper for AuditoriaMapper {
    type Record = Auditoria;

    fn entity(&self) -> &'static str {
        "auditorias"
    }

    fn normalize(&self, row: &ImportRow, lookups: &Lookups) -> Option<Auditoria> {
        let titulo = text_field(row, &["Título", "Titulo", "Auditoria"])?;
        let loja_id = optional_loja(row, lookups).ok()?;

        let mut a = Auditoria::new(&self.empresa_id, &titulo);
        a.loja_id = loja_id;
        a.data = date_field(row, &["Data", "Data da Auditoria"], lookups.date_order);
        a.observacoes = text_field(row, &["Observações", "Observacoes", "Obs"]);
        a.status = parse_status(
            &text_field(row, &["Status", "Situação", "Situacao"]).unwrap_or_default(),
            STATUS_AUDITORIA,
            "PENDENTE",
        );
        Some(a)
    }

    fn insert(&self, conn: &Connection, record: &Auditoria) -> rusqlite::Result<()> {
        insert_auditoria(conn, record)
    }
}

pub struct ManutencaoMapper {
    empresa_id: String,
}

impl ManutencaoMapper {
    pub fn new(ctx: &RequestContext) -> ManutencaoMapper {
        ManutencaoMapper {
            empresa_id: ctx.empresa_id.clone(),
        }
    }
}

impl RowMapper for ManutencaoMapper {
    type Record = Manutencao;

    fn entity(&self) -> &'static str {
        "manutencoes"
    }

    fn normalize(&self, row: &ImportRow, lookups: &Lookups) -> Option<Manutencao> {
        let descricao = text_field(row, &["Descrição", "Descricao", "Serviço", "Servico"])?;
        let loja_id = optional_loja(row, lookups).ok()?;

        let mut m = Manutencao::new(&self.empresa_id, &descricao);
        m.loja_id = loja_id;
        m.data_abertura = date_field(
            row,
            &["Data", "Abertura", "Data de Abertura"],
            lookups.date_order,
        );
        m.custo = currency_field(row, &["Custo", "Valor"]).unwrap_or(0.0);
        m.status = parse_status(
            &text_field(row, &["Status", "Situação", "Situacao"]).unwrap_or_default(),
            STATUS_MANUTENCAO,
            "ABERTA",
        );
        Some(m)
    }

    fn insert(&self, conn: &Connection, record: &Manutencao) -> rusqlite::Result<()> {
        insert_manutencao(conn, record)
    }
}

pub struct CampanhaMapper {
    empresa_id: String,
}

impl CampanhaMapper {
    pub fn new(ctx: &RequestContext) -> CampanhaMapper {
        CampanhaMapper {
            empresa_id: ctx.empresa_id.clone(),
        }
    }
}

impl RowMapper for CampanhaMapper {
    type Record = Campanha;

    fn entity(&self) -> &'static str {
        "campanhas"
    }

    fn normalize(&self, row: &ImportRow, lookups: &Lookups) -> Option<Campanha> {
        let nome = text_field(row, &["Campanha", "Nome"])?;
        let mut c = Campanha::new(&self.empresa_id, &nome);
        c.inicio = date_field(row, &["Início", "Inicio", "Data Início"], lookups.date_order);
        c.fim = date_field(
            row,
            &["Fim", "Término", "Termino", "Data Fim"],
            lookups.date_order,
        );
        c.verba = currency_field(row, &["Verba", "Orçamento", "Orcamento", "Investimento"])
            .unwrap_or(0.0);
        c.status = parse_status(
            &text_field(row, &["Status", "Situação", "Situacao"]).unwrap_or_default(),
            STATUS_CAMPANHA,
            "PLANEJADA",
        );
        Some(c)
    }

    fn insert(&self, conn: &Connection, record: &Campanha) -> rusqlite::Result<()> {
        insert_campanha(conn, record)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::spreadsheet::parse_csv_bytes;
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

    fn lookups() -> Lookups {
        Lookups {
            lojas: vec![
                LojaRef {
                    id: "loja-1".into(),
                    nome: "Loja Centro".into(),
                },
                LojaRef {
                    id: "loja-2".into(),
                    nome: "Loja Shopping Norte".into(),
                },
            ],
            date_order: DateOrder::DayFirst,
        }
    }

    fn row(pairs: &[(&str, &str)]) -> ImportRow {
        let mut row = HashMap::new();
        for (k, v) in pairs {
            let cell = if v.trim().is_empty() {
                Cell::Empty
            } else {
                Cell::Text(v.to_string())
            };
            row.insert(k.to_string(), cell);
        }
        row
    }

    #[test]
    fn test_resolve_loja_fuzzy_both_directions() {
        let l = lookups();
        assert_eq!(l.resolve_loja("centro").as_deref(), Some("loja-1"));
        assert_eq!(l.resolve_loja("LOJA CENTRO"), Some("loja-1".into()));
        assert_eq!(
            l.resolve_loja("Loja Shopping Norte - Anexo").as_deref(),
            Some("loja-2")
        );
        assert_eq!(l.resolve_loja("Sul"), None);
        assert_eq!(l.resolve_loja("   "), None);
    }

    #[test]
    fn test_field_alias_case_insensitive_first_nonempty() {
        let r = row(&[("FORNECEDOR", "Padaria"), ("Valor", "")]);
        assert_eq!(
            text_field(&r, &["Fornecedor"]).as_deref(),
            Some("Padaria")
        );
        assert_eq!(currency_field(&r, &["Valor"]), None, "empty cell is absent");
    }

    #[test]
    fn test_import_skips_row_with_missing_required_field() {
        let db = test_db();
        let ctx = fin_ctx();
        let rows = vec![
            row(&[
                ("Fornecedor", "Padaria Central"),
                ("Valor", "R$ 1.250,00"),
                ("Vencimento", "15/03/2025"),
            ]),
            // fornecedor missing: skipped, batch continues
            row(&[("Valor", "100,00"), ("Vencimento", "20/03/2025")]),
        ];
        let mapper = ContaPagarMapper::new(&ctx);
        let result = import_batch(&db, &ctx, &rows, &mapper, &lookups()).unwrap();
        assert_eq!(result.imported_count, 1);
        assert_eq!(result.total_count, 2);
    }

    #[test]
    fn test_import_skips_unresolvable_store() {
        let db = test_db();
        let ctx = fin_ctx();
        let rows = vec![
            row(&[
                ("Fornecedor", "Fornecedor A"),
                ("Valor", "10,00"),
                ("Vencimento", "15/03/2025"),
                ("Loja", "centro"),
            ]),
            row(&[
                ("Fornecedor", "Fornecedor B"),
                ("Valor", "20,00"),
                ("Vencimento", "15/03/2025"),
                ("Loja", "Loja Fantasma"),
            ]),
        ];
        let mapper = ContaPagarMapper::new(&ctx);
        let result = import_batch(&db, &ctx, &rows, &mapper, &lookups()).unwrap();
        assert_eq!(result.imported_count, 1);

        let conn = db.conn.lock().unwrap();
        let loja: Option<String> = conn
            .query_row("SELECT loja_id FROM contas_pagar", [], |r| r.get(0))
            .unwrap();
        assert_eq!(loja.as_deref(), Some("loja-1"));
    }

    #[test]
    fn test_import_is_order_preserving_and_single_shot() {
        let db = test_db();
        let ctx = fin_ctx();
        let rows: Vec<ImportRow> = (1..=3)
            .map(|i| {
                let fornecedor = format!("Fornecedor {i}");
                row(&[
                    ("Fornecedor", fornecedor.as_str()),
                    ("Valor", "10,00"),
                    ("Vencimento", "15/03/2025"),
                ])
            })
            .collect();
        let mapper = ContaPagarMapper::new(&ctx);
        let result = import_batch(&db, &ctx, &rows, &mapper, &lookups()).unwrap();
        assert_eq!(result.imported_count, 3);

        let conn = db.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT fornecedor FROM contas_pagar ORDER BY rowid")
            .unwrap();
        let inserted: Vec<String> = stmt
            .query_map([], |r| r.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();
        assert_eq!(
            inserted,
            vec!["Fornecedor 1", "Fornecedor 2", "Fornecedor 3"],
            "insert order matches input order, each row exactly once"
        );
    }

    #[test]
    fn test_conta_pagar_heuristic_date_order() {
        let ctx = fin_ctx();
        let mapper = ContaPagarMapper::new(&ctx);
        let r = row(&[
            ("Fornecedor", "X"),
            ("Valor", "10,00"),
            // ambiguous: first component <= 12 reads month-first
            ("Vencimento", "05/04/2025"),
        ]);
        let conta = mapper.normalize(&r, &lookups()).unwrap();
        assert_eq!(
            (conta.vencimento.month(), conta.vencimento.day()),
            (5, 4),
            "heuristic path keeps the production month-first fallback"
        );

        // pinned day-first policy reads the same cell as April 5th
        let mapper = ContaPagarMapper::new(&ctx).with_date_order(DateOrder::DayFirst);
        let conta = mapper.normalize(&r, &lookups()).unwrap();
        assert_eq!((conta.vencimento.month(), conta.vencimento.day()), (4, 5));
    }

    #[test]
    fn test_funcionario_mapper_typed_fields() {
        let ctx = fin_ctx();
        let mapper = FuncionarioMapper::new(&ctx);
        let mut r = row(&[
            ("Nome", "Carlos Souza"),
            ("Cargo", "Gerente"),
            ("Salário", "R$ 3.500,00"),
            ("Loja", "shopping norte"),
            ("Status", "ativo"),
        ]);
        // admission as an Excel serial cell
        r.insert("Admissão".to_string(), Cell::Number(45000.0));

        let f = mapper.normalize(&r, &lookups()).unwrap();
        assert_eq!(f.salario, 3500.0);
        assert_eq!(f.loja_id.as_deref(), Some("loja-2"));
        assert_eq!(f.status, "ATIVO");
        let adm = f.admissao.unwrap();
        assert_eq!((adm.year(), adm.month(), adm.day()), (2023, 3, 15));
    }

    #[test]
    fn test_meta_mapper_month_normalization() {
        let ctx = fin_ctx();
        let mapper = MetaMapper::new(&ctx);

        let r = row(&[("Loja", "centro"), ("Mês", "03/2025"), ("Meta", "50.000,00")]);
        let m = mapper.normalize(&r, &lookups()).unwrap();
        assert_eq!(m.mes, "2025-03");
        assert_eq!(m.valor_meta, 50000.0);

        let r = row(&[("Loja", "centro"), ("Mes", "2025-11"), ("Meta", "1,00")]);
        let m = mapper.normalize(&r, &lookups()).unwrap();
        assert_eq!(m.mes, "2025-11");

        // goal without a resolvable store is skipped
        let r = row(&[("Loja", "inexistente"), ("Mês", "03/2025"), ("Meta", "1,00")]);
        assert!(mapper.normalize(&r, &lookups()).is_none());
    }

    #[test]
    fn test_csv_to_import_end_to_end() {
        let db = test_db();
        let ctx = fin_ctx();
        let bytes = "Fornecedor;Valor;Vencimento;Loja\n\
                     Padaria Central;R$ 1.250,00;15/03/2025;centro\n\
                     ;100,00;20/03/2025;centro\n\
                     Transportadora Sul;R$ 89,90;25/03/2025;\n"
            .as_bytes();
        let rows = parse_csv_bytes(bytes).unwrap();
        assert_eq!(rows.len(), 3);

        let mapper = ContaPagarMapper::new(&ctx);
        let result = import_batch(&db, &ctx, &rows, &mapper, &lookups()).unwrap();
        assert_eq!(result.imported_count, 2, "blank-supplier row is skipped");
        assert_eq!(result.total_count, 3);
    }

    #[test]
    fn test_import_requires_financeiro_role() {
        let db = test_db();
        let ctx = RequestContext {
            user_id: "u".into(),
            user_name: "U".into(),
            role: Role::Loja,
            empresa_id: "emp-1".into(),
            loja_id: Some("loja-1".into()),
        };
        let mapper = ContaPagarMapper::new(&ctx);
        let err = import_batch(&db, &ctx, &[], &mapper, &lookups()).unwrap_err();
        assert!(matches!(err, NexusError::Forbidden(_)));
    }

    #[test]
    fn test_lookups_from_db_reads_setting() {
        let db = test_db();
        {
            let conn = db.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO lojas (id, empresa_id, nome) VALUES ('loja-1', 'emp-1', 'Loja Centro')",
                [],
            )
            .unwrap();
            db::set_setting(&conn, "import", "date_order", "US").unwrap();
        }
        let l = Lookups::from_db(&db, "emp-1").unwrap();
        assert_eq!(l.lojas.len(), 1);
        assert_eq!(l.date_order, DateOrder::MonthFirst);
    }
}
