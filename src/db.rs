//! Embedded SQLite database layer for the NEXUS back office.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations, the
//! `local_settings` key/value store, and shared connection state consumed by
//! every domain module. All tenant data rows carry `empresa_id` and, where
//! applicable, `loja_id`; soft-deleted rows (`deleted_at IS NOT NULL`) are
//! excluded from every query and aggregate.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

/// Shared state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Initialize the database at `{data_dir}/nexus.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(data_dir: &Path) -> Result<DbState, String> {
    fs::create_dir_all(data_dir).map_err(|e| format!("Failed to create data dir: {e}"))?;

    let db_path = data_dir.join("nexus.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                let wal = db_path.with_extension("db-wal");
                let shm = db_path.with_extension("db-shm");
                let _ = fs::remove_file(&wal);
                let _ = fs::remove_file(&shm);
            }
            open_and_configure(&db_path)
                .map_err(|e| format!("Database open failed after retry: {e}"))?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// Migration v1: settings, tenant reference data, cash closings and
/// reconciliation history.
fn migrate_v1(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        -- local_settings (category/key/value store)
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        -- empresas (tenants)
        CREATE TABLE IF NOT EXISTS empresas (
            id TEXT PRIMARY KEY,
            nome TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        -- lojas (stores; lookup target for imports)
        CREATE TABLE IF NOT EXISTS lojas (
            id TEXT PRIMARY KEY,
            empresa_id TEXT NOT NULL,
            nome TEXT NOT NULL,
            codigo TEXT,
            deleted_at TEXT,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_lojas_empresa ON lojas(empresa_id);

        -- usuarios (identity reference; authentication lives elsewhere)
        CREATE TABLE IF NOT EXISTS usuarios (
            id TEXT PRIMARY KEY,
            empresa_id TEXT NOT NULL,
            nome TEXT NOT NULL,
            email TEXT,
            role TEXT NOT NULL DEFAULT 'LOJA',
            loja_id TEXT,
            deleted_at TEXT,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        -- fechamentos_caixa (daily cash closing, one per store per date)
        CREATE TABLE IF NOT EXISTS fechamentos_caixa (
            id TEXT PRIMARY KEY,
            empresa_id TEXT NOT NULL,
            loja_id TEXT NOT NULL,
            data TEXT NOT NULL,
            saldo_inicial REAL NOT NULL DEFAULT 0,
            dinheiro REAL NOT NULL DEFAULT 0,
            pix REAL NOT NULL DEFAULT 0,
            cartao REAL NOT NULL DEFAULT 0,
            sangrias REAL NOT NULL DEFAULT 0,
            suprimentos REAL NOT NULL DEFAULT 0,
            saidas REAL NOT NULL DEFAULT 0,
            total_entradas REAL NOT NULL DEFAULT 0,
            saldo_final REAL NOT NULL DEFAULT 0,
            valor_caixa_declarado REAL,
            status TEXT NOT NULL DEFAULT 'ABERTO',
            responsavel_usuario_id TEXT,
            responsavel_nome TEXT,
            deleted_at TEXT,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(loja_id, data)
        );
        CREATE INDEX IF NOT EXISTS idx_fechamentos_empresa_data
            ON fechamentos_caixa(empresa_id, data);

        -- conciliacoes (append-only PDV reconciliation history, no
        -- uniqueness: repeated runs keep every attempt for audit)
        CREATE TABLE IF NOT EXISTS conciliacoes (
            id TEXT PRIMARY KEY,
            empresa_id TEXT NOT NULL,
            loja_id TEXT NOT NULL,
            data TEXT NOT NULL,
            valor_pdv REAL NOT NULL DEFAULT 0,
            valor_caixa REAL NOT NULL DEFAULT 0,
            diferenca REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            criado_por TEXT,
            criado_por_nome TEXT,
            created_at TEXT DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_conciliacoes_loja_data
            ON conciliacoes(loja_id, data, created_at);
        ",
    )
    .map_err(|e| format!("migration v1: {e}"))?;

    conn.execute("INSERT OR IGNORE INTO schema_version (version) VALUES (1)", [])
        .map_err(|e| format!("record v1: {e}"))?;
    info!("Migration v1 applied");
    Ok(())
}

/// Migration v2: accounts payable / receivable.
fn migrate_v2(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS contas_pagar (
            id TEXT PRIMARY KEY,
            empresa_id TEXT NOT NULL,
            loja_id TEXT,
            fornecedor TEXT NOT NULL,
            descricao TEXT,
            categoria TEXT,
            valor REAL NOT NULL DEFAULT 0,
            vencimento TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDENTE',
            pago_em TEXT,
            deleted_at TEXT,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_contas_pagar_empresa_venc
            ON contas_pagar(empresa_id, vencimento);

        CREATE TABLE IF NOT EXISTS contas_receber (
            id TEXT PRIMARY KEY,
            empresa_id TEXT NOT NULL,
            loja_id TEXT,
            cliente TEXT NOT NULL,
            descricao TEXT,
            valor REAL NOT NULL DEFAULT 0,
            vencimento TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDENTE',
            recebido_em TEXT,
            deleted_at TEXT,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_contas_receber_empresa_venc
            ON contas_receber(empresa_id, vencimento);
        ",
    )
    .map_err(|e| format!("migration v2: {e}"))?;

    conn.execute("INSERT OR IGNORE INTO schema_version (version) VALUES (2)", [])
        .map_err(|e| format!("record v2: {e}"))?;
    info!("Migration v2 applied");
    Ok(())
}

/// Migration v3: import target entities (payroll, goals, audits,
/// maintenance, campaigns).
fn migrate_v3(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS funcionarios (
            id TEXT PRIMARY KEY,
            empresa_id TEXT NOT NULL,
            loja_id TEXT,
            nome TEXT NOT NULL,
            cargo TEXT,
            salario REAL NOT NULL DEFAULT 0,
            admissao TEXT,
            status TEXT NOT NULL DEFAULT 'ATIVO',
            deleted_at TEXT,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS metas (
            id TEXT PRIMARY KEY,
            empresa_id TEXT NOT NULL,
            loja_id TEXT NOT NULL,
            mes TEXT NOT NULL,
            valor_meta REAL NOT NULL DEFAULT 0,
            deleted_at TEXT,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_metas_loja_mes ON metas(loja_id, mes);

        CREATE TABLE IF NOT EXISTS auditorias (
            id TEXT PRIMARY KEY,
            empresa_id TEXT NOT NULL,
            loja_id TEXT,
            data TEXT,
            titulo TEXT NOT NULL,
            observacoes TEXT,
            status TEXT NOT NULL DEFAULT 'PENDENTE',
            deleted_at TEXT,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS manutencoes (
            id TEXT PRIMARY KEY,
            empresa_id TEXT NOT NULL,
            loja_id TEXT,
            descricao TEXT NOT NULL,
            data_abertura TEXT,
            custo REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'ABERTA',
            deleted_at TEXT,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS campanhas (
            id TEXT PRIMARY KEY,
            empresa_id TEXT NOT NULL,
            nome TEXT NOT NULL,
            inicio TEXT,
            fim TEXT,
            verba REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'PLANEJADA',
            deleted_at TEXT,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now'))
        );
        ",
    )
    .map_err(|e| format!("migration v3: {e}"))?;

    conn.execute("INSERT OR IGNORE INTO schema_version (version) VALUES (3)", [])
        .map_err(|e| format!("record v3: {e}"))?;
    info!("Migration v3 applied");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Read a setting, `None` if absent.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(
    conn: &Connection,
    category: &str,
    key: &str,
    value: &str,
) -> Result<(), String> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )
    .map_err(|e| format!("set_setting: {e}"))?;
    Ok(())
}

/// Test helper: run all migrations against an arbitrary connection.
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

// ===========================================================================
// Tests
// ===========================================================================
