//! Idempotent schema synchronization, run at startup before any ingestion.
//!
//! Three moves, in order: create missing tables, rebuild the legacy `cotacoes`
//! layout (renamed aside as a backup, never dropped), then add any canonical
//! columns an existing table lacks. Running against a current schema is a
//! no-op and the returned report says so.

use sqlx::{Row, SqlitePool};
use tracing::info;

/// What a migration run actually changed. Empty on an already-current schema.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub created_tables: Vec<String>,
    pub rebuilt_tables: Vec<String>,
    /// "table.column" entries added via ALTER TABLE.
    pub added_columns: Vec<String>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.created_tables.is_empty()
            && self.rebuilt_tables.is_empty()
            && self.added_columns.is_empty()
    }
}

// Expected data columns (beyond id/dataset_id), in schema order.

const DATASETS_COLUMNS: &[(&str, &str)] = &[
    ("name", "TEXT"),
    ("uploaded_by", "TEXT"),
    ("uploaded_at", "TIMESTAMP"),
    ("vendas_fingerprint", "TEXT"),
    ("cotacoes_fingerprint", "TEXT"),
    ("produtos_cotados_fingerprint", "TEXT"),
];

const VENDAS_COLUMNS: &[(&str, &str)] = &[
    ("cod_cliente", "TEXT"),
    ("cliente", "TEXT"),
    ("material", "TEXT"),
    ("produto", "TEXT"),
    ("unidade_negocio", "TEXT"),
    ("canal_distribuicao", "TEXT"),
    ("hier_produto_1", "TEXT"),
    ("hier_produto_2", "TEXT"),
    ("hier_produto_3", "TEXT"),
    ("data", "DATE"),
    ("data_faturamento", "DATE"),
    ("qtd_entrada", "REAL"),
    ("vlr_entrada", "REAL"),
    ("qtd_carteira", "REAL"),
    ("vlr_carteira", "REAL"),
    ("qtd_rol", "REAL"),
    ("vlr_rol", "REAL"),
];

const COTACOES_COLUMNS: &[(&str, &str)] = &[
    ("numero_cotacao", "TEXT"),
    ("numero_revisao", "TEXT"),
    ("linhas_cotacao", "TEXT"),
    ("status_cotacao", "TEXT"),
    ("cod_cliente", "TEXT"),
    ("cliente", "TEXT"),
    ("data", "DATE"),
];

const PRODUTOS_COTADOS_COLUMNS: &[(&str, &str)] = &[
    ("cotacao", "TEXT"),
    ("cod_cliente", "TEXT"),
    ("cliente", "TEXT"),
    ("centro_fornecedor", "TEXT"),
    ("material", "TEXT"),
    ("descricao", "TEXT"),
    ("quantidade", "REAL"),
    ("preco_liquido_unitario", "REAL"),
    ("preco_liquido_total", "REAL"),
];

/// Bring the persisted schema up to the current canonical layout.
pub async fn migrate(pool: &SqlitePool) -> sqlx::Result<MigrationReport> {
    let mut report = MigrationReport::default();

    ensure_table(pool, "datasets", &create_datasets_sql(), &mut report).await?;
    ensure_table(
        pool,
        "vendas",
        &create_records_sql("vendas", VENDAS_COLUMNS),
        &mut report,
    )
    .await?;
    ensure_table(
        pool,
        "cotacoes",
        &create_records_sql("cotacoes", COTACOES_COLUMNS),
        &mut report,
    )
    .await?;
    ensure_table(
        pool,
        "produtos_cotados",
        &create_records_sql("produtos_cotados", PRODUTOS_COTADOS_COLUMNS),
        &mut report,
    )
    .await?;

    rebuild_legacy_cotacoes(pool, &mut report).await?;

    add_missing_columns(pool, "datasets", DATASETS_COLUMNS, &mut report).await?;
    add_missing_columns(pool, "vendas", VENDAS_COLUMNS, &mut report).await?;
    add_missing_columns(pool, "cotacoes", COTACOES_COLUMNS, &mut report).await?;
    add_missing_columns(pool, "produtos_cotados", PRODUTOS_COTADOS_COLUMNS, &mut report).await?;

    create_indexes(pool).await?;

    if report.is_noop() {
        info!("Schema already current, nothing to do");
    } else {
        info!(
            created = report.created_tables.len(),
            rebuilt = report.rebuilt_tables.len(),
            added_columns = report.added_columns.len(),
            "Schema synchronized"
        );
    }

    Ok(report)
}

fn create_datasets_sql() -> String {
    let cols: Vec<String> = DATASETS_COLUMNS
        .iter()
        .map(|(name, ty)| match *name {
            "name" => format!("{} {} NOT NULL", name, ty),
            "uploaded_at" => format!("{} {} DEFAULT CURRENT_TIMESTAMP", name, ty),
            _ => format!("{} {}", name, ty),
        })
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS datasets (\n            id INTEGER PRIMARY KEY AUTOINCREMENT,\n            {}\n        )",
        cols.join(",\n            ")
    )
}

fn create_records_sql(table: &str, columns: &[(&str, &str)]) -> String {
    let cols: Vec<String> = columns
        .iter()
        .map(|(name, ty)| format!("{} {}", name, ty))
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n            id INTEGER PRIMARY KEY AUTOINCREMENT,\n            dataset_id INTEGER,\n            {},\n            FOREIGN KEY (dataset_id) REFERENCES datasets (id)\n        )",
        table,
        cols.join(",\n            ")
    )
}

async fn table_exists(pool: &SqlitePool, table: &str) -> sqlx::Result<bool> {
    let row = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
        .bind(table)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Column names of an existing table, via PRAGMA introspection.
async fn table_columns(pool: &SqlitePool, table: &str) -> sqlx::Result<Vec<String>> {
    let rows = sqlx::query(&format!("PRAGMA table_info({})", table))
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(|r| r.get::<String, _>("name")).collect())
}

async fn ensure_table(
    pool: &SqlitePool,
    table: &str,
    create_sql: &str,
    report: &mut MigrationReport,
) -> sqlx::Result<()> {
    if !table_exists(pool, table).await? {
        report.created_tables.push(table.to_string());
    }
    sqlx::query(create_sql).execute(pool).await?;
    Ok(())
}

/// The pre-registry `cotacoes` table carried per-material rows
/// (`material`/`quantidade` columns). That layout cannot be patched column by
/// column; it is renamed aside and the table recreated in the current shape.
async fn rebuild_legacy_cotacoes(
    pool: &SqlitePool,
    report: &mut MigrationReport,
) -> sqlx::Result<()> {
    let columns = table_columns(pool, "cotacoes").await?;
    let legacy = columns.iter().any(|c| c == "material" || c == "quantidade");
    if !legacy {
        return Ok(());
    }

    info!("Legacy cotacoes layout detected, rebuilding (old data kept in cotacoes_backup)");

    sqlx::query("DROP TABLE IF EXISTS cotacoes_backup")
        .execute(pool)
        .await?;
    sqlx::query("ALTER TABLE cotacoes RENAME TO cotacoes_backup")
        .execute(pool)
        .await?;
    sqlx::query(&create_records_sql("cotacoes", COTACOES_COLUMNS))
        .execute(pool)
        .await?;

    report.rebuilt_tables.push("cotacoes".to_string());
    Ok(())
}

async fn add_missing_columns(
    pool: &SqlitePool,
    table: &str,
    expected: &[(&str, &str)],
    report: &mut MigrationReport,
) -> sqlx::Result<()> {
    let existing = table_columns(pool, table).await?;

    for (name, ty) in expected {
        if existing.iter().any(|c| c == name) {
            continue;
        }
        sqlx::query(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, name, ty))
            .execute(pool)
            .await?;
        info!("Added column {}.{}", table, name);
        report.added_columns.push(format!("{}.{}", table, name));
    }

    Ok(())
}

async fn create_indexes(pool: &SqlitePool) -> sqlx::Result<()> {
    for sql in [
        "CREATE INDEX IF NOT EXISTS idx_vendas_cliente_data ON vendas(cod_cliente, data)",
        "CREATE INDEX IF NOT EXISTS idx_vendas_material ON vendas(material)",
        "CREATE INDEX IF NOT EXISTS idx_cotacoes_cliente_data ON cotacoes(cod_cliente, data, numero_cotacao)",
        "CREATE INDEX IF NOT EXISTS idx_cotacoes_numero ON cotacoes(numero_cotacao)",
        "CREATE INDEX IF NOT EXISTS idx_produtos_cotados_cotacao ON produtos_cotados(cotacao)",
    ] {
        sqlx::query(sql).execute(pool).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_pool() -> SqlitePool {
        // One connection so the in-memory database is shared across queries.
        sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_migrate_creates_all_tables() {
        let pool = memory_pool().await;
        let report = migrate(&pool).await.unwrap();
        assert_eq!(
            report.created_tables,
            vec!["datasets", "vendas", "cotacoes", "produtos_cotados"]
        );
        assert!(report.rebuilt_tables.is_empty());
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let pool = memory_pool().await;
        migrate(&pool).await.unwrap();
        let second = migrate(&pool).await.unwrap();
        assert!(second.is_noop(), "second run changed schema: {:?}", second);
    }

    #[tokio::test]
    async fn test_existing_column_is_not_re_added() {
        let pool = memory_pool().await;
        migrate(&pool).await.unwrap();
        let report = migrate(&pool).await.unwrap();
        assert!(
            !report
                .added_columns
                .iter()
                .any(|c| c == "cotacoes.numero_revisao"),
            "numero_revisao already present, must not be re-added"
        );
    }

    #[tokio::test]
    async fn test_additive_migration_fills_missing_column() {
        let pool = memory_pool().await;
        // Simulate a database from before numero_revisao existed.
        sqlx::query(
            "CREATE TABLE cotacoes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                dataset_id INTEGER,
                numero_cotacao TEXT,
                linhas_cotacao TEXT,
                status_cotacao TEXT,
                cod_cliente TEXT,
                cliente TEXT,
                data DATE
            )",
        )
        .execute(&pool)
        .await
        .unwrap();

        let report = migrate(&pool).await.unwrap();
        assert!(report
            .added_columns
            .contains(&"cotacoes.numero_revisao".to_string()));

        let columns = table_columns(&pool, "cotacoes").await.unwrap();
        assert!(columns.contains(&"numero_revisao".to_string()));
    }

    #[tokio::test]
    async fn test_legacy_cotacoes_rebuilt_with_backup() {
        let pool = memory_pool().await;
        sqlx::query(
            "CREATE TABLE cotacoes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                dataset_id INTEGER,
                numero_cotacao TEXT,
                cod_cliente TEXT,
                cliente TEXT,
                material TEXT,
                data DATE,
                quantidade REAL
            )",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO cotacoes (numero_cotacao, cod_cliente, material) VALUES ('Q-1', 'CLI001', '100001')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let report = migrate(&pool).await.unwrap();
        assert_eq!(report.rebuilt_tables, vec!["cotacoes"]);

        // Old rows survive in the backup table.
        let backed_up: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cotacoes_backup")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(backed_up, 1);

        // New table has the current layout and no legacy columns.
        let columns = table_columns(&pool, "cotacoes").await.unwrap();
        assert!(columns.contains(&"numero_revisao".to_string()));
        assert!(!columns.contains(&"material".to_string()));

        // And a second run settles down.
        let second = migrate(&pool).await.unwrap();
        assert!(second.is_noop());
    }
}
