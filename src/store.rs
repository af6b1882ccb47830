//! SQLite persistence for datasets and their normalized record tables.
//!
//! The store owns no global state; callers hand it a pool and every write for
//! one upload happens inside a single transaction, so a failed insert never
//! leaves a half-written dataset behind.

use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::sqlite::SqliteArguments;
use sqlx::{query::Query, Sqlite, SqlitePool, Transaction};
use tracing::info;

use crate::columns::RecordKind;
use crate::table::{Cell, Table};

/// One record kind's contribution to an upload: its content fingerprint and
/// the normalized, validated rows to persist.
#[derive(Debug)]
pub struct DatasetPart {
    pub kind: RecordKind,
    pub fingerprint: String,
    pub table: Table,
}

/// A `datasets` registry row, as returned to API clients.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DatasetSummary {
    pub id: i64,
    pub name: String,
    pub uploaded_by: Option<String>,
    pub uploaded_at: NaiveDateTime,
    pub vendas_fingerprint: Option<String>,
    pub cotacoes_fingerprint: Option<String>,
    pub produtos_cotados_fingerprint: Option<String>,
}

/// Aggregate counts over the whole database.
#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub datasets: i64,
    pub vendas_rows: i64,
    pub cotacoes_rows: i64,
    pub produtos_cotados_rows: i64,
    /// Distinct content fingerprints across all three record kinds.
    pub distinct_fingerprints: i64,
    pub last_upload: Option<NaiveDateTime>,
    /// The newest registry rows, newest first.
    pub recent_datasets: Vec<DatasetSummary>,
}

/// How many registry rows `Statistics::recent_datasets` carries.
const RECENT_DATASETS: u32 = 5;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Most recent dataset sharing a fingerprint with any of `parts`, if one
    /// exists.
    ///
    /// This is a plain check-then-insert gate: two concurrent uploads of the
    /// same bytes can both pass it and both persist. Uploads are rare and
    /// human-driven, so the window is accepted rather than locked away.
    pub async fn find_duplicate(&self, parts: &[DatasetPart]) -> sqlx::Result<Option<i64>> {
        if parts.is_empty() {
            return Ok(None);
        }

        let clauses: Vec<String> = parts
            .iter()
            .map(|p| format!("{} = ?", p.kind.fingerprint_column()))
            .collect();
        let sql = format!(
            "SELECT id FROM datasets WHERE {} ORDER BY id DESC LIMIT 1",
            clauses.join(" OR ")
        );

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for part in parts {
            query = query.bind(&part.fingerprint);
        }
        query.fetch_optional(&self.pool).await
    }

    /// Persist one upload: registry row plus all record rows, atomically.
    /// Returns the new dataset id.
    pub async fn save_dataset(
        &self,
        name: &str,
        uploaded_by: Option<&str>,
        parts: &[DatasetPart],
    ) -> sqlx::Result<i64> {
        let fingerprint_for = |kind: RecordKind| {
            parts
                .iter()
                .find(|p| p.kind == kind)
                .map(|p| p.fingerprint.as_str())
        };

        let mut tx = self.pool.begin().await?;

        // uploaded_at is set explicitly: on a registry upgraded via ALTER TABLE
        // the column has no default (SQLite cannot add CURRENT_TIMESTAMP there).
        let result = sqlx::query(
            "INSERT INTO datasets
                (name, uploaded_by, uploaded_at, vendas_fingerprint, cotacoes_fingerprint, produtos_cotados_fingerprint)
             VALUES (?, ?, CURRENT_TIMESTAMP, ?, ?, ?)",
        )
        .bind(name)
        .bind(uploaded_by)
        .bind(fingerprint_for(RecordKind::Vendas))
        .bind(fingerprint_for(RecordKind::Cotacoes))
        .bind(fingerprint_for(RecordKind::ProdutosCotados))
        .execute(&mut *tx)
        .await?;

        let dataset_id = result.last_insert_rowid();

        for part in parts {
            let inserted = insert_rows(&mut tx, dataset_id, part.kind, &part.table).await?;
            info!(
                dataset_id,
                kind = part.kind.table_name(),
                rows = inserted,
                "Persisted records"
            );
        }

        tx.commit().await?;
        Ok(dataset_id)
    }

    /// All registry rows, newest first.
    pub async fn list_datasets(&self) -> sqlx::Result<Vec<DatasetSummary>> {
        sqlx::query_as(
            "SELECT id, name, uploaded_by, uploaded_at,
                    vendas_fingerprint, cotacoes_fingerprint, produtos_cotados_fingerprint
             FROM datasets ORDER BY id DESC",
        )
        .fetch_all(&self.pool)
        .await
    }

    /// The most recently uploaded dataset, if any.
    pub async fn latest_dataset(&self) -> sqlx::Result<Option<DatasetSummary>> {
        sqlx::query_as(
            "SELECT id, name, uploaded_by, uploaded_at,
                    vendas_fingerprint, cotacoes_fingerprint, produtos_cotados_fingerprint
             FROM datasets ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn statistics(&self) -> sqlx::Result<Statistics> {
        let datasets = self.count("datasets").await?;
        let vendas_rows = self.count("vendas").await?;
        let cotacoes_rows = self.count("cotacoes").await?;
        let produtos_cotados_rows = self.count("produtos_cotados").await?;

        // UNION deduplicates, so a fingerprint shared across kinds counts once.
        let distinct_fingerprints = sqlx::query_scalar(
            "SELECT COUNT(*) FROM (
                SELECT vendas_fingerprint AS fp FROM datasets WHERE vendas_fingerprint IS NOT NULL
                UNION
                SELECT cotacoes_fingerprint FROM datasets WHERE cotacoes_fingerprint IS NOT NULL
                UNION
                SELECT produtos_cotados_fingerprint FROM datasets WHERE produtos_cotados_fingerprint IS NOT NULL
            )",
        )
        .fetch_one(&self.pool)
        .await?;

        let last_upload =
            sqlx::query_scalar("SELECT MAX(uploaded_at) FROM datasets")
                .fetch_one(&self.pool)
                .await?;

        let recent_datasets = sqlx::query_as(
            "SELECT id, name, uploaded_by, uploaded_at,
                    vendas_fingerprint, cotacoes_fingerprint, produtos_cotados_fingerprint
             FROM datasets ORDER BY id DESC LIMIT ?",
        )
        .bind(RECENT_DATASETS)
        .fetch_all(&self.pool)
        .await?;

        Ok(Statistics {
            datasets,
            vendas_rows,
            cotacoes_rows,
            produtos_cotados_rows,
            distinct_fingerprints,
            last_upload,
            recent_datasets,
        })
    }

    /// Delete registry rows that carry no fingerprint at all, plus any record
    /// rows still pointing at them. These only exist in databases written
    /// before fingerprints were recorded for every upload.
    pub async fn prune_orphans(&self) -> sqlx::Result<u64> {
        const ORPHAN: &str = "vendas_fingerprint IS NULL
             AND cotacoes_fingerprint IS NULL
             AND produtos_cotados_fingerprint IS NULL";

        let mut tx = self.pool.begin().await?;

        for table in ["vendas", "cotacoes", "produtos_cotados"] {
            sqlx::query(&format!(
                "DELETE FROM {} WHERE dataset_id IN (SELECT id FROM datasets WHERE {})",
                table, ORPHAN
            ))
            .execute(&mut *tx)
            .await?;
        }

        let result = sqlx::query(&format!("DELETE FROM datasets WHERE {}", ORPHAN))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let pruned = result.rows_affected();
        if pruned > 0 {
            info!(pruned, "Removed orphan datasets");
        }
        Ok(pruned)
    }

    async fn count(&self, table: &str) -> sqlx::Result<i64> {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await
    }
}

/// Insert a normalized table's rows for one kind. Only canonical columns are
/// bound; anything else the table still carries is ignored.
async fn insert_rows(
    tx: &mut Transaction<'_, Sqlite>,
    dataset_id: i64,
    kind: RecordKind,
    table: &Table,
) -> sqlx::Result<u64> {
    let present: Vec<(usize, &str)> = kind
        .canonical_columns()
        .iter()
        .filter_map(|c| table.column_index(c).map(|i| (i, *c)))
        .collect();

    if present.is_empty() || table.is_empty() {
        return Ok(0);
    }

    let names: Vec<&str> = present.iter().map(|(_, c)| *c).collect();
    let placeholders = vec!["?"; present.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} (dataset_id, {}) VALUES (?, {})",
        kind.table_name(),
        names.join(", "),
        placeholders
    );

    let mut inserted = 0u64;
    for row in &table.rows {
        let mut query = sqlx::query(&sql).bind(dataset_id);
        for (idx, _) in &present {
            query = bind_cell(query, &row[*idx]);
        }
        query.execute(&mut **tx).await?;
        inserted += 1;
    }
    Ok(inserted)
}

fn bind_cell<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    cell: &'q Cell,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match cell {
        Cell::Null => query.bind(None::<String>),
        Cell::Text(s) => query.bind(s.as_str()),
        Cell::Number(n) => query.bind(*n),
        // An unparsable date normalized to the empty marker is stored as NULL.
        Cell::Date(s) if s.is_empty() => query.bind(None::<String>),
        Cell::Date(s) => query.bind(s.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_store() -> Store {
        // One connection so the in-memory database is shared across queries.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap();
        migrate(&pool).await.unwrap();
        Store::new(pool)
    }

    fn vendas_part(fingerprint: &str) -> DatasetPart {
        let table = Table {
            columns: vec!["cod_cliente".into(), "material".into(), "vlr_rol".into()],
            rows: vec![
                vec![
                    Cell::Text("CLI001".into()),
                    Cell::Text("100001".into()),
                    Cell::Number(1500.5),
                ],
                vec![
                    Cell::Text("CLI002".into()),
                    Cell::Text("100002".into()),
                    Cell::Null,
                ],
            ],
        };
        DatasetPart {
            kind: RecordKind::Vendas,
            fingerprint: fingerprint.to_string(),
            table,
        }
    }

    #[tokio::test]
    async fn test_save_and_read_back() {
        let store = test_store().await;
        let parts = vec![vendas_part("fp-1")];
        let id = store
            .save_dataset("Agosto 2026", Some("ana"), &parts)
            .await
            .unwrap();

        let latest = store.latest_dataset().await.unwrap().unwrap();
        assert_eq!(latest.id, id);
        assert_eq!(latest.name, "Agosto 2026");
        assert_eq!(latest.uploaded_by.as_deref(), Some("ana"));
        assert_eq!(latest.vendas_fingerprint.as_deref(), Some("fp-1"));
        assert!(latest.cotacoes_fingerprint.is_none());

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vendas WHERE dataset_id = ?")
            .bind(id)
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(rows, 2);
    }

    #[tokio::test]
    async fn test_cell_types_round_trip() {
        let store = test_store().await;
        let id = store
            .save_dataset("types", None, &[vendas_part("fp-t")])
            .await
            .unwrap();

        let (vlr, null_vlr): (f64, Option<f64>) = {
            let a = sqlx::query_scalar(
                "SELECT vlr_rol FROM vendas WHERE dataset_id = ? AND cod_cliente = 'CLI001'",
            )
            .bind(id)
            .fetch_one(&store.pool)
            .await
            .unwrap();
            let b = sqlx::query_scalar(
                "SELECT vlr_rol FROM vendas WHERE dataset_id = ? AND cod_cliente = 'CLI002'",
            )
            .bind(id)
            .fetch_one(&store.pool)
            .await
            .unwrap();
            (a, b)
        };
        assert_eq!(vlr, 1500.5);
        assert_eq!(null_vlr, None);
    }

    #[tokio::test]
    async fn test_find_duplicate_matches_same_fingerprint() {
        let store = test_store().await;
        let parts = vec![vendas_part("fp-dup")];
        let id = store.save_dataset("first", None, &parts).await.unwrap();

        assert_eq!(store.find_duplicate(&parts).await.unwrap(), Some(id));
        assert_eq!(
            store
                .find_duplicate(&[vendas_part("fp-other")])
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_find_duplicate_crosses_kinds_independently() {
        let store = test_store().await;
        store
            .save_dataset("first", None, &[vendas_part("fp-v")])
            .await
            .unwrap();

        // A cotacoes upload with an unrelated fingerprint is not a duplicate,
        // even though a vendas fingerprint exists.
        let cotacoes = DatasetPart {
            kind: RecordKind::Cotacoes,
            fingerprint: "fp-c".to_string(),
            table: Table::new(vec!["numero_cotacao".into(), "cod_cliente".into()]),
        };
        assert_eq!(store.find_duplicate(&[cotacoes]).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_datasets_newest_first() {
        let store = test_store().await;
        store
            .save_dataset("first", None, &[vendas_part("fp-1")])
            .await
            .unwrap();
        let second = store
            .save_dataset("second", None, &[vendas_part("fp-2")])
            .await
            .unwrap();

        let all = store.list_datasets().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second);
    }

    #[tokio::test]
    async fn test_prune_orphans_removes_fingerprintless_datasets() {
        let store = test_store().await;
        let kept = store
            .save_dataset("real", None, &[vendas_part("fp-keep")])
            .await
            .unwrap();

        // An old-style registry row with no fingerprints and a stray child row.
        sqlx::query("INSERT INTO datasets (name) VALUES ('pre-fingerprint upload')")
            .execute(&store.pool)
            .await
            .unwrap();
        let orphan_id: i64 = sqlx::query_scalar("SELECT MAX(id) FROM datasets")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO vendas (dataset_id, cod_cliente, material) VALUES (?, 'C', 'M')")
            .bind(orphan_id)
            .execute(&store.pool)
            .await
            .unwrap();

        let pruned = store.prune_orphans().await.unwrap();
        assert_eq!(pruned, 1);

        let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM datasets")
            .fetch_all(&store.pool)
            .await
            .unwrap();
        assert_eq!(ids, vec![kept]);

        let stray: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vendas WHERE dataset_id = ?")
            .bind(orphan_id)
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(stray, 0);
    }

    #[tokio::test]
    async fn test_statistics_counts() {
        let store = test_store().await;
        store
            .save_dataset("s", Some("ana"), &[vendas_part("fp-s")])
            .await
            .unwrap();
        store
            .save_dataset("t", None, &[vendas_part("fp-t")])
            .await
            .unwrap();

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.datasets, 2);
        assert_eq!(stats.vendas_rows, 4);
        assert_eq!(stats.cotacoes_rows, 0);
        assert_eq!(stats.distinct_fingerprints, 2);
        assert!(stats.last_upload.is_some());
        assert_eq!(stats.recent_datasets.len(), 2);
        assert_eq!(stats.recent_datasets[0].name, "t");
    }

    #[tokio::test]
    async fn test_upgraded_registry_records_upload_time() {
        // A registry from before uploaded_at existed: the column arrives via
        // ALTER TABLE, which cannot carry a CURRENT_TIMESTAMP default, so the
        // INSERT must set it itself.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE datasets (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let report = migrate(&pool).await.unwrap();
        assert!(report
            .added_columns
            .contains(&"datasets.uploaded_at".to_string()));

        let store = Store::new(pool);
        let id = store
            .save_dataset("post-upgrade", None, &[vendas_part("fp-u")])
            .await
            .unwrap();

        let latest = store.latest_dataset().await.unwrap().unwrap();
        assert_eq!(latest.id, id);

        let raw: Option<String> =
            sqlx::query_scalar("SELECT uploaded_at FROM datasets WHERE id = ?")
                .bind(id)
                .fetch_one(&store.pool)
                .await
                .unwrap();
        assert!(raw.is_some(), "uploaded_at must never be stored as NULL");
    }
}
