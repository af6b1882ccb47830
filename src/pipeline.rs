//! Upload orchestration: decode, classify, reconcile, normalize, validate,
//! deduplicate, persist.
//!
//! One call to [`Ingestor::ingest`] handles one upload of one or more files.
//! Files of the same kind are merged in arrival order; the whole upload either
//! becomes one new dataset or is reported as a duplicate of an existing one.

use serde::Serialize;
use tracing::info;

use crate::columns::{detect_kind, reconcile, RecordKind};
use crate::error::IngestError;
use crate::fingerprint::fingerprint_many;
use crate::normalize::normalize;
use crate::sheet::read_table;
use crate::store::{DatasetPart, Store};
use crate::table::Table;
use crate::validate::filter_valid;

/// One file out of a multipart upload.
pub struct UploadFile {
    pub filename: String,
    pub data: Vec<u8>,
}

/// Per-file note in the ingest response.
#[derive(Debug, Serialize)]
pub struct FileReport {
    pub filename: String,
    pub kind: &'static str,
    /// Rows that survived validation, before merging with sibling files.
    pub rows_kept: usize,
}

/// What one upload produced.
#[derive(Debug, Serialize)]
pub struct IngestOutcome {
    pub dataset_id: i64,
    /// True when the upload's content matched an already-stored dataset;
    /// `dataset_id` then points at that dataset and the row counts are zero.
    pub duplicate: bool,
    pub vendas_rows: usize,
    pub cotacoes_rows: usize,
    pub produtos_cotados_rows: usize,
    pub files: Vec<FileReport>,
}

pub struct Ingestor {
    store: Store,
}

impl Ingestor {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Run the full pipeline for one upload.
    pub async fn ingest(
        &self,
        name: &str,
        uploaded_by: Option<&str>,
        files: &[UploadFile],
    ) -> Result<IngestOutcome, IngestError> {
        if files.is_empty() {
            return Err(IngestError::NoFiles);
        }

        // (kind, raw byte parts in arrival order, merged processed table)
        let mut groups: Vec<(RecordKind, Vec<&[u8]>, Table)> = Vec::new();
        let mut reports = Vec::new();

        for file in files {
            let raw = read_table(&file.filename, &file.data).map_err(|source| {
                IngestError::UnreadableFile {
                    filename: file.filename.clone(),
                    source,
                }
            })?;
            if raw.is_empty() {
                return Err(IngestError::EmptyFile(file.filename.clone()));
            }

            let kind = detect_kind(&file.filename, &raw)
                .ok_or_else(|| IngestError::UnknownFileType(file.filename.clone()))?;

            let reconciled = reconcile(kind, &raw);
            let normalized = normalize(kind, &reconciled);
            let valid = filter_valid(kind, &normalized);

            info!(
                filename = %file.filename,
                kind = kind.table_name(),
                rows_read = raw.row_count(),
                rows_kept = valid.row_count(),
                "Processed file"
            );
            reports.push(FileReport {
                filename: file.filename.clone(),
                kind: kind.table_name(),
                rows_kept: valid.row_count(),
            });

            match groups.iter_mut().find(|(k, _, _)| *k == kind) {
                Some((_, parts, merged)) => {
                    parts.push(&file.data);
                    merged.append(&valid);
                }
                None => groups.push((kind, vec![&file.data], valid)),
            }
        }

        let parts: Vec<DatasetPart> = groups
            .into_iter()
            .map(|(kind, raw_parts, table)| DatasetPart {
                kind,
                fingerprint: fingerprint_many(raw_parts),
                table,
            })
            .collect();

        if let Some(existing) = self.store.find_duplicate(&parts).await? {
            info!(dataset_id = existing, "Upload matches an existing dataset, skipping");
            return Ok(IngestOutcome {
                dataset_id: existing,
                duplicate: true,
                vendas_rows: 0,
                cotacoes_rows: 0,
                produtos_cotados_rows: 0,
                files: reports,
            });
        }

        let rows_of = |kind: RecordKind| {
            parts
                .iter()
                .find(|p| p.kind == kind)
                .map_or(0, |p| p.table.row_count())
        };
        let (vendas_rows, cotacoes_rows, produtos_cotados_rows) = (
            rows_of(RecordKind::Vendas),
            rows_of(RecordKind::Cotacoes),
            rows_of(RecordKind::ProdutosCotados),
        );

        let dataset_id = self.store.save_dataset(name, uploaded_by, &parts).await?;
        info!(dataset_id, name, "Dataset ingested");

        Ok(IngestOutcome {
            dataset_id,
            duplicate: false,
            vendas_rows,
            cotacoes_rows,
            produtos_cotados_rows,
            files: reports,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_ingestor() -> Ingestor {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap();
        migrate(&pool).await.unwrap();
        Ingestor::new(Store::new(pool))
    }

    fn file(name: &str, data: &[u8]) -> UploadFile {
        UploadFile {
            filename: name.to_string(),
            data: data.to_vec(),
        }
    }

    const VENDAS_CSV: &[u8] =
        b"Cod. Cliente,Material,Vlr. ROL\nCLI001,100001,1500.50\nCLI002,100002,200\n";

    #[tokio::test]
    async fn test_ingest_vendas_csv() {
        let ingestor = test_ingestor().await;
        let outcome = ingestor
            .ingest("Agosto", Some("ana"), &[file("vendas_08.csv", VENDAS_CSV)])
            .await
            .unwrap();

        assert!(!outcome.duplicate);
        assert_eq!(outcome.vendas_rows, 2);
        assert_eq!(outcome.cotacoes_rows, 0);
        assert_eq!(outcome.files.len(), 1);
        assert_eq!(outcome.files[0].kind, "vendas");
        assert_eq!(outcome.files[0].rows_kept, 2);
    }

    #[tokio::test]
    async fn test_identical_reupload_is_a_duplicate() {
        let ingestor = test_ingestor().await;
        let first = ingestor
            .ingest("v1", None, &[file("vendas.csv", VENDAS_CSV)])
            .await
            .unwrap();
        let second = ingestor
            .ingest("v2", None, &[file("renamed_vendas.csv", VENDAS_CSV)])
            .await
            .unwrap();

        assert!(second.duplicate);
        assert_eq!(second.dataset_id, first.dataset_id);
        assert_eq!(second.vendas_rows, 0);
    }

    #[tokio::test]
    async fn test_single_byte_change_is_a_new_dataset() {
        let ingestor = test_ingestor().await;
        let first = ingestor
            .ingest("v1", None, &[file("vendas.csv", VENDAS_CSV)])
            .await
            .unwrap();

        let changed =
            b"Cod. Cliente,Material,Vlr. ROL\nCLI001,100001,1500.50\nCLI002,100002,201\n";
        let second = ingestor
            .ingest("v2", None, &[file("vendas.csv", changed)])
            .await
            .unwrap();

        assert!(!second.duplicate);
        assert_ne!(second.dataset_id, first.dataset_id);
    }

    #[tokio::test]
    async fn test_multiple_files_of_same_kind_are_merged() {
        let ingestor = test_ingestor().await;
        let part1 = b"Cod. Cliente,Material\nCLI001,100001\n";
        let part2 = b"Cod. Cliente,Material\nCLI002,100002\nCLI003,100003\n";
        let outcome = ingestor
            .ingest(
                "split",
                None,
                &[file("vendas_a.csv", part1), file("vendas_b.csv", part2)],
            )
            .await
            .unwrap();

        assert_eq!(outcome.vendas_rows, 3);
        assert_eq!(outcome.files.len(), 2);
    }

    #[tokio::test]
    async fn test_mixed_kinds_in_one_upload() {
        let ingestor = test_ingestor().await;
        let cotacoes = b"Numero da Cotacao,Cod. Cliente\nQ-1,CLI001\n";
        let outcome = ingestor
            .ingest(
                "mixed",
                None,
                &[
                    file("vendas.csv", VENDAS_CSV),
                    file("cotacoes.csv", cotacoes),
                ],
            )
            .await
            .unwrap();

        assert_eq!(outcome.vendas_rows, 2);
        assert_eq!(outcome.cotacoes_rows, 1);
    }

    #[tokio::test]
    async fn test_unrecognized_file_is_rejected() {
        let ingestor = test_ingestor().await;
        let err = ingestor
            .ingest("x", None, &[file("export.csv", b"a,b\n1,2\n")])
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::UnknownFileType(_)));
    }

    #[tokio::test]
    async fn test_empty_upload_is_rejected() {
        let ingestor = test_ingestor().await;
        let err = ingestor.ingest("x", None, &[]).await.unwrap_err();
        assert!(matches!(err, IngestError::NoFiles));
    }

    #[tokio::test]
    async fn test_header_only_file_is_rejected() {
        let ingestor = test_ingestor().await;
        let err = ingestor
            .ingest("x", None, &[file("vendas.csv", b"Cod. Cliente,Material\n")])
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::EmptyFile(_)));
    }

    #[tokio::test]
    async fn test_outcome_serializes_for_the_api() {
        let ingestor = test_ingestor().await;
        let outcome = ingestor
            .ingest("Agosto", None, &[file("vendas.csv", VENDAS_CSV)])
            .await
            .unwrap();

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["duplicate"], false);
        assert_eq!(json["vendas_rows"], 2);
        assert_eq!(json["files"][0]["kind"], "vendas");
    }

    #[tokio::test]
    async fn test_all_invalid_rows_still_record_fingerprint() {
        // Every row lacks required fields, so zero rows persist, but the
        // fingerprint is stored and a byte-identical re-upload is a duplicate.
        let ingestor = test_ingestor().await;
        let junk = b"Cod. Cliente,Material\n,\nNone,none\n";
        let first = ingestor
            .ingest("junk", None, &[file("vendas.csv", junk)])
            .await
            .unwrap();
        assert!(!first.duplicate);
        assert_eq!(first.vendas_rows, 0);

        let second = ingestor
            .ingest("junk again", None, &[file("vendas.csv", junk)])
            .await
            .unwrap();
        assert!(second.duplicate);
        assert_eq!(second.dataset_id, first.dataset_id);
    }
}
