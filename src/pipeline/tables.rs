//! Table Extraction Stage.
//!
//! Each table element becomes a rectangular grid of strings: positions no
//! cell covers are empty, and a merged cell's text is repeated over every
//! position it spans. A table whose cells cannot form such a grid is recorded
//! as a [`StageError::TableConversion`] and skipped. Its index stays
//! reserved, so table `n` is always the `n`-th table of the document.

use crate::config::ProcessingConfig;
use crate::document::{DecodedDocument, TableElement};
use crate::error::StageError;
use crate::output::{ArtifactId, ArtifactKind, ArtifactResult, Stage};
use crate::pipeline::writer::{ArtifactPayload, ArtifactWriter};
use tracing::{debug, warn};

/// Extract every table in document order.
///
/// Returns one result per table element, position `i` holding table `i + 1`.
/// Returns an empty list when table-structure recognition is disabled.
pub async fn extract_tables(
    doc: &DecodedDocument,
    writer: &ArtifactWriter,
    config: &ProcessingConfig,
) -> Vec<ArtifactResult> {
    if !config.do_table_structure {
        debug!("Table extraction disabled");
        return Vec::new();
    }

    let tables: Vec<&TableElement> = doc.tables().collect();
    if let Some(ref cb) = config.progress_callback {
        cb.on_stage_start(Stage::Tables, tables.len());
    }

    let mut results = Vec::with_capacity(tables.len());
    for (i, table) in tables.into_iter().enumerate() {
        let index = i + 1;
        let result = if config.cancellation.is_cancelled() {
            Err(StageError::Cancelled {
                kind: ArtifactKind::Table,
                index,
                stage: Stage::Tables,
            })
        } else {
            extract_one(table, index, writer).await
        };

        if let Some(ref cb) = config.progress_callback {
            match &result {
                Ok(artifact) => cb.on_artifact_complete(artifact.id, &artifact.token),
                Err(e) => cb.on_artifact_error(ArtifactId::table(index), e),
            }
        }
        results.push(result);
    }
    results
}

async fn extract_one(table: &TableElement, index: usize, writer: &ArtifactWriter) -> ArtifactResult {
    let grid = to_grid(table).map_err(|detail| {
        warn!("Table {}: {}", index, detail);
        StageError::TableConversion { index, detail }
    })?;

    writer
        .write(index, ArtifactPayload::Table(&grid))
        .await
        .map_err(|e| StageError::ArtifactWrite {
            kind: ArtifactKind::Table,
            index,
            path: writer.path_for(ArtifactId::table(index)),
            detail: e.to_string(),
        })
}

/// Largest grid, in positions, a single table may declare.
pub const MAX_GRID_CELLS: usize = 1_000_000;

/// Convert a table element to a `num_rows × num_cols` grid.
pub fn to_grid(table: &TableElement) -> Result<Vec<Vec<String>>, String> {
    let (rows, cols) = (table.num_rows, table.num_cols);
    if rows == 0 || cols == 0 {
        return Err(format!("empty grid ({rows}x{cols})"));
    }
    match rows.checked_mul(cols) {
        Some(n) if n <= MAX_GRID_CELLS => {}
        _ => {
            return Err(format!(
                "declared grid {rows}x{cols} exceeds {MAX_GRID_CELLS} positions"
            ))
        }
    }

    let mut grid: Vec<Vec<Option<&str>>> = vec![vec![None; cols]; rows];

    for cell in &table.cells {
        if cell.row_span == 0 || cell.col_span == 0 {
            return Err(format!(
                "cell at ({}, {}) has zero span",
                cell.row, cell.col
            ));
        }
        let row_end = cell.row.saturating_add(cell.row_span);
        let col_end = cell.col.saturating_add(cell.col_span);
        if row_end > rows || col_end > cols {
            return Err(format!(
                "cell at ({}, {}) spanning {}x{} exceeds {}x{} grid",
                cell.row, cell.col, cell.row_span, cell.col_span, rows, cols
            ));
        }
        for row in &mut grid[cell.row..row_end] {
            for slot in &mut row[cell.col..col_end] {
                if slot.is_some() {
                    return Err(format!(
                        "cell at ({}, {}) overlaps another cell",
                        cell.row, cell.col
                    ));
                }
                *slot = Some(cell.text.as_str());
            }
        }
    }

    Ok(grid
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|slot| slot.unwrap_or_default().to_string())
                .collect()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocElement, TableCell};
    use crate::pipeline::writer::OutputScope;
    use tempfile::TempDir;

    fn table(rows: usize, cols: usize, cells: Vec<TableCell>) -> TableElement {
        TableElement {
            num_rows: rows,
            num_cols: cols,
            cells,
            ..Default::default()
        }
    }

    #[test]
    fn missing_cells_are_empty() {
        let t = table(2, 2, vec![TableCell::new("a", 0, 0), TableCell::new("d", 1, 1)]);
        assert_eq!(
            to_grid(&t).unwrap(),
            vec![vec!["a".to_string(), String::new()], vec![String::new(), "d".to_string()]]
        );
    }

    #[test]
    fn spans_are_duplicated() {
        let t = table(
            2,
            3,
            vec![
                TableCell::new("Region", 0, 0).with_span(2, 1),
                TableCell::new("Totals", 0, 1).with_span(1, 2),
                TableCell::new("Q1", 1, 1),
                TableCell::new("Q2", 1, 2),
            ],
        );
        assert_eq!(
            to_grid(&t).unwrap(),
            vec![
                vec!["Region", "Totals", "Totals"],
                vec!["Region", "Q1", "Q2"],
            ]
        );
    }

    #[test]
    fn malformed_grids_are_rejected() {
        assert!(to_grid(&table(0, 3, vec![])).is_err());
        assert!(to_grid(&table(1, 1, vec![TableCell::new("x", 0, 1)])).is_err());
        assert!(to_grid(&table(2, 2, vec![TableCell::new("x", 0, 0).with_span(0, 1)])).is_err());
        let overlap = table(
            2,
            2,
            vec![
                TableCell::new("a", 0, 0).with_span(1, 2),
                TableCell::new("b", 0, 1),
            ],
        );
        assert!(to_grid(&overlap).unwrap_err().contains("overlaps"));
    }

    #[test]
    fn oversized_declared_grid_is_rejected() {
        let huge = table(1, 1 << 40, vec![TableCell::new("x", 0, 0)]);
        assert!(to_grid(&huge).unwrap_err().contains("exceeds"));

        let overflow = table(usize::MAX, 2, vec![]);
        assert!(to_grid(&overflow).is_err());

        let far_span = table(2, 2, vec![TableCell::new("x", 1, 1).with_span(usize::MAX, 1)]);
        assert!(to_grid(&far_span).unwrap_err().contains("exceeds 2x2"));
    }

    fn doc_with(tables: Vec<TableElement>) -> DecodedDocument {
        DecodedDocument {
            name: "doc".into(),
            pages: vec![],
            elements: tables.into_iter().map(DocElement::Table).collect(),
        }
    }

    #[tokio::test]
    async fn failed_table_keeps_its_index() {
        let tmp = TempDir::new().unwrap();
        let writer = ArtifactWriter::new(OutputScope::create(tmp.path(), "doc", Some("pdf")).unwrap());
        let good = || table(1, 1, vec![TableCell::new("ok", 0, 0)]);
        let doc = doc_with(vec![good(), table(0, 0, vec![]), good()]);

        let results = extract_tables(&doc, &writer, &ProcessingConfig::default()).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().token, "doc-table-1.csv");
        assert!(matches!(results[1], Err(StageError::TableConversion { index: 2, .. })));
        assert_eq!(results[2].as_ref().unwrap().token, "doc-table-3.csv");
        assert!(!writer.path_for(ArtifactId::table(2)).exists());
    }

    #[tokio::test]
    async fn disabled_stage_yields_nothing() {
        let tmp = TempDir::new().unwrap();
        let writer = ArtifactWriter::new(OutputScope::create(tmp.path(), "doc", None).unwrap());
        let doc = doc_with(vec![table(1, 1, vec![TableCell::new("x", 0, 0)])]);
        let config = ProcessingConfig::builder()
            .do_table_structure(false)
            .build()
            .unwrap();
        assert!(extract_tables(&doc, &writer, &config).await.is_empty());
    }
}
