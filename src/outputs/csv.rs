//! The indicator table as CSV.

use crate::aggregate::IndicatorTable;
use crate::error::PipelineError;
use std::path::Path;
use tokio::fs;
use tracing::{error, info, instrument};

/// Render the table with a `date,country,<metric>...` header.
pub fn to_csv(table: &IndicatorTable) -> Result<Vec<u8>, ::csv::Error> {
    let mut writer = ::csv::WriterBuilder::new()
        .terminator(::csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    let header = ["date", "country"]
        .into_iter()
        .chain(table.metrics.iter().map(String::as_str));
    writer.write_record(header)?;

    for row in &table.rows {
        let values = row.values.iter().map(u8::to_string);
        writer.write_record([row.date.clone(), row.country.clone()].into_iter().chain(values))?;
    }

    writer.into_inner().map_err(|e| e.into_error().into())
}

#[instrument(level = "info", skip_all, fields(path = %path.display(), rows = table.rows.len()))]
pub async fn write_table(table: &IndicatorTable, path: &Path) -> Result<(), PipelineError> {
    let fail = |reason: String| PipelineError::Output {
        path: path.display().to_string(),
        reason,
    };

    if let Some(dir) = path.parent() {
        if let Err(e) = fs::create_dir_all(dir).await {
            error!(dir = %dir.display(), error = %e, "Failed to create CSV dir");
            return Err(fail(e.to_string()));
        }
    }

    let bytes = to_csv(table).map_err(|e| fail(e.to_string()))?;
    fs::write(path, bytes)
        .await
        .map_err(|e| fail(e.to_string()))?;
    info!("Wrote indicator CSV");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::IndicatorRow;

    fn table() -> IndicatorTable {
        IndicatorTable {
            metrics: vec!["disaster".to_string(), "conflict".to_string()],
            rows: vec![
                IndicatorRow {
                    date: "03-2021".to_string(),
                    country: "Kenya".to_string(),
                    values: vec![1, 0],
                },
                IndicatorRow {
                    date: "03-2021".to_string(),
                    country: "Congo, Dem. Rep.".to_string(),
                    values: vec![0, 1],
                },
            ],
        }
    }

    #[test]
    fn test_csv_layout() {
        let csv = String::from_utf8(to_csv(&table()).unwrap()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "date,country,disaster,conflict");
        assert_eq!(lines[1], "03-2021,Kenya,1,0");
        assert_eq!(lines[2], "03-2021,\"Congo, Dem. Rep.\",0,1");
    }

    #[tokio::test]
    async fn test_write_table_creates_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("csv/risk_indicators_test.csv");
        write_table(&table(), &path).await.unwrap();
        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(written.starts_with("date,country,disaster,conflict\n"));
    }
}
