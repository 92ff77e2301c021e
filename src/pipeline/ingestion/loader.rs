use csv::{ReaderBuilder, StringRecord, Trim};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

use crate::domain::{AdminKey, RawRecord, SourceId, SourceTable};
use crate::error::{FusionError, Result};
use crate::pipeline::ingestion::schema::{ColumnRole, ColumnType, SourceSchema};

/// Cell texts read as "not measured" in a numeric column, matching the
/// markers the Atlas exports use for missing values.
const NULL_MARKERS: &[&str] = &["", "na", "nan", "null", "none"];

/// A source table together with facts about the snapshot it came from.
#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub table: SourceTable,
    pub path: PathBuf,
    /// Data rows read from the file, before any reduction.
    pub row_count: usize,
    /// Hex SHA-256 of the file bytes.
    pub fingerprint: String,
}

/// Resolved header position for each declared column present in the file.
struct ColumnIndex {
    country: usize,
    region: usize,
    sub_region: usize,
    value: usize,
    dimensions: Vec<(&'static str, usize)>,
}

/// Reads raw CSV snapshots into validated `SourceTable`s.
pub struct DatasetLoader;

impl DatasetLoader {
    /// Read and validate the file at `path` against `schema`.
    #[instrument(skip(schema), fields(source = %schema.source))]
    pub fn load_file(schema: &SourceSchema, path: &Path) -> Result<LoadedSource> {
        let bytes = fs::read(path).map_err(|e| FusionError::io(path.display().to_string(), e))?;
        let fingerprint = hex::encode(Sha256::digest(&bytes));
        let table = Self::load_reader(schema, bytes.as_slice(), &path.display().to_string())?;
        let row_count = table.len();
        info!(
            source = %schema.source,
            rows = row_count,
            path = %path.display(),
            "Loaded source"
        );
        Ok(LoadedSource {
            table,
            path: path.to_path_buf(),
            row_count,
            fingerprint,
        })
    }

    /// Parse CSV from any reader. `origin` is only used in diagnostics.
    pub fn load_reader<R: Read>(schema: &SourceSchema, reader: R, origin: &str) -> Result<SourceTable> {
        let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
        let headers = rdr.headers().map_err(|e| FusionError::csv(origin, e))?.clone();
        let index = Self::resolve_columns(schema, &headers)?;

        let dimension_columns: BTreeSet<String> =
            index.dimensions.iter().map(|(name, _)| name.to_string()).collect();

        let mut rows = Vec::new();
        for result in rdr.records() {
            let record = result.map_err(|e| FusionError::csv(origin, e))?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            rows.push(Self::parse_row(schema.source, &index, &record, line)?);
        }

        debug!(source = %schema.source, rows = rows.len(), "Parsed rows from {}", origin);
        Ok(SourceTable::new(schema.source, dimension_columns, rows))
    }

    fn resolve_columns(schema: &SourceSchema, headers: &StringRecord) -> Result<ColumnIndex> {
        let mut positions: BTreeMap<&'static str, usize> = BTreeMap::new();
        for spec in &schema.columns {
            let matches: Vec<usize> = headers
                .iter()
                .enumerate()
                .filter(|(_, h)| spec.matches(h))
                .map(|(i, _)| i)
                .collect();
            match matches.as_slice() {
                [] if spec.required => {
                    return Err(FusionError::Schema {
                        source_id: schema.source,
                        column: spec.name.to_string(),
                        message: format!(
                            "required column is missing; available columns: [{}]",
                            headers.iter().collect::<Vec<_>>().join(", ")
                        ),
                    });
                }
                [] => {}
                [single] => {
                    positions.insert(spec.name, *single);
                }
                _ => {
                    return Err(FusionError::Schema {
                        source_id: schema.source,
                        column: spec.name.to_string(),
                        message: format!("column is ambiguous, {} headers match it", matches.len()),
                    });
                }
            }
        }

        let position_of = |role: ColumnRole| -> Result<usize> {
            schema
                .columns
                .iter()
                .find(|c| c.role == role)
                .and_then(|c| positions.get(c.name).copied())
                .ok_or_else(|| FusionError::Schema {
                    source_id: schema.source,
                    column: format!("{:?}", role),
                    message: "schema declares no column for this role".to_string(),
                })
        };

        let dimensions = schema
            .columns
            .iter()
            .filter(|c| c.role == ColumnRole::Dimension)
            .filter_map(|c| positions.get(c.name).map(|i| (c.name, *i)))
            .collect();

        Ok(ColumnIndex {
            country: position_of(ColumnRole::Country)?,
            region: position_of(ColumnRole::Region)?,
            sub_region: position_of(ColumnRole::SubRegion)?,
            value: position_of(ColumnRole::Value)?,
            dimensions,
        })
    }

    fn parse_row(source: SourceId, index: &ColumnIndex, record: &StringRecord, line: u64) -> Result<RawRecord> {
        let key_cell = |pos: usize, column: &str| -> Result<String> {
            let text = record.get(pos).unwrap_or("");
            if text.is_empty() {
                return Err(FusionError::Parse {
                    source_id: source,
                    column: column.to_string(),
                    line,
                    value: text.to_string(),
                    expected: "non-empty text",
                });
            }
            Ok(text.to_string())
        };

        let key = AdminKey::new(
            key_cell(index.country, crate::constants::COUNTRY_COLUMN)?,
            key_cell(index.region, crate::constants::REGION_COLUMN)?,
            key_cell(index.sub_region, crate::constants::SUB_REGION_COLUMN)?,
        );

        let dimensions = index
            .dimensions
            .iter()
            .map(|(name, pos)| (name.to_string(), record.get(*pos).unwrap_or("").to_string()))
            .collect();

        let value = parse_number(source, crate::constants::VALUE_COLUMN, record.get(index.value).unwrap_or(""), line)?;

        Ok(RawRecord { key, dimensions, value })
    }
}

/// Coerce a numeric cell. Null markers become `None`; anything else that is
/// not a finite number is a parse error.
pub fn parse_number(source: SourceId, column: &str, text: &str, line: u64) -> Result<Option<f64>> {
    let trimmed = text.trim();
    if NULL_MARKERS.iter().any(|m| trimmed.eq_ignore_ascii_case(m)) {
        return Ok(None);
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(FusionError::Parse {
            source_id: source,
            column: column.to_string(),
            line,
            value: text.to_string(),
            expected: ColumnType::Number.describe(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn load(source: SourceId, csv: &str) -> Result<SourceTable> {
        DatasetLoader::load_reader(&SourceSchema::for_source(source), csv.as_bytes(), "test")
    }

    #[test]
    fn test_loads_atlas_headers() {
        let table = load(
            SourceId::Hazard,
            "admin0_name,admin1_name,admin2_name,scenario,timeframe,hazard,value\n\
             Kenya,Nakuru,Njoro,ssp245,2041_2060,NDWS,42.5\n\
             Kenya,Nakuru,Molo,ssp585,2041_2060,NDWS,\n",
        )
        .unwrap();

        assert_eq!(table.len(), 2);
        assert!(table.has_dimension("hazard_indicator_name"));
        assert_eq!(table.rows[0].key, AdminKey::new("Kenya", "Nakuru", "Njoro"));
        assert_eq!(table.rows[0].value, Some(42.5));
        assert_eq!(table.rows[0].dimension("scenario"), Some("ssp245"));
        assert_eq!(table.rows[1].value, None);
    }

    #[test]
    fn test_missing_required_column_is_schema_error() {
        let err = load(
            SourceId::Hazard,
            "country,region,sub_region,scenario,value\nKenya,Nakuru,Njoro,ssp245,1\n",
        )
        .unwrap_err();
        match err {
            FusionError::Schema { source_id, column, .. } => {
                assert_eq!(source_id, SourceId::Hazard);
                assert_eq!(column, "timeframe");
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_non_numeric_value_is_parse_error() {
        let err = load(
            SourceId::Poverty,
            "country,region,sub_region,value\nKenya,Nakuru,Njoro,0.3\nKenya,Nakuru,Molo,lots\n",
        )
        .unwrap_err();
        match err {
            FusionError::Parse { column, line, value, .. } => {
                assert_eq!(column, "value");
                assert_eq!(line, 3);
                assert_eq!(value, "lots");
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_key_cell_is_parse_error() {
        let err = load(SourceId::Poverty, "country,region,sub_region,value\nKenya,,Njoro,0.3\n").unwrap_err();
        assert!(matches!(err, FusionError::Parse { ref column, .. } if column == "region"));
    }

    #[test]
    fn test_null_markers() {
        for marker in ["", "NA", "NaN", "null"] {
            assert_eq!(parse_number(SourceId::Poverty, "value", marker, 1).unwrap(), None);
        }
        assert!(parse_number(SourceId::Poverty, "value", "inf", 1).is_err());
        assert_eq!(parse_number(SourceId::Poverty, "value", " 0.25 ", 1).unwrap(), Some(0.25));
    }

    #[test]
    fn test_ambiguous_alias_is_schema_error() {
        let err = load(
            SourceId::Poverty,
            "country,admin0_name,region,sub_region,value\nKenya,Kenya,Nakuru,Njoro,0.3\n",
        )
        .unwrap_err();
        assert!(matches!(err, FusionError::Schema { .. }));
    }

    #[test]
    fn test_load_file_fingerprints_snapshot() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "country,region,sub_region,value\nKenya,Nakuru,Njoro,1\n").unwrap();

        let schema = SourceSchema::for_source(SourceId::Erosion);
        let first = DatasetLoader::load_file(&schema, file.path()).unwrap();
        let second = DatasetLoader::load_file(&schema, file.path()).unwrap();

        assert_eq!(first.row_count, 1);
        assert_eq!(first.fingerprint.len(), 64);
        assert_eq!(first.fingerprint, second.fingerprint);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let schema = SourceSchema::for_source(SourceId::Erosion);
        let err = DatasetLoader::load_file(&schema, Path::new("/nonexistent/erosion.csv")).unwrap_err();
        assert!(matches!(err, FusionError::Io { .. }));
    }
}
