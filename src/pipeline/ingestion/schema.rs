use crate::constants::*;
use crate::domain::SourceId;

/// Scalar type a column is coerced to at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Number,
}

impl ColumnType {
    pub fn describe(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Number => "number",
        }
    }
}

/// What a column contributes to a `RawRecord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    Country,
    Region,
    SubRegion,
    /// Categorical dimension (scenario, timeframe, item, ...)
    Dimension,
    Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub column_type: ColumnType,
    pub required: bool,
    pub role: ColumnRole,
}

impl ColumnSpec {
    fn key(name: &'static str, aliases: &'static [&'static str], role: ColumnRole) -> Self {
        Self {
            name,
            aliases,
            column_type: ColumnType::Text,
            required: true,
            role,
        }
    }

    fn dimension(name: &'static str, aliases: &'static [&'static str], required: bool) -> Self {
        Self {
            name,
            aliases,
            column_type: ColumnType::Text,
            required,
            role: ColumnRole::Dimension,
        }
    }

    fn value() -> Self {
        Self {
            name: VALUE_COLUMN,
            aliases: &[],
            column_type: ColumnType::Number,
            required: true,
            role: ColumnRole::Value,
        }
    }

    /// Whether `header` names this column (case-insensitive, trimmed).
    pub fn matches(&self, header: &str) -> bool {
        let header = header.trim();
        header.eq_ignore_ascii_case(self.name) || self.aliases.iter().any(|a| header.eq_ignore_ascii_case(a))
    }
}

/// Declared column layout of one source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSchema {
    pub source: SourceId,
    pub columns: Vec<ColumnSpec>,
}

impl SourceSchema {
    /// Built-in schema for each source.
    pub fn for_source(source: SourceId) -> Self {
        let mut columns = vec![
            ColumnSpec::key(COUNTRY_COLUMN, COUNTRY_ALIASES, ColumnRole::Country),
            ColumnSpec::key(REGION_COLUMN, REGION_ALIASES, ColumnRole::Region),
            ColumnSpec::key(SUB_REGION_COLUMN, SUB_REGION_ALIASES, ColumnRole::SubRegion),
        ];
        match source {
            SourceId::Hazard => {
                columns.push(ColumnSpec::dimension(SCENARIO_COLUMN, &[], true));
                columns.push(ColumnSpec::dimension(TIMEFRAME_COLUMN, &[], true));
                columns.push(ColumnSpec::dimension(INDICATOR_COLUMN, &["hazard"], true));
            }
            SourceId::Erosion => {
                columns.push(ColumnSpec::dimension(SCENARIO_COLUMN, &[], false));
                columns.push(ColumnSpec::dimension(TIMEFRAME_COLUMN, &[], false));
                columns.push(ColumnSpec::dimension(INDICATOR_COLUMN, &["hazard"], false));
            }
            SourceId::Population => {
                columns.push(ColumnSpec::dimension(SCENARIO_COLUMN, &[], true));
                columns.push(ColumnSpec::dimension(TIMEFRAME_COLUMN, &[], false));
                columns.push(ColumnSpec::dimension(POPULATION_TYPE_COLUMN, &["crop"], false));
            }
            SourceId::AgriculturalValue => {
                columns.push(ColumnSpec::dimension(ITEM_COLUMN, &["crop"], true));
                columns.push(ColumnSpec::dimension(EXPOSURE_COLUMN, &[], false));
            }
            SourceId::Poverty => {
                columns.push(ColumnSpec::dimension(VARIABLE_COLUMN, &[], false));
                columns.push(ColumnSpec::dimension(SCENARIO_COLUMN, &[], false));
            }
        }
        columns.push(ColumnSpec::value());
        Self { source, columns }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }
}
