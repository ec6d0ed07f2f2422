//! Semantic variable mapping
//!
//! Translates the semantic names analysts use (`sexo`, `idade`) into the
//! physical warehouse column codes of each survey year (`c006`, `c008`), with
//! the type every variable is expected to carry. A variable can be absent
//! from a given year; it then reads as null.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::record::Record;
use crate::value::{ColumnType, Value};
use crate::{Error, Result};

/// Default reserved column holding the survey year
pub const DEFAULT_YEAR_COLUMN: &str = "origem";

/// Where a variable lives in one survey year
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableSource {
    /// Physical column code, `None` when the year did not collect it
    pub code: Option<String>,
    pub column_type: ColumnType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub sources: BTreeMap<String, VariableSource>,
}

/// Semantic name -> per-year physical code table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableMap {
    variables: Vec<Variable>,
    year_column: String,
}

#[derive(Deserialize)]
struct MapFile {
    #[serde(default)]
    year_column: Option<String>,
    variables: BTreeMap<String, BTreeMap<String, SourceEntry>>,
}

#[derive(Deserialize)]
struct SourceEntry {
    #[serde(default)]
    code: Option<String>,
    #[serde(rename = "type")]
    column_type: String,
}

/// (semantic name, physical code, type); every built-in variable uses the
/// same code in both survey years
const PNS_VARIABLES: &[(&str, &str, ColumnType)] = &[
    // identification
    ("identificador_unidade", "upa_pns", ColumnType::Text),
    ("sigla_uf", "sigla_uf", ColumnType::Text),
    ("v0024", "v0024", ColumnType::Text),
    // core indicators
    ("sexo", "c006", ColumnType::Text),
    ("idade", "c008", ColumnType::Integer),
    ("preventivo", "r001", ColumnType::Text),
    ("mamografia", "r015", ColumnType::Text),
    ("renda_per_capita", "vdf003", ColumnType::Real),
    ("peso_amostral", "v00291", ColumnType::Real),
    // additional
    ("preventivo_pagou", "r012", ColumnType::Text),
    ("medico_pediu_mamografia", "r014", ColumnType::Text),
    ("mamografia_pagou", "r019", ColumnType::Text),
    ("raca", "c009", ColumnType::Text),
    ("anos_estudo", "vdd004a", ColumnType::Integer),
    ("ja_engravidou", "r039", ColumnType::Text),
    ("filhos_vivos", "r045", ColumnType::Integer),
    ("estado_civil", "c011", ColumnType::Text),
];

const PNS_YEARS: &[&str] = &["2013", "2019"];

impl VariableMap {
    /// Map of the PNS 2013 and 2019 variables
    pub fn builtin() -> Self {
        let variables = PNS_VARIABLES
            .iter()
            .map(|(name, code, column_type)| Variable {
                name: name.to_string(),
                sources: PNS_YEARS
                    .iter()
                    .map(|year| {
                        let source = VariableSource {
                            code: Some(code.to_string()),
                            column_type: *column_type,
                        };
                        (year.to_string(), source)
                    })
                    .collect(),
            })
            .collect();

        Self {
            variables,
            year_column: DEFAULT_YEAR_COLUMN.to_string(),
        }
    }

    /// Load a map from TOML:
    ///
    /// ```toml
    /// [variables.idade.2019]
    /// code = "c008"
    /// type = "int"
    /// ```
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: MapFile = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse variable map: {}", e)))?;

        let mut variables = Vec::with_capacity(file.variables.len());
        for (name, years) in file.variables {
            let mut sources = BTreeMap::new();
            for (year, entry) in years {
                let column_type = entry.column_type.parse().map_err(|_| {
                    Error::Config(format!(
                        "Variable {} ({}) has unknown type {:?}",
                        name, year, entry.column_type
                    ))
                })?;
                sources.insert(
                    year,
                    VariableSource {
                        code: entry.code.filter(|c| !c.is_empty()),
                        column_type,
                    },
                );
            }
            variables.push(Variable { name, sources });
        }

        Ok(Self {
            variables,
            year_column: file
                .year_column
                .unwrap_or_else(|| DEFAULT_YEAR_COLUMN.to_string()),
        })
    }

    pub fn with_year_column(mut self, column: impl Into<String>) -> Self {
        self.year_column = column.into();
        self
    }

    pub fn year_column(&self) -> &str {
        &self.year_column
    }

    fn source(&self, name: &str, year: &str) -> Option<&VariableSource> {
        self.variables
            .iter()
            .find(|v| v.name == name)
            .and_then(|v| v.sources.get(year))
    }

    /// Physical column code of `name` in `year`
    pub fn physical_code(&self, name: &str, year: &str) -> Option<&str> {
        self.source(name, year).and_then(|s| s.code.as_deref())
    }

    pub fn column_type(&self, name: &str, year: &str) -> Option<ColumnType> {
        self.source(name, year).map(|s| s.column_type)
    }

    /// Whether `name` was collected in `year`
    pub fn exists(&self, name: &str, year: &str) -> bool {
        self.physical_code(name, year).is_some()
    }

    /// Semantic names, restricted to those collected in `year` when given
    pub fn available(&self, year: Option<&str>) -> Vec<&str> {
        self.variables
            .iter()
            .filter(|v| year.is_none_or(|y| self.exists(&v.name, y)))
            .map(|v| v.name.as_str())
            .collect()
    }

    /// Every year any variable is mapped for, ascending
    pub fn years(&self) -> Vec<&str> {
        let mut years: Vec<&str> = self
            .variables
            .iter()
            .flat_map(|v| v.sources.keys().map(String::as_str))
            .collect();
        years.sort_unstable();
        years.dedup();
        years
    }

    /// Rename a warehouse row from physical codes to semantic names.
    ///
    /// The result holds the year column followed by every variable of the map
    /// in order. Variables absent from `year`, or whose value cannot be
    /// coerced to the declared type, are null. Unmapped columns are dropped.
    pub fn to_semantic(&self, record: &Record, year: &str) -> Record {
        let mut out = Record::new().with(self.year_column.clone(), year);

        for variable in &self.variables {
            let value = match variable.sources.get(year) {
                Some(VariableSource { code: Some(code), column_type }) => {
                    let raw = record.get(code).cloned().unwrap_or_default();
                    raw.coerce(*column_type).unwrap_or_else(|| {
                        tracing::debug!(
                            "Value {} of {} ({}) is not a valid {}",
                            raw,
                            variable.name,
                            code,
                            column_type
                        );
                        Value::Null
                    })
                }
                _ => Value::Null,
            };
            out.insert(variable.name.clone(), value);
        }
        out
    }
}

impl Default for VariableMap {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookups() {
        let map = VariableMap::builtin();
        assert_eq!(map.physical_code("sexo", "2019"), Some("c006"));
        assert_eq!(map.physical_code("identificador_unidade", "2013"), Some("upa_pns"));
        assert_eq!(map.column_type("renda_per_capita", "2013"), Some(ColumnType::Real));
        assert_eq!(map.column_type("idade", "2019"), Some(ColumnType::Integer));

        assert!(map.exists("mamografia", "2013"));
        assert!(!map.exists("mamografia", "2008"));
        assert!(!map.exists("altura", "2019"));
        assert_eq!(map.physical_code("altura", "2019"), None);
    }

    #[test]
    fn test_available() {
        let map = VariableMap::builtin();
        let all = map.available(None);
        assert_eq!(all.len(), 17);
        assert_eq!(all[0], "identificador_unidade");
        assert_eq!(map.available(Some("2019")), all);
        assert!(map.available(Some("1998")).is_empty());
        assert_eq!(map.years(), vec!["2013", "2019"]);
    }

    #[test]
    fn test_from_toml_with_missing_year() {
        let map = VariableMap::from_toml_str(
            r#"
year_column = "ano"

[variables.fumante.2013]
code = "p050"
type = "string"

[variables.fumante.2019]
type = "string"

[variables.altura.2019]
code = "p00404"
type = "float"
"#,
        )
        .unwrap();

        assert_eq!(map.year_column(), "ano");
        assert!(map.exists("fumante", "2013"));
        assert!(!map.exists("fumante", "2019"));
        assert_eq!(map.column_type("fumante", "2019"), Some(ColumnType::Text));
        assert_eq!(map.available(Some("2019")), vec!["altura"]);
    }

    #[test]
    fn test_from_toml_rejects_unknown_type() {
        let err = VariableMap::from_toml_str("[variables.x.2019]\ncode = \"a\"\ntype = \"blob\"\n")
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_to_semantic() {
        let map = VariableMap::builtin();
        let row = Record::new()
            .with("upa_pns", "110000016")
            .with("c006", 2)
            .with("c008", "47")
            .with("vdf003", 1250)
            .with("r045", "n/a")
            .with("unmapped", 1);

        let semantic = map.to_semantic(&row, "2019");
        assert_eq!(semantic.get("origem"), Some(&Value::from("2019")));
        assert_eq!(semantic.get("identificador_unidade"), Some(&Value::from("110000016")));
        assert_eq!(semantic.get("sexo"), Some(&Value::from("2")));
        assert_eq!(semantic.get("idade"), Some(&Value::Integer(47)));
        assert_eq!(semantic.get("renda_per_capita"), Some(&Value::Real(1250.0)));
        assert_eq!(semantic.get("filhos_vivos"), Some(&Value::Null));
        assert_eq!(semantic.get("raca"), Some(&Value::Null));
        assert!(!semantic.contains("unmapped"));
        assert_eq!(semantic.len(), 18);
    }

    #[test]
    fn test_to_semantic_nan_text_reads_as_null() {
        let map = VariableMap::builtin();
        let row = Record::new().with("vdf003", "NaN").with("v00291", "inf");

        let semantic = map.to_semantic(&row, "2013");
        assert_eq!(semantic.get("renda_per_capita"), Some(&Value::Null));
        assert_eq!(semantic.get("peso_amostral"), Some(&Value::Null));
    }
}
