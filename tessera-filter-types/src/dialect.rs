use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// The predicate flavor a fragment is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Postgresql,
    Spatialite,
    Ogr,
    Expression,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Postgresql => "postgresql",
            Dialect::Spatialite => "spatialite",
            Dialect::Ogr => "ogr",
            Dialect::Expression => "expression",
        }
    }

    /// Whether the dialect understands `ST_*` spatial functions.
    pub fn has_spatial_sql(&self) -> bool {
        matches!(self, Dialect::Postgresql | Dialect::Spatialite)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" => Dialect::Postgresql,
            "spatialite" | "sqlite" => Dialect::Spatialite,
            "ogr" => Dialect::Ogr,
            "expression" => Dialect::Expression,
            other => return Err(format!("unknown dialect: {other}")),
        })
    }
}

/// Double-quote an identifier, doubling any embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quote a string literal, doubling any embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("postgres", Dialect::Postgresql)]
    #[test_case("PostgreSQL", Dialect::Postgresql)]
    #[test_case("sqlite", Dialect::Spatialite)]
    #[test_case("ogr", Dialect::Ogr)]
    #[test_case("expression", Dialect::Expression)]
    fn parse_dialect(input: &str, expected: Dialect) {
        assert_eq!(input.parse::<Dialect>().unwrap(), expected);
    }

    #[test]
    fn quoting_escapes_embedded_quotes() {
        assert_eq!(quote_identifier(r#"we"ird"#), r#""we""ird""#);
        assert_eq!(quote_literal("o'clock"), "'o''clock'");
    }
}
