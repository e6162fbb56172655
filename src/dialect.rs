//! Firebird Dialect Normalizer
//!
//! Deterministic, order-sensitive rewrites that turn generic SQL into
//! Firebird syntax: `LIMIT` becomes `FIRST`, `OFFSET` becomes `SKIP`, and a
//! handful of function names are aliased. Every rewrite is documented with
//! an info-level issue for auditability. With schema metadata supplied, the
//! normalizer additionally checks that referenced identifiers exist.

use crate::error::Result;
use crate::validator::{extract_table_refs, ValidationIssue, SQL_KEYWORDS};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::debug;

lazy_static! {
    static ref LIMIT_RE: Regex = Regex::new(r"(?i)\s*\bLIMIT\s+(\d+)\b").unwrap();
    static ref OFFSET_RE: Regex = Regex::new(r"(?i)\s*\bOFFSET\s+(\d+)\b").unwrap();
    static ref SELECT_RE: Regex = Regex::new(r"(?i)\bSELECT\b").unwrap();
    static ref SELECT_FIRST_RE: Regex = Regex::new(r"(?i)\bSELECT\s+FIRST\s+\d+").unwrap();
    static ref LENGTH_FN_RE: Regex = Regex::new(r"(?i)\b(?:LENGTH|LEN)\s*\(").unwrap();
    static ref NULL_FN_RE: Regex = Regex::new(r"(?i)\b(?:ISNULL|IFNULL|NVL)\s*\(").unwrap();
    static ref NOW_FN_RE: Regex = Regex::new(r"(?i)\bNOW\s*\(\s*\)").unwrap();
    static ref CURDATE_FN_RE: Regex = Regex::new(r"(?i)\bCURDATE\s*\(\s*\)").unwrap();
    static ref ALIAS_RE: Regex = Regex::new(
        r"(?i)\b(?:FROM|JOIN)\s+([A-Za-z_][A-Za-z0-9_$]*)(?:\s+(?:AS\s+)?([A-Za-z_][A-Za-z0-9_$]*))?"
    )
    .unwrap();
    static ref QUALIFIED_RE: Regex =
        Regex::new(r"\b([A-Za-z_][A-Za-z0-9_$]*)\.([A-Za-z_][A-Za-z0-9_$]*)\b").unwrap();
}

/// Known tables and their columns, used for the schema-aware checks.
/// Loaded once at startup; identifiers are stored uppercased.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub tables: HashMap<String, HashSet<String>>,
}

impl SchemaInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: &str, columns: &[&str]) -> Self {
        self.tables.insert(
            table.to_uppercase(),
            columns.iter().map(|c| c.to_uppercase()).collect(),
        );
        self
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let parsed: HashMap<String, Vec<String>> = serde_json::from_str(&raw)?;
        let tables = parsed
            .into_iter()
            .map(|(t, cols)| {
                (
                    t.to_uppercase(),
                    cols.into_iter().map(|c| c.to_uppercase()).collect(),
                )
            })
            .collect();
        Ok(Self { tables })
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(&name.to_uppercase())
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.tables
            .get(&table.to_uppercase())
            .is_some_and(|cols| cols.contains(&column.to_uppercase()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct FirebirdNormalizer;

impl FirebirdNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Rewrite generic SQL into Firebird syntax. Pure function; each
    /// applied rewrite emits one info issue with `auto_fixable` set.
    pub fn normalize(&self, sql: &str) -> (String, Vec<ValidationIssue>) {
        let mut out = sql.to_string();
        let mut issues = Vec::new();

        // LIMIT n  ->  FIRST n right after SELECT. Must run before the
        // OFFSET rewrite so SKIP can slot in behind FIRST.
        if let Some(cap) = LIMIT_RE.captures(&out) {
            let n = cap[1].to_string();
            out = LIMIT_RE.replace(&out, "").to_string();
            out = SELECT_RE
                .replace(&out, format!("SELECT FIRST {n}"))
                .to_string();
            issues.push(
                ValidationIssue::info(
                    "FIREBIRD_LIMIT",
                    format!("LIMIT {n} rewritten to FIRST {n}"),
                )
                .fixable(),
            );
        }

        // OFFSET n  ->  SKIP n, after FIRST when present.
        if let Some(cap) = OFFSET_RE.captures(&out) {
            let n = cap[1].to_string();
            out = OFFSET_RE.replace(&out, "").to_string();
            if SELECT_FIRST_RE.is_match(&out) {
                out = SELECT_FIRST_RE
                    .replace(&out, |caps: &regex::Captures| {
                        format!("{} SKIP {n}", &caps[0])
                    })
                    .to_string();
            } else {
                out = SELECT_RE.replace(&out, format!("SELECT SKIP {n}")).to_string();
            }
            issues.push(
                ValidationIssue::info(
                    "FIREBIRD_OFFSET",
                    format!("OFFSET {n} rewritten to SKIP {n}"),
                )
                .fixable(),
            );
        }

        for (re, replacement, code, what) in [
            (
                &*LENGTH_FN_RE,
                "CHAR_LENGTH(",
                "FIREBIRD_FUNCTION",
                "LENGTH/LEN -> CHAR_LENGTH",
            ),
            (
                &*NULL_FN_RE,
                "COALESCE(",
                "FIREBIRD_FUNCTION",
                "ISNULL/IFNULL/NVL -> COALESCE",
            ),
            (
                &*NOW_FN_RE,
                "CURRENT_TIMESTAMP",
                "FIREBIRD_FUNCTION",
                "NOW() -> CURRENT_TIMESTAMP",
            ),
            (
                &*CURDATE_FN_RE,
                "CURRENT_DATE",
                "FIREBIRD_FUNCTION",
                "CURDATE() -> CURRENT_DATE",
            ),
        ] {
            if re.is_match(&out) {
                out = re.replace_all(&out, replacement).to_string();
                issues.push(
                    ValidationIssue::info(code, format!("function aliased: {what}")).fixable(),
                );
            }
        }

        let out = collapse_spaces(&out);
        if !issues.is_empty() {
            debug!(rewrites = issues.len(), "firebird normalization applied");
        }
        (out, issues)
    }

    /// Schema-aware identifier checks: unknown tables are errors, unknown
    /// columns warnings (errors in strict mode). Runs on generic SQL,
    /// before the Firebird rewrites defeat the parser.
    pub fn check_schema(
        &self,
        sql: &str,
        schema: &SchemaInfo,
        strict: bool,
    ) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        let (referenced, _) = extract_table_refs(sql);
        for table in &referenced {
            if !schema.has_table(table) {
                issues.push(ValidationIssue::error(
                    "UNKNOWN_TABLE",
                    format!("table {table} does not exist in the schema"),
                ));
            }
        }

        // Resolve aliases, then verify qualified column references.
        let aliases = alias_map(sql);
        for cap in QUALIFIED_RE.captures_iter(sql) {
            let qualifier = cap[1].to_uppercase();
            let column = cap[2].to_uppercase();
            let Some(table) = aliases.get(&qualifier) else {
                continue;
            };
            if !schema.has_table(table) {
                // Already reported as UNKNOWN_TABLE.
                continue;
            }
            if !schema.has_column(table, &column) {
                let message = format!("column {column} not found on table {table}");
                issues.push(if strict {
                    ValidationIssue::error("UNKNOWN_COLUMN", message)
                } else {
                    ValidationIssue::warning("UNKNOWN_COLUMN", message)
                });
            }
        }

        issues
    }
}

/// Map alias (and bare table name) -> table name, both uppercased.
fn alias_map(sql: &str) -> HashMap<String, String> {
    let mut aliases = HashMap::new();
    for cap in ALIAS_RE.captures_iter(sql) {
        let table = cap[1].to_uppercase();
        if SQL_KEYWORDS.contains(&table.as_str()) {
            continue;
        }
        aliases.insert(table.clone(), table.clone());
        if let Some(alias) = cap.get(2) {
            let alias = alias.as_str().to_uppercase();
            if !SQL_KEYWORDS.contains(&alias.as_str()) {
                aliases.insert(alias, table);
            }
        }
    }
    aliases
}

fn collapse_spaces(sql: &str) -> String {
    lazy_static! {
        static ref SPACES_RE: Regex = Regex::new(r"[ \t]{2,}").unwrap();
    }
    SPACES_RE.replace_all(sql.trim(), " ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::Severity;

    fn normalizer() -> FirebirdNormalizer {
        FirebirdNormalizer::new()
    }

    fn schema() -> SchemaInfo {
        SchemaInfo::new()
            .with_table("BEWOHNER", &["NAME", "VNAME", "ORT", "ONR"])
            .with_table("OBJEKTE", &["ONR", "OBEZ", "OSTRASSE"])
    }

    #[test]
    fn limit_becomes_first() {
        let (sql, issues) = normalizer().normalize("SELECT * FROM OBJEKTE LIMIT 5");
        assert!(sql.contains("SELECT FIRST 5"), "got: {sql}");
        assert!(!sql.to_uppercase().contains("LIMIT"));
        assert!(issues
            .iter()
            .any(|i| i.code == "FIREBIRD_LIMIT" && i.severity == Severity::Info));
    }

    #[test]
    fn offset_becomes_skip_after_first() {
        let (sql, issues) =
            normalizer().normalize("SELECT NAME FROM BEWOHNER ORDER BY NAME LIMIT 10 OFFSET 20");
        assert!(sql.contains("SELECT FIRST 10 SKIP 20"), "got: {sql}");
        assert!(!sql.to_uppercase().contains("OFFSET"));
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn offset_without_limit_goes_after_select() {
        let (sql, _) = normalizer().normalize("SELECT NAME FROM BEWOHNER OFFSET 20");
        assert!(sql.starts_with("SELECT SKIP 20"), "got: {sql}");
    }

    #[test]
    fn length_and_isnull_are_aliased() {
        let (sql, issues) = normalizer()
            .normalize("SELECT LENGTH(NAME), ISNULL(ORT, 'x') FROM BEWOHNER WHERE ONR = 1");
        assert!(sql.contains("CHAR_LENGTH(NAME)"));
        assert!(sql.contains("COALESCE(ORT, 'x')"));
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| i.auto_fixable));
    }

    #[test]
    fn char_length_is_not_double_rewritten() {
        let (sql, issues) =
            normalizer().normalize("SELECT CHAR_LENGTH(NAME) FROM BEWOHNER WHERE ONR = 1");
        assert!(sql.contains("CHAR_LENGTH(NAME)"));
        assert!(!sql.contains("CHAR_CHAR_LENGTH"));
        assert!(issues.is_empty());
    }

    #[test]
    fn already_firebird_sql_is_untouched() {
        let input = "SELECT FIRST 5 NAME FROM BEWOHNER WHERE ONR = 1";
        let (sql, issues) = normalizer().normalize(input);
        assert_eq!(sql, input);
        assert!(issues.is_empty());
    }

    #[test]
    fn normalization_is_deterministic() {
        let input = "SELECT NAME FROM BEWOHNER LIMIT 7 OFFSET 3";
        let (a, _) = normalizer().normalize(input);
        let (b, _) = normalizer().normalize(input);
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_table_is_an_error() {
        let issues = normalizer().check_schema(
            "SELECT X.NAME FROM PHANTOM X WHERE X.NAME = 'a'",
            &schema(),
            false,
        );
        assert!(issues
            .iter()
            .any(|i| i.code == "UNKNOWN_TABLE" && i.severity == Severity::Error));
    }

    #[test]
    fn unknown_column_is_a_warning_unless_strict() {
        let sql = "SELECT B.TELEFAX FROM BEWOHNER B WHERE B.ONR = 1";
        let relaxed = normalizer().check_schema(sql, &schema(), false);
        assert!(relaxed
            .iter()
            .any(|i| i.code == "UNKNOWN_COLUMN" && i.severity == Severity::Warning));
        let strict = normalizer().check_schema(sql, &schema(), true);
        assert!(strict
            .iter()
            .any(|i| i.code == "UNKNOWN_COLUMN" && i.severity == Severity::Error));
    }

    #[test]
    fn known_identifiers_produce_no_issues() {
        let sql = "SELECT B.NAME, O.OBEZ FROM BEWOHNER B JOIN OBJEKTE O ON B.ONR = O.ONR WHERE B.ORT = 'Essen'";
        let issues = normalizer().check_schema(sql, &schema(), true);
        assert!(issues.is_empty(), "issues: {:?}", issues);
    }
}
