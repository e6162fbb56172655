//! SQL Security Validator
//!
//! Two-phase gate over candidate SQL. Phase 1 rejects DML/DDL keywords and
//! known injection idioms (blacklist, secondary defense). Phase 2 is the
//! primary guarantee: every referenced table must be on the caller's
//! allow-list. Security findings are reported, never auto-fixed.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{Query, SetExpr, Statement, TableFactor, TableWithJoins};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::HashSet;
use tracing::{debug, warn};

lazy_static! {
    static ref DML_RE: Regex = Regex::new(
        r"(?i)\b(INSERT|UPDATE|DELETE|DROP|ALTER|CREATE|TRUNCATE|EXECUTE|GRANT|REVOKE|MERGE)\b"
    )
    .unwrap();
    static ref NUMERIC_TAUTOLOGY_RE: Regex =
        Regex::new(r"(?i)\b(?:OR|AND)\s+(\d+)\s*=\s*(\d+)").unwrap();
    static ref STRING_TAUTOLOGY_RE: Regex =
        Regex::new(r"(?i)\b(?:OR|AND)\s+'([^']*)'\s*=\s*'([^']*)'").unwrap();
    static ref COMMENT_RE: Regex = Regex::new(r"--|/\*").unwrap();
    static ref UNION_RE: Regex = Regex::new(r"(?i)\bUNION\b(?:\s+ALL\b)?\s+SELECT\b").unwrap();
    static ref STACKED_RE: Regex = Regex::new(r";\s*\S").unwrap();
    static ref SELECT_STAR_RE: Regex =
        Regex::new(r"(?i)\bSELECT\s+(?:FIRST\s+\d+\s+)?(?:SKIP\s+\d+\s+)?\*").unwrap();
    static ref WHERE_RE: Regex = Regex::new(r"(?i)\bWHERE\b").unwrap();
    static ref FROM_RE: Regex = Regex::new(r"(?i)\bFROM\b").unwrap();
}

/// SQL keywords the token-scan table extractor must not mistake for names.
pub const SQL_KEYWORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "JOIN", "ON", "AND", "OR", "NOT", "ORDER", "GROUP", "BY",
    "HAVING", "LIMIT", "OFFSET", "FIRST", "SKIP", "AS", "INNER", "LEFT", "RIGHT", "FULL",
    "OUTER", "CROSS", "LIKE", "CONTAINING", "IN", "IS", "NULL", "DESC", "ASC", "DISTINCT",
    "UNION", "ALL", "BETWEEN", "EXISTS", "CASE", "WHEN", "THEN", "ELSE", "END",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Suggestion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    pub auto_fixable: bool,
}

impl ValidationIssue {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code: code.to_string(),
            message: message.into(),
            suggestion: None,
            auto_fixable: false,
        }
    }

    pub fn warning(code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code: code.to_string(),
            message: message.into(),
            suggestion: None,
            auto_fixable: false,
        }
    }

    pub fn info(code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            code: code.to_string(),
            message: message.into(),
            suggestion: None,
            auto_fixable: false,
        }
    }

    pub fn suggestion(code: &str, message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            severity: Severity::Suggestion,
            code: code.to_string(),
            message: message.into(),
            suggestion: Some(hint.into()),
            auto_fixable: false,
        }
    }

    pub fn fixable(mut self) -> Self {
        self.auto_fixable = true;
        self
    }
}

/// Validation outcome. Invariant: `is_valid == false` whenever any issue
/// carries error severity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub original_sql: String,
    pub is_valid: bool,
    pub issues: Vec<ValidationIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_sql: Option<String>,
}

impl ValidationResult {
    pub fn new(original_sql: &str, issues: Vec<ValidationIssue>) -> Self {
        let is_valid = !issues.iter().any(|i| i.severity == Severity::Error);
        Self {
            original_sql: original_sql.to_string(),
            is_valid,
            issues,
            fixed_sql: None,
        }
    }

    /// Append issues (e.g., from the dialect pass) and recompute validity.
    pub fn merge(&mut self, issues: Vec<ValidationIssue>) {
        self.issues.extend(issues);
        self.is_valid = !self.issues.iter().any(|i| i.severity == Severity::Error);
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SqlSecurityValidator;

impl SqlSecurityValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate candidate SQL against the allow-list of tables.
    ///
    /// An empty allow-list fails closed: every referenced table becomes an
    /// error. The input is never mutated; security issues are never fixed.
    pub fn validate(&self, sql: &str, allowed_tables: &[String]) -> ValidationResult {
        let mut issues = Vec::new();

        self.blacklist_pass(sql, &mut issues);
        self.whitelist_pass(sql, allowed_tables, &mut issues);
        self.advisory_pass(sql, &mut issues);

        let result = ValidationResult::new(sql, issues);
        if !result.is_valid {
            // Details go to the log, never back to the end user.
            warn!(
                errors = result.errors().count(),
                "sql rejected by security validator"
            );
        }
        result
    }

    fn blacklist_pass(&self, sql: &str, issues: &mut Vec<ValidationIssue>) {
        let mut seen = HashSet::new();
        for cap in DML_RE.captures_iter(sql) {
            let keyword = cap[1].to_uppercase();
            if seen.insert(keyword.clone()) {
                issues.push(ValidationIssue::error(
                    "DML_NOT_ALLOWED",
                    format!("statement contains forbidden keyword {keyword}"),
                ));
            }
        }

        for cap in NUMERIC_TAUTOLOGY_RE.captures_iter(sql) {
            if cap[1] == cap[2] {
                issues.push(ValidationIssue::error(
                    "INJECTION_TAUTOLOGY",
                    "boolean tautology in predicate",
                ));
            }
        }
        for cap in STRING_TAUTOLOGY_RE.captures_iter(sql) {
            if cap[1] == cap[2] {
                issues.push(ValidationIssue::error(
                    "INJECTION_TAUTOLOGY",
                    "string tautology in predicate",
                ));
            }
        }

        if COMMENT_RE.is_match(sql) {
            issues.push(ValidationIssue::error(
                "COMMENT_INJECTION",
                "comment marker in statement",
            ));
        }
        if STACKED_RE.is_match(sql) {
            issues.push(ValidationIssue::error(
                "STACKED_STATEMENTS",
                "multiple statements are not allowed",
            ));
        }
        if UNION_RE.is_match(sql) {
            issues.push(ValidationIssue::error(
                "UNION_NOT_ALLOWED",
                "UNION SELECT is not allowed in templated queries",
            ));
        }
    }

    fn whitelist_pass(
        &self,
        sql: &str,
        allowed_tables: &[String],
        issues: &mut Vec<ValidationIssue>,
    ) {
        let allowed: HashSet<String> = allowed_tables.iter().map(|t| t.to_uppercase()).collect();

        let (referenced, single_select) = extract_table_refs(sql);
        if !single_select {
            issues.push(ValidationIssue::error(
                "NOT_A_SELECT",
                "only a single SELECT statement is permitted",
            ));
        }

        for table in &referenced {
            if !allowed.contains(table) {
                issues.push(ValidationIssue::error(
                    "TABLE_NOT_ALLOWED",
                    format!("table {table} is outside the allow-list"),
                ));
            }
        }
        debug!(
            referenced = referenced.len(),
            allowed = allowed.len(),
            "whitelist pass complete"
        );
    }

    fn advisory_pass(&self, sql: &str, issues: &mut Vec<ValidationIssue>) {
        if SELECT_STAR_RE.is_match(sql) {
            issues.push(ValidationIssue::suggestion(
                "SELECT_STAR",
                "SELECT * fetches all columns",
                "enumerate the columns the caller needs",
            ));
        }
        if FROM_RE.is_match(sql) && !WHERE_RE.is_match(sql) {
            issues.push(ValidationIssue::warning(
                "MISSING_WHERE",
                "statement has no WHERE clause and may scan the full table",
            ));
        }
    }
}

/// Extract the set of referenced table names (uppercased) and whether the
/// input is exactly one SELECT statement.
///
/// Uses the sqlparser AST when the dialect allows; a token scan runs as
/// well, both because Firebird syntax (`FIRST`/`SKIP`/`CONTAINING`) defeats
/// the generic parser and because the union of both passes is stricter than
/// either alone.
pub fn extract_table_refs(sql: &str) -> (HashSet<String>, bool) {
    let mut tables = HashSet::new();
    let mut local_names = HashSet::new();
    let mut single_select = false;

    match Parser::parse_sql(&GenericDialect {}, sql) {
        Ok(statements) => {
            if statements.len() == 1 {
                if let Statement::Query(query) = &statements[0] {
                    single_select = true;
                    collect_query_tables(query, &mut tables, &mut local_names);
                }
            }
        }
        Err(_) => {
            // Firebird constructs are expected to land here; fall through
            // to the token scan and a keyword check for SELECT.
            single_select = sql
                .trim_start()
                .to_uppercase()
                .starts_with("SELECT")
                && !STACKED_RE.is_match(sql);
        }
    }

    scan_table_tokens(sql, &mut tables);

    // CTE names are statement-local, not schema objects.
    for name in &local_names {
        tables.remove(name);
    }
    (tables, single_select)
}

fn collect_query_tables(
    query: &Query,
    tables: &mut HashSet<String>,
    local_names: &mut HashSet<String>,
) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            local_names.insert(cte.alias.name.value.to_uppercase());
            collect_query_tables(&cte.query, tables, local_names);
        }
    }
    collect_set_expr_tables(&query.body, tables, local_names);
}

fn collect_set_expr_tables(
    body: &SetExpr,
    tables: &mut HashSet<String>,
    local_names: &mut HashSet<String>,
) {
    match body {
        SetExpr::Select(select) => {
            for twj in &select.from {
                collect_table_with_joins(twj, tables, local_names);
            }
        }
        SetExpr::Query(query) => collect_query_tables(query, tables, local_names),
        SetExpr::SetOperation { left, right, .. } => {
            collect_set_expr_tables(left, tables, local_names);
            collect_set_expr_tables(right, tables, local_names);
        }
        _ => {}
    }
}

fn collect_table_with_joins(
    twj: &TableWithJoins,
    tables: &mut HashSet<String>,
    local_names: &mut HashSet<String>,
) {
    collect_table_factor(&twj.relation, tables, local_names);
    for join in &twj.joins {
        collect_table_factor(&join.relation, tables, local_names);
    }
}

fn collect_table_factor(
    factor: &TableFactor,
    tables: &mut HashSet<String>,
    local_names: &mut HashSet<String>,
) {
    match factor {
        TableFactor::Table { name, .. } => {
            if let Some(last) = name.0.last() {
                tables.insert(last.value.to_uppercase());
            }
        }
        TableFactor::Derived { subquery, .. } => {
            collect_query_tables(subquery, tables, local_names);
        }
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => {
            collect_table_with_joins(table_with_joins, tables, local_names);
        }
        _ => {}
    }
}

/// Keyword-driven token scan: names following FROM or JOIN.
fn scan_table_tokens(sql: &str, tables: &mut HashSet<String>) {
    let tokens: Vec<String> = sql
        .split(|c: char| c.is_whitespace() || c == ',' || c == '(' || c == ')')
        .filter(|t| !t.is_empty())
        .map(|t| t.trim_matches(';').to_string())
        .filter(|t| !t.is_empty())
        .collect();

    for (i, token) in tokens.iter().enumerate() {
        let upper = token.to_uppercase();
        if upper != "FROM" && upper != "JOIN" {
            continue;
        }
        if let Some(next) = tokens.get(i + 1) {
            let candidate = next.split('.').last().unwrap_or(next).to_uppercase();
            if candidate.is_empty()
                || SQL_KEYWORDS.contains(&candidate.as_str())
                || candidate.starts_with('\'')
                || candidate.chars().next().is_some_and(|c| c.is_ascii_digit())
            {
                continue;
            }
            if candidate
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '$')
            {
                tables.insert(candidate);
            }
        }
    }
}
