//! Command-line front end for the query core.
//!
//! Wires the engine to a dry-run executor so the templated pipeline can be
//! exercised end to end without a database: classify a question, render and
//! validate its SQL, normalize for Firebird, or check a rollout decision.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use immoquery::{
    ConfigStore, EngineConfig, FirebirdNormalizer, IntentClassifier, ParameterSanitizer,
    PatternCatalog, QueryEngine, RolloutConfig, Router, SecureTemplateRenderer,
    SqlSecurityValidator, SqlExecutor, TemplateCatalog, TemplateId,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "immoquery", about = "Templated NL-to-SQL query core")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a question through the full pipeline with a dry-run executor
    Ask {
        question: String,
        /// User id for the rollout decision
        #[arg(long, default_value = "cli")]
        user: String,
        /// Optional JSON config with feature flags and rollout settings
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Classify a question and print the result as JSON
    Classify { question: String },
    /// Render a template with name=value parameters
    Render {
        /// Template id, e.g. mieter_by_owner
        template: String,
        /// Parameters as name=value pairs
        #[arg(value_parser = parse_key_value)]
        params: Vec<(String, String)>,
    },
    /// Validate a SQL statement against an allow-list of tables
    Validate {
        sql: String,
        /// Allowed tables (defaults to the builtin schema tables)
        #[arg(long)]
        tables: Vec<String>,
    },
    /// Rewrite a statement into Firebird dialect
    Normalize { sql: String },
    /// Show the deterministic rollout decision for a user
    Route {
        user: String,
        #[arg(long, default_value_t = 100)]
        percentage: u8,
        #[arg(long, default_value = "")]
        salt: String,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))
}

/// Logs the statement it would run and returns no rows.
struct DryRunExecutor;

#[async_trait]
impl SqlExecutor for DryRunExecutor {
    async fn execute(
        &self,
        sql: &str,
        allowed_tables: &[String],
    ) -> immoquery::Result<Vec<serde_json::Value>> {
        info!(sql, ?allowed_tables, "dry run: statement not executed");
        Ok(Vec::new())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Ask {
            question,
            user,
            config,
        } => {
            let store = match config {
                Some(path) => ConfigStore::new(
                    EngineConfig::from_json_file(&path)
                        .with_context(|| format!("loading config {}", path.display()))?,
                ),
                None => ConfigStore::default(),
            };
            let engine = QueryEngine::new(Arc::new(DryRunExecutor)).with_config(Arc::new(store));
            let result = engine.process(&question, Some(&user)).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Classify { question } => {
            let classifier = IntentClassifier::new(Arc::new(PatternCatalog::builtin()));
            let result = classifier.classify(&question);
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Render { template, params } => {
            let id = TemplateId::all()
                .iter()
                .copied()
                .find(|t| t.as_str() == template)
                .ok_or_else(|| anyhow!("unknown template '{template}'"))?;
            let catalog = Arc::new(TemplateCatalog::builtin());
            let sanitizer = ParameterSanitizer::new();
            let contract = catalog.get(id)?.contract.clone();
            let mut bindings = Vec::new();
            for (name, value) in &params {
                let ty = contract
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, t)| t.clone())
                    .ok_or_else(|| anyhow!("template has no parameter '{name}'"))?;
                bindings.push(sanitizer.sanitize(name, &ty, value)?);
            }
            let rendered = SecureTemplateRenderer::new(catalog).render(id, &bindings)?;
            println!("{}", rendered.sql);
        }
        Command::Validate { sql, tables } => {
            let tables = if tables.is_empty() {
                ["BEWOHNER", "EIGENTUEMER", "OBJEKTE", "WOHNUNG", "KONTEN", "BUCHUNG"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            } else {
                tables
            };
            let result = SqlSecurityValidator::new().validate(&sql, &tables);
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Normalize { sql } => {
            let (rewritten, issues) = FirebirdNormalizer::new().normalize(&sql);
            println!("{rewritten}");
            for issue in issues {
                eprintln!("[{:?}] {}: {}", issue.severity, issue.code, issue.message);
            }
        }
        Command::Route {
            user,
            percentage,
            salt,
        } => {
            let rollout = RolloutConfig {
                unified_percentage: percentage,
                hash_salt: salt,
                override_users: Default::default(),
            };
            let decision = Router::new().route(&user, &rollout);
            println!("{user} -> {decision:?}");
        }
    }
    Ok(())
}
