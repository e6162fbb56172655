//! Query Engine
//!
//! Orchestrates one request end to end: route, classify, sanitize, render,
//! validate, normalize, execute. Strategies run in priority order --
//! semantic template, structured search, legacy fallback -- and a failure
//! in a higher-priority strategy cascades to the next instead of dropping
//! the request. The engine itself never blocks; the only suspension points
//! are the collaborator calls.

use crate::catalog::{ParamType, PatternCatalog, TemplateCatalog, TemplateId};
use crate::classifier::{ClassificationResult, IntentClassifier};
use crate::config::ConfigStore;
use crate::dialect::{FirebirdNormalizer, SchemaInfo};
use crate::error::{QueryError, Result};
use crate::metrics::EngineMetrics;
use crate::renderer::SecureTemplateRenderer;
use crate::router::{ProcessingMode, RouteDecision, Router};
use crate::sanitizer::{ParameterBinding, ParameterSanitizer};
use crate::validator::{Severity, SqlSecurityValidator};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Flat per-query cost estimates, used for the rolling cost aggregates.
const SEMANTIC_COST: f64 = 0.0001;
const SEARCH_COST: f64 = 0.0002;
const LEGACY_COST: f64 = 0.02;

/// Confidence reported for the generic structured-search strategy.
const SEARCH_CONFIDENCE: f64 = 0.4;

/// Executes read-only SQL against the Firebird database. The engine hands
/// it the final statement plus the allow-list it was validated against and
/// never retries on the executor's behalf.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(
        &self,
        sql: &str,
        allowed_tables: &[String],
    ) -> Result<Vec<serde_json::Value>>;
}

/// Turns result rows into natural-language prose. Opaque cost/latency
/// contributor; the engine only forwards its output.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(
        &self,
        rows: &[serde_json::Value],
        query_type: &str,
        question: &str,
    ) -> Result<String>;
}

/// Legacy processing path (e.g., the pre-rollout LLM pipeline).
#[async_trait]
pub trait LegacyHandler: Send + Sync {
    async fn handle(&self, question: &str) -> Result<String>;
}

/// Optional LLM-based intent extractor consulted when neither the regex
/// patterns nor the bag-of-words fallback produce a match.
#[async_trait]
pub trait IntentExtractor: Send + Sync {
    async fn extract(&self, question: &str) -> Result<Option<ClassificationResult>>;
}

/// Final per-request record. Produced once, never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct QueryEngineResult {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub processing_mode: ProcessingMode,
    pub success: bool,
    pub confidence: f64,
    pub result_count: usize,
    pub processing_time_ms: u64,
    pub cost_estimate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
}

struct StrategyOutcome {
    mode: ProcessingMode,
    confidence: f64,
    sql: Option<String>,
    rows: Vec<serde_json::Value>,
    answer: Option<String>,
    cost: f64,
}

pub struct QueryEngine {
    classifier: IntentClassifier,
    sanitizer: ParameterSanitizer,
    renderer: SecureTemplateRenderer,
    validator: SqlSecurityValidator,
    normalizer: FirebirdNormalizer,
    router: Router,
    config: Arc<ConfigStore>,
    metrics: Arc<EngineMetrics>,
    executor: Arc<dyn SqlExecutor>,
    answerer: Option<Arc<dyn AnswerGenerator>>,
    legacy: Option<Arc<dyn LegacyHandler>>,
    intent_llm: Option<Arc<dyn IntentExtractor>>,
    schema: Option<SchemaInfo>,
    strict_schema: bool,
}

impl QueryEngine {
    pub fn new(executor: Arc<dyn SqlExecutor>) -> Self {
        Self::with_catalogs(
            executor,
            Arc::new(PatternCatalog::builtin()),
            Arc::new(TemplateCatalog::builtin()),
        )
    }

    pub fn with_catalogs(
        executor: Arc<dyn SqlExecutor>,
        patterns: Arc<PatternCatalog>,
        templates: Arc<TemplateCatalog>,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(patterns),
            sanitizer: ParameterSanitizer::new(),
            renderer: SecureTemplateRenderer::new(templates),
            validator: SqlSecurityValidator::new(),
            normalizer: FirebirdNormalizer::new(),
            router: Router::new(),
            config: Arc::new(ConfigStore::default()),
            metrics: Arc::new(EngineMetrics::new()),
            executor,
            answerer: None,
            legacy: None,
            intent_llm: None,
            schema: None,
            strict_schema: false,
        }
    }

    pub fn with_config(mut self, config: Arc<ConfigStore>) -> Self {
        self.config = config;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_answer_generator(mut self, answerer: Arc<dyn AnswerGenerator>) -> Self {
        self.answerer = Some(answerer);
        self
    }

    pub fn with_legacy_handler(mut self, legacy: Arc<dyn LegacyHandler>) -> Self {
        self.legacy = Some(legacy);
        self
    }

    pub fn with_intent_extractor(mut self, extractor: Arc<dyn IntentExtractor>) -> Self {
        self.intent_llm = Some(extractor);
        self
    }

    pub fn with_schema(mut self, schema: SchemaInfo) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_strict_schema(mut self, strict: bool) -> Self {
        self.strict_schema = strict;
        self
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Process one request. Infallible by contract: every failure path
    /// resolves to a structured result, never a panic or a dropped request.
    pub async fn process(&self, text: &str, user_id: Option<&str>) -> QueryEngineResult {
        let start = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        let config = self.config.snapshot();
        let uid = user_id.unwrap_or("anonymous");

        let decision = if !config.feature_flags.unified_system_enabled {
            RouteDecision::Legacy
        } else {
            self.router.route(uid, &config.rollout)
        };
        info!(request_id, user = uid, ?decision, "processing request");

        if decision == RouteDecision::Legacy {
            return self.run_legacy(text, &request_id, start).await;
        }

        match self.try_semantic(text).await {
            Ok(outcome) => return self.finish(outcome, &request_id, start),
            Err(e) => {
                debug!(request_id, error = %e, "semantic strategy did not apply");
            }
        }

        match self.try_search(text).await {
            Ok(outcome) => self.finish(outcome, &request_id, start),
            Err(e) => {
                debug!(request_id, error = %e, "structured search did not apply");
                self.run_legacy(text, &request_id, start).await
            }
        }
    }

    /// Highest-priority strategy: dedicated semantic template match.
    async fn try_semantic(&self, text: &str) -> Result<StrategyOutcome> {
        let mut classification = self.classifier.classify(text);
        if !classification.is_match() {
            classification = self.classifier.classify_fallback(text);
        }
        if !classification.is_match() {
            if let Some(extractor) = &self.intent_llm {
                match extractor.extract(text).await {
                    Ok(Some(extracted)) if extracted.is_match() => classification = extracted,
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "intent extractor collaborator failed"),
                }
            }
        }
        let Some(template_id) = classification.template else {
            return Err(QueryError::PatternNotMatched(
                "no pattern cleared the confidence floor".to_string(),
            ));
        };

        let bindings = self.bind_parameters(template_id, &classification)?;
        let (sql, rows) = self.render_and_execute(template_id, &bindings).await?;
        let answer = self
            .generate_answer(&rows, template_id.as_str(), text)
            .await;

        Ok(StrategyOutcome {
            mode: ProcessingMode::SemanticTemplate,
            confidence: classification.confidence,
            sql: Some(sql),
            rows,
            answer,
            cost: SEMANTIC_COST,
        })
    }

    /// Mid-priority strategy: generic structured search over the tenant
    /// view, using whatever of the question survives sanitization.
    async fn try_search(&self, text: &str) -> Result<StrategyOutcome> {
        let term = self
            .sanitizer
            .sanitize("term", &ParamType::Text, text)?;
        let bindings = vec![term];
        let (sql, rows) = self
            .render_and_execute(TemplateId::StructuredSearch, &bindings)
            .await?;
        let answer = self.generate_answer(&rows, "structured_search", text).await;

        Ok(StrategyOutcome {
            mode: ProcessingMode::StructuredSearch,
            confidence: SEARCH_CONFIDENCE,
            sql: Some(sql),
            rows,
            answer,
            cost: SEARCH_COST,
        })
    }

    fn bind_parameters(
        &self,
        template_id: TemplateId,
        classification: &ClassificationResult,
    ) -> Result<Vec<ParameterBinding>> {
        let template = self.renderer.template(template_id)?;
        let mut bindings = Vec::new();
        for (name, ty) in &template.contract {
            match classification.parameters.get(name) {
                Some(raw) => bindings.push(self.sanitizer.sanitize(name, ty, raw)?),
                // Absent integers fall back to the contract default inside
                // the renderer; anything else is a MissingParameter there.
                None => continue,
            }
        }
        Ok(bindings)
    }

    /// Shared tail of both templated strategies: render, validate, schema
    /// check, normalize, execute. Fails closed on any security error.
    async fn render_and_execute(
        &self,
        template_id: TemplateId,
        bindings: &[ParameterBinding],
    ) -> Result<(String, Vec<serde_json::Value>)> {
        let rendered = self.renderer.render(template_id, bindings)?;

        let mut validation = self
            .validator
            .validate(&rendered.sql, &rendered.allowed_tables);
        if let Some(schema) = &self.schema {
            validation.merge(
                self.normalizer
                    .check_schema(&rendered.sql, schema, self.strict_schema),
            );
        }
        if !validation.is_valid {
            // Codes and blocked SQL go to the log only, never to the user.
            let codes: Vec<&str> = validation.errors().map(|i| i.code.as_str()).collect();
            error!(template = template_id.as_str(), ?codes, "rendered SQL failed validation");
            return Err(QueryError::SecurityViolation(format!(
                "template {} rejected by validator",
                template_id.as_str()
            )));
        }

        let (final_sql, rewrites) = self.normalizer.normalize(&rendered.sql);
        if !rewrites.is_empty() {
            validation.fixed_sql = Some(final_sql.clone());
            validation.merge(rewrites);
        }
        debug_assert!(validation
            .issues
            .iter()
            .all(|i| i.severity != Severity::Error));

        let rows = self
            .executor
            .execute(&final_sql, &rendered.allowed_tables)
            .await?;
        Ok((final_sql, rows))
    }

    async fn generate_answer(
        &self,
        rows: &[serde_json::Value],
        query_type: &str,
        question: &str,
    ) -> Option<String> {
        let answerer = self.answerer.as_ref()?;
        match answerer.generate(rows, query_type, question).await {
            Ok(answer) => Some(answer),
            Err(e) => {
                warn!(error = %e, "answer generator collaborator failed");
                None
            }
        }
    }

    /// Lowest-priority strategy. Without a legacy collaborator the request
    /// resolves to a generic could-not-process result.
    async fn run_legacy(
        &self,
        text: &str,
        request_id: &str,
        start: Instant,
    ) -> QueryEngineResult {
        if let Some(legacy) = &self.legacy {
            match legacy.handle(text).await {
                Ok(answer) => {
                    let outcome = StrategyOutcome {
                        mode: ProcessingMode::Legacy,
                        confidence: 0.0,
                        sql: None,
                        rows: Vec::new(),
                        answer: Some(answer),
                        cost: LEGACY_COST,
                    };
                    return self.finish(outcome, request_id, start);
                }
                Err(e) => {
                    error!(request_id, error = %e, "legacy handler failed");
                }
            }
        }
        self.metrics.record_failure();
        QueryEngineResult {
            request_id: request_id.to_string(),
            timestamp: Utc::now(),
            processing_mode: ProcessingMode::Legacy,
            success: false,
            confidence: 0.0,
            result_count: 0,
            processing_time_ms: start.elapsed().as_millis() as u64,
            cost_estimate: 0.0,
            answer: Some("Die Anfrage konnte nicht verarbeitet werden.".to_string()),
            sql: None,
        }
    }

    fn finish(
        &self,
        outcome: StrategyOutcome,
        request_id: &str,
        start: Instant,
    ) -> QueryEngineResult {
        let elapsed = start.elapsed();
        self.metrics.record(outcome.mode, elapsed, outcome.cost);
        info!(
            request_id,
            mode = outcome.mode.as_str(),
            rows = outcome.rows.len(),
            confidence = outcome.confidence,
            elapsed_ms = elapsed.as_millis() as u64,
            "request served"
        );
        QueryEngineResult {
            request_id: request_id.to_string(),
            timestamp: Utc::now(),
            processing_mode: outcome.mode,
            success: true,
            confidence: outcome.confidence,
            result_count: outcome.rows.len(),
            processing_time_ms: elapsed.as_millis() as u64,
            cost_estimate: outcome.cost,
            answer: outcome.answer,
            sql: outcome.sql,
        }
    }
}
