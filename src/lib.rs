//! immoquery - templated NL-to-SQL core for a property-management dataset
//!
//! Free-text business questions are classified against an immutable pattern
//! catalog, extracted parameters are sanitized against per-type allow-list
//! rules, and recognized intent is rendered into parameterized SQL that a
//! two-phase security validator (keyword blacklist plus table whitelist)
//! must clear before a Firebird dialect pass rewrites it for execution. A
//! deterministic feature-flag router decides per user whether the templated
//! pipeline handles a request or the legacy collaborator does.

pub mod catalog;
pub mod classifier;
pub mod config;
pub mod dialect;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod renderer;
pub mod router;
pub mod sanitizer;
pub mod validator;

pub use catalog::{ParamType, PatternCatalog, PatternId, TemplateCatalog, TemplateId};
pub use classifier::{ClassificationResult, IntentClassifier};
pub use config::{ConfigStore, EngineConfig, FeatureFlags, RolloutConfig};
pub use dialect::{FirebirdNormalizer, SchemaInfo};
pub use engine::{
    AnswerGenerator, IntentExtractor, LegacyHandler, QueryEngine, QueryEngineResult, SqlExecutor,
};
pub use error::{QueryError, Result};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use renderer::SecureTemplateRenderer;
pub use router::{ProcessingMode, RouteDecision, Router};
pub use sanitizer::{ParameterBinding, ParameterSanitizer};
pub use validator::{Severity, SqlSecurityValidator, ValidationIssue, ValidationResult};
