//! Immutable pattern and template catalogs, built once at process start and
//! shared read-only across concurrent requests.

pub mod patterns;
pub mod templates;

pub use patterns::{Matcher, PatternCatalog, PatternDef, PatternId, SemanticPattern};
pub use templates::{ParamType, SqlTemplate, TemplateCatalog, TemplateId};
