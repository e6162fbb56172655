//! Secure Template Renderer
//!
//! Binds sanitized parameters into a catalog template. Substitution happens
//! only at the value positions the template body declares; the renderer can
//! never change which tables or columns a statement references.

use crate::catalog::{ParamType, SqlTemplate, TemplateCatalog, TemplateId};
use crate::error::{QueryError, Result};
use crate::sanitizer::ParameterBinding;
use std::sync::Arc;
use tracing::debug;

pub struct SecureTemplateRenderer {
    catalog: Arc<TemplateCatalog>,
}

impl SecureTemplateRenderer {
    pub fn new(catalog: Arc<TemplateCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    /// Render a template with the given sanitized bindings.
    ///
    /// Every parameter the contract declares must have a successful binding
    /// (or an integer default); otherwise `MissingParameter`. Rendering the
    /// same `(template_id, bindings)` pair twice is byte-identical.
    pub fn render(&self, id: TemplateId, bindings: &[ParameterBinding]) -> Result<RenderedSql> {
        let template = self.catalog.get(id)?;
        let mut sql = template.body.clone();

        for (name, ty) in &template.contract {
            let value = match bindings.iter().find(|b| b.name == *name && b.ok) {
                Some(binding) => escape_literal(&binding.value),
                None => match ty {
                    ParamType::Integer {
                        default: Some(d), ..
                    } => d.to_string(),
                    _ => return Err(QueryError::MissingParameter(name.clone())),
                },
            };
            sql = sql.replace(&format!("{{{name}}}"), &value);
        }

        // The contract loop should have consumed every slot; a leftover
        // placeholder means the catalog and body disagree.
        if let Some(pos) = sql.find('{') {
            return Err(QueryError::Catalog(format!(
                "template '{}' has unbound placeholder at byte {}",
                id.as_str(),
                pos
            )));
        }

        debug!(template = id.as_str(), "template rendered");
        Ok(RenderedSql {
            sql,
            template_id: id,
            allowed_tables: template.allowed_tables.clone(),
        })
    }

    pub fn template(&self, id: TemplateId) -> Result<&SqlTemplate> {
        self.catalog.get(id)
    }
}

/// Rendered SQL together with the allow-list it must be validated against.
#[derive(Debug, Clone)]
pub struct RenderedSql {
    pub sql: String,
    pub template_id: TemplateId,
    pub allowed_tables: Vec<String>,
}

/// Double any single quote that survived sanitization. The sanitizer strips
/// quotes for every type, so this is the last line, not the first.
fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TemplateCatalog;
    use crate::sanitizer::ParameterSanitizer;

    fn renderer() -> SecureTemplateRenderer {
        SecureTemplateRenderer::new(Arc::new(TemplateCatalog::builtin()))
    }

    fn bind(name: &str, ty: &ParamType, raw: &str) -> ParameterBinding {
        ParameterSanitizer::new().sanitize(name, ty, raw).unwrap()
    }

    #[test]
    fn renders_owner_template() {
        let r = renderer();
        let bindings = vec![bind("owner", &ParamType::PersonName, "Müller GmbH")];
        let rendered = r.render(TemplateId::MieterByOwner, &bindings).unwrap();
        assert!(rendered.sql.contains("LIKE '%Müller GmbH%'"));
        assert!(rendered.allowed_tables.contains(&"BEWOHNER".to_string()));
    }

    #[test]
    fn rendering_is_idempotent() {
        let r = renderer();
        let bindings = vec![bind("owner", &ParamType::PersonName, "Weber")];
        let a = r.render(TemplateId::MieterByOwner, &bindings).unwrap();
        let b = r.render(TemplateId::MieterByOwner, &bindings).unwrap();
        assert_eq!(a.sql, b.sql);
    }

    #[test]
    fn missing_binding_fails() {
        let r = renderer();
        let err = r.render(TemplateId::MieterByOwner, &[]).unwrap_err();
        assert!(matches!(err, QueryError::MissingParameter(ref n) if n == "owner"));
    }

    #[test]
    fn integer_default_fills_absent_limit() {
        let r = renderer();
        let bindings = vec![bind("kategorie", &ParamType::CostCategory, "Heizung")];
        let rendered = r.render(TemplateId::KostenByKategorie, &bindings).unwrap();
        assert!(rendered.sql.contains("LIMIT 50"));
    }

    #[test]
    fn explicit_limit_overrides_default() {
        let ty = ParamType::Integer {
            min: 1,
            max: 500,
            default: Some(50),
        };
        let r = renderer();
        let bindings = vec![
            bind("kategorie", &ParamType::CostCategory, "Wasser"),
            bind("limit", &ty, "10"),
        ];
        let rendered = r.render(TemplateId::KostenByKategorie, &bindings).unwrap();
        assert!(rendered.sql.contains("LIMIT 10"));
    }

    #[test]
    fn failed_binding_is_not_usable() {
        let mut binding = bind("owner", &ParamType::PersonName, "Weber");
        binding.ok = false;
        let err = renderer()
            .render(TemplateId::MieterByOwner, &[binding])
            .unwrap_err();
        assert!(matches!(err, QueryError::MissingParameter(_)));
    }

    #[test]
    fn rendered_sql_is_single_select() {
        let r = renderer();
        let bindings = vec![bind("location", &ParamType::Location, "Hamburg")];
        let rendered = r.render(TemplateId::MieterByLocation, &bindings).unwrap();
        assert!(rendered.sql.trim_start().to_uppercase().starts_with("SELECT"));
        assert!(!rendered.sql.contains(';'));
    }
}
