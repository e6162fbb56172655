//! Semantic Pattern Catalog
//!
//! Regex/keyword matchers that recognize business questions and map them to
//! SQL templates. Pattern ids are a closed enum built at catalog load, so a
//! stringly-typed "unknown pattern" lookup cannot occur at request time.

use crate::catalog::templates::TemplateId;
use crate::error::{QueryError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternId {
    MieterByOwner,
    MieterByLocation,
    EigentuemerByObjekt,
    LeerstandByObjekt,
    KostenByKategorie,
    ObjektDetails,
    MieterKontakt,
}

impl PatternId {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternId::MieterByOwner => "mieter_by_owner",
            PatternId::MieterByLocation => "mieter_by_location",
            PatternId::EigentuemerByObjekt => "eigentuemer_by_objekt",
            PatternId::LeerstandByObjekt => "leerstand_by_objekt",
            PatternId::KostenByKategorie => "kosten_by_kategorie",
            PatternId::ObjektDetails => "objekt_details",
            PatternId::MieterKontakt => "mieter_kontakt",
        }
    }
}

/// One matcher attempt: either a compiled regex whose capture groups fill
/// parameter slots by position, or a keyword set that must all be present.
#[derive(Debug, Clone)]
pub enum Matcher {
    Regex(Regex),
    Keywords(Vec<String>),
}

/// Immutable pattern definition. Matchers are tried in order; the first hit
/// wins for this pattern.
#[derive(Debug, Clone)]
pub struct SemanticPattern {
    pub id: PatternId,
    pub matchers: Vec<Matcher>,
    /// Parameter slots filled positionally from regex capture groups.
    pub parameter_names: Vec<String>,
    pub template: TemplateId,
    /// Static base confidence before the coverage bonus.
    pub base_confidence: f64,
}

/// Serde shape for external pattern definition files. Regexes are compiled
/// during catalog build; a bad expression fails the whole load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternDef {
    pub id: PatternId,
    #[serde(default)]
    pub regexes: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<Vec<String>>,
    pub parameter_names: Vec<String>,
    pub template: TemplateId,
    pub base_confidence: f64,
}

/// Immutable catalog, built once at startup. Reload means full rebuild.
#[derive(Debug, Clone)]
pub struct PatternCatalog {
    patterns: Vec<SemanticPattern>,
}

impl PatternCatalog {
    pub fn patterns(&self) -> &[SemanticPattern] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Build a catalog from external definitions.
    pub fn from_defs(defs: &[PatternDef]) -> Result<Self> {
        let mut patterns = Vec::with_capacity(defs.len());
        for def in defs {
            if def.base_confidence < 0.0 || def.base_confidence > 1.0 {
                return Err(QueryError::Catalog(format!(
                    "pattern '{}': base_confidence {} outside [0,1]",
                    def.id.as_str(),
                    def.base_confidence
                )));
            }
            let mut matchers = Vec::new();
            for raw in &def.regexes {
                let re = Regex::new(raw).map_err(|e| {
                    QueryError::Catalog(format!(
                        "pattern '{}': invalid regex '{}': {}",
                        def.id.as_str(),
                        raw,
                        e
                    ))
                })?;
                matchers.push(Matcher::Regex(re));
            }
            for set in &def.keywords {
                if set.is_empty() {
                    return Err(QueryError::Catalog(format!(
                        "pattern '{}': empty keyword set",
                        def.id.as_str()
                    )));
                }
                matchers.push(Matcher::Keywords(
                    set.iter().map(|k| k.to_lowercase()).collect(),
                ));
            }
            if matchers.is_empty() {
                return Err(QueryError::Catalog(format!(
                    "pattern '{}' has no matchers",
                    def.id.as_str()
                )));
            }
            patterns.push(SemanticPattern {
                id: def.id,
                matchers,
                parameter_names: def.parameter_names.clone(),
                template: def.template,
                base_confidence: def.base_confidence,
            });
        }
        Ok(Self { patterns })
    }

    /// Load pattern definitions from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let defs: Vec<PatternDef> = serde_json::from_str(&raw)?;
        Self::from_defs(&defs)
    }

    /// Builtin German patterns for the property-management domain.
    pub fn builtin() -> Self {
        let defs = vec![
            PatternDef {
                id: PatternId::MieterByOwner,
                regexes: vec![
                    r"(?i)^alle\s+mieter\s+von\s+(.+?)\s*\??$".to_string(),
                    r"(?i)^(?:welche\s+)?mieter\s+(?:hat|von)\s+(?:eigent(?:ü|ue)mer\s+)?(.+?)\s*\??$"
                        .to_string(),
                ],
                keywords: vec![vec!["mieter".to_string(), "eigentümer".to_string()]],
                parameter_names: vec!["owner".to_string()],
                template: TemplateId::MieterByOwner,
                base_confidence: 0.75,
            },
            PatternDef {
                id: PatternId::MieterByLocation,
                regexes: vec![
                    r"(?i)^(?:alle\s+)?(?:mieter|bewohner)\s+(?:in|aus)\s+(?:der\s+)?(.+?)\s*\??$"
                        .to_string(),
                    r"(?i)^wer\s+wohnt\s+(?:in|im)\s+(?:der\s+)?(.+?)\s*\??$".to_string(),
                ],
                keywords: vec![],
                parameter_names: vec!["location".to_string()],
                template: TemplateId::MieterByLocation,
                base_confidence: 0.72,
            },
            PatternDef {
                id: PatternId::EigentuemerByObjekt,
                regexes: vec![
                    r"(?i)^(?:wer\s+ist\s+|wer\s+sind\s+die\s+)?eigent(?:ü|ue)mer\s+(?:von|des|der|im)\s+(.+?)\s*\??$"
                        .to_string(),
                ],
                keywords: vec![],
                parameter_names: vec!["objekt".to_string()],
                template: TemplateId::EigentuemerByObjekt,
                base_confidence: 0.72,
            },
            PatternDef {
                id: PatternId::LeerstandByObjekt,
                regexes: vec![
                    r"(?i)^(?:leerstand|leere\s+wohnungen|freie\s+wohnungen)\s+(?:in|im|von)\s+(?:der\s+)?(.+?)\s*\??$"
                        .to_string(),
                    r"(?i)^welche\s+wohnungen\s+(?:stehen|sind)\s+(?:leer|frei)\s+(?:in|im)\s+(.+?)\s*\??$"
                        .to_string(),
                ],
                keywords: vec![],
                parameter_names: vec!["objekt".to_string()],
                template: TemplateId::LeerstandByObjekt,
                base_confidence: 0.73,
            },
            PatternDef {
                id: PatternId::KostenByKategorie,
                regexes: vec![
                    r"(?i)^(?:betriebs)?kosten\s+(?:f(?:ü|ue)r|der|in\s+kategorie)\s+(.+?)\s*\??$"
                        .to_string(),
                ],
                keywords: vec![vec!["kosten".to_string(), "kategorie".to_string()]],
                parameter_names: vec!["kategorie".to_string()],
                template: TemplateId::KostenByKategorie,
                base_confidence: 0.72,
            },
            PatternDef {
                id: PatternId::ObjektDetails,
                regexes: vec![
                    r"(?i)^(?:details|info(?:rmationen)?|daten)\s+(?:zu|(?:ü|ue)ber|zum)\s+(?:objekt\s+)?(.+?)\s*\??$"
                        .to_string(),
                ],
                keywords: vec![],
                parameter_names: vec!["objekt".to_string()],
                template: TemplateId::ObjektDetails,
                base_confidence: 0.70,
            },
            PatternDef {
                id: PatternId::MieterKontakt,
                regexes: vec![
                    r"(?i)^(?:kontakt|telefon(?:nummer)?|email|e-mail)\s+(?:von|f(?:ü|ue)r)\s+(?:mieter\s+)?(.+?)\s*\??$"
                        .to_string(),
                    r"(?i)^wie\s+erreiche\s+ich\s+(?:mieter\s+)?(.+?)\s*\??$".to_string(),
                ],
                keywords: vec![],
                parameter_names: vec!["name".to_string()],
                template: TemplateId::MieterKontakt,
                base_confidence: 0.70,
            },
        ];
        // Builtin definitions are static and known-good; a failure here is a
        // programming error caught by the catalog tests.
        Self::from_defs(&defs).expect("builtin pattern catalog must compile")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_compiles() {
        let catalog = PatternCatalog::builtin();
        assert_eq!(catalog.len(), 7);
    }

    #[test]
    fn invalid_regex_fails_catalog_load() {
        let defs = vec![PatternDef {
            id: PatternId::MieterByOwner,
            regexes: vec!["(unclosed".to_string()],
            keywords: vec![],
            parameter_names: vec!["owner".to_string()],
            template: TemplateId::MieterByOwner,
            base_confidence: 0.7,
        }];
        assert!(PatternCatalog::from_defs(&defs).is_err());
    }

    #[test]
    fn out_of_range_confidence_fails_catalog_load() {
        let defs = vec![PatternDef {
            id: PatternId::ObjektDetails,
            regexes: vec![r"details (.+)".to_string()],
            keywords: vec![],
            parameter_names: vec!["objekt".to_string()],
            template: TemplateId::ObjektDetails,
            base_confidence: 1.5,
        }];
        assert!(PatternCatalog::from_defs(&defs).is_err());
    }

    #[test]
    fn pattern_without_matchers_is_rejected() {
        let defs = vec![PatternDef {
            id: PatternId::ObjektDetails,
            regexes: vec![],
            keywords: vec![],
            parameter_names: vec![],
            template: TemplateId::ObjektDetails,
            base_confidence: 0.7,
        }];
        assert!(PatternCatalog::from_defs(&defs).is_err());
    }

    #[test]
    fn unknown_pattern_id_is_unrepresentable() {
        let raw = r#"[{"id": "steal_data", "regexes": [".*"], "parameter_names": [], "template": "mieter_by_owner", "base_confidence": 0.5}]"#;
        let res: std::result::Result<Vec<PatternDef>, _> = serde_json::from_str(raw);
        assert!(res.is_err());
    }
}
