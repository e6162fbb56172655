//! SQL Template Catalog
//!
//! Precompiled SQL templates over the Firebird property-management schema.
//! Template ids form a closed enum so an unknown template is unrepresentable;
//! each template declares a parameter contract and the set of tables its
//! rendered SQL is allowed to touch.

use crate::error::{QueryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Closed set of template ids. Catalog definitions deserialize into this
/// enum, so a typo in a definition file fails at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateId {
    MieterByOwner,
    MieterByLocation,
    EigentuemerByObjekt,
    LeerstandByObjekt,
    KostenByKategorie,
    ObjektDetails,
    MieterKontakt,
    StructuredSearch,
}

impl TemplateId {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateId::MieterByOwner => "mieter_by_owner",
            TemplateId::MieterByLocation => "mieter_by_location",
            TemplateId::EigentuemerByObjekt => "eigentuemer_by_objekt",
            TemplateId::LeerstandByObjekt => "leerstand_by_objekt",
            TemplateId::KostenByKategorie => "kosten_by_kategorie",
            TemplateId::ObjektDetails => "objekt_details",
            TemplateId::MieterKontakt => "mieter_kontakt",
            TemplateId::StructuredSearch => "structured_search",
        }
    }

    pub fn all() -> &'static [TemplateId] {
        &[
            TemplateId::MieterByOwner,
            TemplateId::MieterByLocation,
            TemplateId::EigentuemerByObjekt,
            TemplateId::LeerstandByObjekt,
            TemplateId::KostenByKategorie,
            TemplateId::ObjektDetails,
            TemplateId::MieterKontakt,
            TemplateId::StructuredSearch,
        ]
    }
}

/// Declared type of a template parameter. Drives the sanitizer rule that a
/// raw value must clear before it may be bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamType {
    /// Person or company name: letters (incl. umlauts), space, hyphen,
    /// ampersand, period. 2-150 chars.
    PersonName,
    /// Street / city / building designation: letters, digits, space,
    /// hyphen, period.
    Location,
    /// BetrKV cost category: letters, space, hyphen.
    CostCategory,
    /// Bounded integer with explicit clamp range and an optional default
    /// used when the pattern did not extract a value.
    Integer {
        min: i64,
        max: i64,
        #[serde(default)]
        default: Option<i64>,
    },
    /// Free search term, length-bounded.
    Text,
}

/// A single SQL template: body with named `{placeholder}` slots, parameter
/// contract, and the allow-list of tables the rendered statement may
/// reference.
#[derive(Debug, Clone)]
pub struct SqlTemplate {
    pub id: TemplateId,
    pub body: String,
    /// Ordered parameter contract: placeholder name -> expected type.
    pub contract: Vec<(String, ParamType)>,
    /// Tables/views the rendered SQL is permitted to touch.
    pub allowed_tables: Vec<String>,
}

impl SqlTemplate {
    pub fn param_type(&self, name: &str) -> Option<&ParamType> {
        self.contract
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }
}

/// Immutable catalog of templates, built once at startup and shared
/// read-only across concurrent requests.
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    templates: HashMap<TemplateId, SqlTemplate>,
}

impl TemplateCatalog {
    /// Builtin templates for the property-management schema.
    ///
    /// Bodies are written in generic SQL (`LIMIT n`); the dialect
    /// normalizer rewrites them to Firebird `FIRST n` before execution.
    pub fn builtin() -> Self {
        let mut templates = HashMap::new();

        let defs: Vec<SqlTemplate> = vec![
            SqlTemplate {
                id: TemplateId::MieterByOwner,
                body: "SELECT B.NAME, B.VNAME, B.STRASSE, B.PLZ, B.ORT, O.OBEZ \
                       FROM BEWOHNER B \
                       JOIN OBJEKTE O ON B.ONR = O.ONR \
                       JOIN EIGENTUEMER E ON O.ONR = E.ONR \
                       WHERE E.NAME LIKE '%{owner}%' \
                       ORDER BY B.NAME"
                    .to_string(),
                contract: vec![("owner".to_string(), ParamType::PersonName)],
                allowed_tables: vec![
                    "BEWOHNER".to_string(),
                    "OBJEKTE".to_string(),
                    "EIGENTUEMER".to_string(),
                ],
            },
            SqlTemplate {
                id: TemplateId::MieterByLocation,
                body: "SELECT B.NAME, B.VNAME, B.STRASSE, B.PLZ, B.ORT \
                       FROM BEWOHNER B \
                       WHERE B.ORT LIKE '%{location}%' OR B.STRASSE LIKE '%{location}%' \
                       ORDER BY B.NAME"
                    .to_string(),
                contract: vec![("location".to_string(), ParamType::Location)],
                allowed_tables: vec!["BEWOHNER".to_string()],
            },
            SqlTemplate {
                id: TemplateId::EigentuemerByObjekt,
                body: "SELECT E.NAME, E.VNAME, E.STRASSE, E.PLZ, E.ORT \
                       FROM EIGENTUEMER E \
                       JOIN OBJEKTE O ON E.ONR = O.ONR \
                       WHERE O.OBEZ LIKE '%{objekt}%' OR O.OSTRASSE LIKE '%{objekt}%' \
                       ORDER BY E.NAME"
                    .to_string(),
                contract: vec![("objekt".to_string(), ParamType::Location)],
                allowed_tables: vec!["EIGENTUEMER".to_string(), "OBJEKTE".to_string()],
            },
            SqlTemplate {
                id: TemplateId::LeerstandByObjekt,
                body: "SELECT W.WBEZ, W.QM, W.ZIMMER, O.OBEZ \
                       FROM WOHNUNG W \
                       JOIN OBJEKTE O ON W.ONR = O.ONR \
                       WHERE W.LEERSTAND = 1 AND (O.OBEZ LIKE '%{objekt}%' OR O.OSTRASSE LIKE '%{objekt}%') \
                       ORDER BY W.WBEZ"
                    .to_string(),
                contract: vec![("objekt".to_string(), ParamType::Location)],
                allowed_tables: vec!["WOHNUNG".to_string(), "OBJEKTE".to_string()],
            },
            SqlTemplate {
                id: TemplateId::KostenByKategorie,
                body: "SELECT K.KBEZ, B.BTEXT, B.BETRAG, B.DATUM \
                       FROM KONTEN K \
                       JOIN BUCHUNG B ON K.KNR = B.KNR \
                       WHERE K.KBEZ LIKE '%{kategorie}%' \
                       ORDER BY B.DATUM DESC \
                       LIMIT {limit}"
                    .to_string(),
                contract: vec![
                    ("kategorie".to_string(), ParamType::CostCategory),
                    (
                        "limit".to_string(),
                        ParamType::Integer {
                            min: 1,
                            max: 500,
                            default: Some(50),
                        },
                    ),
                ],
                allowed_tables: vec!["KONTEN".to_string(), "BUCHUNG".to_string()],
            },
            SqlTemplate {
                id: TemplateId::ObjektDetails,
                body: "SELECT O.ONR, O.OBEZ, O.OSTRASSE, O.OPLZORT, O.GA1 \
                       FROM OBJEKTE O \
                       WHERE O.OBEZ LIKE '%{objekt}%' OR O.OSTRASSE LIKE '%{objekt}%'"
                    .to_string(),
                contract: vec![("objekt".to_string(), ParamType::Location)],
                allowed_tables: vec!["OBJEKTE".to_string()],
            },
            SqlTemplate {
                id: TemplateId::MieterKontakt,
                body: "SELECT B.NAME, B.VNAME, B.BTEL, B.BHANDY, B.BEMAIL \
                       FROM BEWOHNER B \
                       WHERE B.NAME LIKE '%{name}%' OR B.VNAME LIKE '%{name}%' \
                       ORDER BY B.NAME"
                    .to_string(),
                contract: vec![("name".to_string(), ParamType::PersonName)],
                allowed_tables: vec!["BEWOHNER".to_string()],
            },
            // Mid-priority strategy: generic tenant search when no
            // dedicated pattern fires. Same sanitize/validate pipeline.
            SqlTemplate {
                id: TemplateId::StructuredSearch,
                body: "SELECT B.NAME, B.VNAME, B.STRASSE, B.PLZ, B.ORT \
                       FROM BEWOHNER B \
                       WHERE B.NAME LIKE '%{term}%' OR B.ORT LIKE '%{term}%' OR B.STRASSE LIKE '%{term}%' \
                       LIMIT {limit}"
                    .to_string(),
                contract: vec![
                    ("term".to_string(), ParamType::Text),
                    (
                        "limit".to_string(),
                        ParamType::Integer {
                            min: 1,
                            max: 200,
                            default: Some(50),
                        },
                    ),
                ],
                allowed_tables: vec!["BEWOHNER".to_string()],
            },
        ];

        for t in defs {
            templates.insert(t.id, t);
        }
        Self { templates }
    }

    pub fn get(&self, id: TemplateId) -> Result<&SqlTemplate> {
        self.templates
            .get(&id)
            .ok_or_else(|| QueryError::Catalog(format!("template '{}' not in catalog", id.as_str())))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
