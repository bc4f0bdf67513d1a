//! Schema, range, and domain-logic checks for single annotations.
//!
//! Validation is pure: it never mutates or drops anything. The batch entry
//! point returns the accepted annotations alongside a report listing every
//! violation so a human can review and correct the offending items.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::VocabularyConfig;
use crate::constants::validation::{
    AMBIGUOUS_CONFIDENCE_WARN, REPEAT_RATING_WARNING, UNKNOWN_ITEM_PREFIX,
};
use crate::data::{
    AnnotationFlags, Category, ContentContext, LanguageTag, RawAnnotation, Severity,
};
use crate::types::{AnnotatorId, FieldName, ItemId, LogMessage};
use crate::utils::is_blank;

/// Violation taxonomy for per-record problems.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ViolationKind {
    /// Missing/mistyped field or value outside a fixed vocabulary.
    SchemaViolation,
    /// A named domain invariant does not hold.
    LogicViolation,
    /// Numeric or ordinal value outside its allowed range.
    RangeViolation,
}

/// One rejected annotation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Which rule family failed.
    pub kind: ViolationKind,
    /// Offending item, or a `<line N of FILE>` placeholder when unreadable.
    pub item_id: ItemId,
    /// Offending field, if the problem is field-specific.
    pub field: Option<FieldName>,
    /// Human-readable explanation.
    pub message: String,
    /// Input file the annotation came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    /// 1-based line within `source`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl Violation {
    fn new(kind: ViolationKind, item_id: &str, field: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            item_id: item_id.to_string(),
            field: Some(field.to_string()),
            message: message.into(),
            source: None,
            line: None,
        }
    }

    fn schema(item_id: &str, field: &str, message: impl Into<String>) -> Self {
        Self::new(ViolationKind::SchemaViolation, item_id, field, message)
    }

    fn range(item_id: &str, field: &str, message: impl Into<String>) -> Self {
        Self::new(ViolationKind::RangeViolation, item_id, field, message)
    }

    fn logic(item_id: &str, field: &str, message: impl Into<String>) -> Self {
        Self::new(ViolationKind::LogicViolation, item_id, field, message)
    }
}

/// Non-blocking quality warning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationWarning {
    /// Item the warning refers to.
    pub item_id: ItemId,
    /// Annotator whose rating triggered it.
    pub annotator_id: AnnotatorId,
    /// Human-readable explanation.
    pub message: LogMessage,
}

/// One parsed input line, before schema checks.
#[derive(Clone, Debug)]
pub struct AnnotationRow {
    /// File the line was read from.
    pub source: PathBuf,
    /// 1-based line number.
    pub line: usize,
    /// Parsed JSON object.
    pub value: Value,
}

/// Count and offending ids for one violation kind.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KindSummary {
    /// Number of violations of this kind.
    pub count: usize,
    /// Distinct items (or line placeholders) that hit this kind.
    pub item_ids: BTreeSet<ItemId>,
}

/// Batch validation report.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Annotations examined.
    pub total: usize,
    /// Annotations that passed every check.
    pub valid: usize,
    /// Per-kind counts and offending ids.
    pub by_kind: BTreeMap<ViolationKind, KindSummary>,
    /// Every violation in input order.
    pub violations: Vec<Violation>,
    /// Non-blocking warnings in input order.
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    /// Annotations rejected by at least one check.
    pub fn invalid(&self) -> usize {
        self.total - self.valid
    }

    /// Item ids blocked from merging because at least one annotation failed.
    pub fn blocked_items(&self) -> BTreeSet<ItemId> {
        self.violations
            .iter()
            .filter(|v| !v.item_id.starts_with(UNKNOWN_ITEM_PREFIX))
            .map(|v| v.item_id.clone())
            .collect()
    }

    fn record(&mut self, violation: Violation) {
        let summary = self.by_kind.entry(violation.kind).or_default();
        summary.count += 1;
        summary.item_ids.insert(violation.item_id.clone());
        self.violations.push(violation);
    }
}

/// Accepted annotations plus the report for the rest.
#[derive(Clone, Debug)]
pub struct ValidationOutcome {
    /// Annotations that passed, in input order.
    pub accepted: Vec<RawAnnotation>,
    /// Counts, violations and warnings for the batch.
    pub report: ValidationReport,
}

/// Stateless validator bound to one vocabulary.
#[derive(Clone, Debug, Default)]
pub struct RecordValidator {
    vocabulary: VocabularyConfig,
}

impl RecordValidator {
    /// Validator that accepts secondary tags from `vocabulary`.
    pub fn new(vocabulary: VocabularyConfig) -> Self {
        Self { vocabulary }
    }

    /// Check a typed annotation against range, vocabulary, and logic rules.
    pub fn validate(&self, annotation: &RawAnnotation) -> Result<(), Violation> {
        let id = annotation.item_id.as_str();
        if is_blank(Some(id)) {
            return Err(Violation::schema(id, "item_id", "item_id must not be empty"));
        }
        if is_blank(Some(&annotation.annotator_id)) {
            return Err(Violation::schema(
                id,
                "annotator_id",
                "annotator_id must not be empty",
            ));
        }
        if is_blank(Some(&annotation.text)) && is_blank(annotation.url.as_deref()) {
            return Err(Violation::schema(
                id,
                "text",
                "record needs non-empty text or url",
            ));
        }
        if let Some(tag) = annotation
            .secondary_tags
            .iter()
            .find(|tag| !self.vocabulary.secondary_tags.contains(*tag))
        {
            return Err(Violation::schema(
                id,
                "secondary_tags",
                format!("secondary tag '{tag}' is not in the vocabulary"),
            ));
        }
        if !annotation.confidence.is_finite() || !(0.0..=1.0).contains(&annotation.confidence) {
            return Err(Violation::range(
                id,
                "confidence",
                format!("confidence {} outside [0, 1]", annotation.confidence),
            ));
        }
        let benign = annotation.primary_category.is_benign();
        match annotation.severity {
            None if !benign => {
                return Err(Violation::schema(
                    id,
                    "severity",
                    format!(
                        "severity is required for category '{}'",
                        annotation.primary_category
                    ),
                ));
            }
            Some(severity) if benign && severity != Severity::Low => {
                return Err(Violation::logic(
                    id,
                    "severity",
                    format!("benign content cannot have {severity} severity"),
                ));
            }
            _ => {}
        }
        if benign
            && annotation.flags.contains_identifying_info
            && is_blank(annotation.notes.as_deref())
        {
            return Err(Violation::logic(
                id,
                "flags.contains_identifying_info",
                "identifying info on benign content needs a note explaining why",
            ));
        }
        Ok(())
    }

    /// Quality warnings that never block a record.
    pub fn warnings(&self, annotation: &RawAnnotation) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();
        if annotation.flags.is_ambiguous_tone && annotation.confidence > AMBIGUOUS_CONFIDENCE_WARN
        {
            warnings.push(ValidationWarning {
                item_id: annotation.item_id.clone(),
                annotator_id: annotation.annotator_id.clone(),
                message: format!(
                    "ambiguous tone with confidence {:.2} looks contradictory",
                    annotation.confidence
                ),
            });
        }
        warnings
    }

    /// Extract a typed annotation from a JSON object, then run [`Self::validate`].
    pub fn validate_value(&self, value: &Value, line: usize) -> Result<RawAnnotation, Violation> {
        self.extract(value, format!("{UNKNOWN_ITEM_PREFIX}{line}>"))
    }

    /// Like [`Self::validate_value`], with violations tagged by file and line.
    pub fn validate_row(&self, row: &AnnotationRow) -> Result<RawAnnotation, Violation> {
        let unknown = format!(
            "{UNKNOWN_ITEM_PREFIX}{} of {}>",
            row.line,
            row.source.display()
        );
        self.extract(&row.value, unknown).map_err(|mut violation| {
            violation.source = Some(row.source.clone());
            violation.line = Some(row.line);
            violation
        })
    }

    fn extract(&self, value: &Value, unknown: String) -> Result<RawAnnotation, Violation> {
        let Some(object) = value.as_object() else {
            return Err(Violation {
                kind: ViolationKind::SchemaViolation,
                item_id: unknown,
                field: None,
                message: "record is not a JSON object".to_string(),
                source: None,
                line: None,
            });
        };
        let item_id = match object.get("item_id").and_then(Value::as_str) {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => {
                return Err(Violation::schema(
                    &unknown,
                    "item_id",
                    "missing or non-string item_id",
                ));
            }
        };
        let fields = Fields {
            object,
            item_id: &item_id,
        };

        let severity = match object.get("severity") {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) => Some(
                Severity::from_str(raw)
                    .map_err(|err| Violation::range(&item_id, "severity", err))?,
            ),
            Some(_) => {
                return Err(Violation::schema(
                    &item_id,
                    "severity",
                    "severity must be a string",
                ));
            }
        };
        let confidence = fields
            .required("confidence")?
            .as_f64()
            .ok_or_else(|| Violation::schema(&item_id, "confidence", "confidence must be a number"))?;
        let created_raw = fields.required_str("created_at")?;
        let created_at = DateTime::parse_from_rfc3339(created_raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|err| {
                Violation::schema(&item_id, "created_at", format!("invalid timestamp: {err}"))
            })?;

        let annotation = RawAnnotation {
            annotator_id: fields.required_str("annotator_id")?.to_string(),
            text: fields.optional_str("text")?.unwrap_or_default().to_string(),
            url: fields.optional_str("url")?.map(str::to_string),
            primary_category: fields.vocabulary::<Category>("primary_category")?,
            secondary_tags: fields.string_set("secondary_tags")?,
            severity,
            language_tag: fields.vocabulary::<LanguageTag>("language_tag")?,
            context: match fields.optional_str("context")? {
                Some(raw) => Some(
                    ContentContext::from_str(raw)
                        .map_err(|err| Violation::schema(&item_id, "context", err))?,
                ),
                None => None,
            },
            confidence,
            flags: fields.flags()?,
            notes: fields.optional_str("notes")?.map(str::to_string),
            adjudication: fields.optional_bool("adjudication")?.unwrap_or(false),
            created_at,
            item_id: item_id.clone(),
        };
        self.validate(&annotation)?;
        Ok(annotation)
    }

    /// Validate every row in parallel; results keep input order.
    ///
    /// A repeat rating of one item by the same annotator is accepted with a
    /// warning; merging counts only the first one.
    pub fn validate_batch(&self, rows: &[AnnotationRow]) -> ValidationOutcome {
        let results: Vec<Result<RawAnnotation, Violation>> =
            rows.par_iter().map(|row| self.validate_row(row)).collect();

        let mut report = ValidationReport {
            total: rows.len(),
            ..ValidationReport::default()
        };
        let mut accepted = Vec::with_capacity(rows.len());
        let mut rated: HashSet<(ItemId, AnnotatorId)> = HashSet::new();
        for result in results {
            match result {
                Ok(annotation) => {
                    report.warnings.extend(self.warnings(&annotation));
                    let key = (annotation.item_id.clone(), annotation.annotator_id.clone());
                    if !rated.insert(key) {
                        report.warnings.push(ValidationWarning {
                            item_id: annotation.item_id.clone(),
                            annotator_id: annotation.annotator_id.clone(),
                            message: REPEAT_RATING_WARNING.to_string(),
                        });
                    }
                    accepted.push(annotation);
                }
                Err(violation) => report.record(violation),
            }
        }
        report.valid = accepted.len();
        ValidationOutcome { accepted, report }
    }
}

/// Field accessors that turn shape problems into schema violations.
struct Fields<'a> {
    object: &'a Map<String, Value>,
    item_id: &'a str,
}

impl<'a> Fields<'a> {
    fn required(&self, field: &str) -> Result<&'a Value, Violation> {
        match self.object.get(field) {
            None | Some(Value::Null) => Err(Violation::schema(
                self.item_id,
                field,
                format!("missing required field '{field}'"),
            )),
            Some(value) => Ok(value),
        }
    }

    fn required_str(&self, field: &str) -> Result<&'a str, Violation> {
        self.required(field)?.as_str().ok_or_else(|| {
            Violation::schema(self.item_id, field, format!("'{field}' must be a string"))
        })
    }

    fn optional_str(&self, field: &str) -> Result<Option<&'a str>, Violation> {
        match self.object.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(raw)) => Ok(Some(raw.as_str())),
            Some(_) => Err(Violation::schema(
                self.item_id,
                field,
                format!("'{field}' must be a string"),
            )),
        }
    }

    fn optional_bool(&self, field: &str) -> Result<Option<bool>, Violation> {
        match self.object.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(flag)) => Ok(Some(*flag)),
            Some(_) => Err(Violation::schema(
                self.item_id,
                field,
                format!("'{field}' must be a boolean"),
            )),
        }
    }

    fn vocabulary<T>(&self, field: &str) -> Result<T, Violation>
    where
        T: FromStr<Err = String>,
    {
        T::from_str(self.required_str(field)?)
            .map_err(|err| Violation::schema(self.item_id, field, err))
    }

    fn string_set(&self, field: &str) -> Result<BTreeSet<String>, Violation> {
        match self.object.get(field) {
            None | Some(Value::Null) => Ok(BTreeSet::new()),
            Some(Value::Array(values)) => values
                .iter()
                .map(|value| {
                    value.as_str().map(str::to_string).ok_or_else(|| {
                        Violation::schema(
                            self.item_id,
                            field,
                            format!("'{field}' must contain only strings"),
                        )
                    })
                })
                .collect(),
            Some(_) => Err(Violation::schema(
                self.item_id,
                field,
                format!("'{field}' must be an array"),
            )),
        }
    }

    fn flags(&self) -> Result<AnnotationFlags, Violation> {
        let flags = match self.object.get("flags") {
            None | Some(Value::Null) => return Ok(AnnotationFlags::default()),
            Some(Value::Object(flags)) => flags,
            Some(_) => {
                return Err(Violation::schema(
                    self.item_id,
                    "flags",
                    "'flags' must be an object",
                ));
            }
        };
        let nested = Fields {
            object: flags,
            item_id: self.item_id,
        };
        Ok(AnnotationFlags {
            contains_identifying_info: nested
                .optional_bool("contains_identifying_info")?
                .unwrap_or(false),
            requires_additional_context: nested
                .optional_bool("requires_additional_context")?
                .unwrap_or(false),
            is_ambiguous_tone: nested.optional_bool("is_ambiguous_tone")?.unwrap_or(false),
        })
    }
}
