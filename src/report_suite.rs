//! Report-info documents and the structural comparison between a produced
//! report and its golden fixture.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_yaml_bw as serde_yaml;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::diff::{self, ValueDiff};

/// Annotation names whose values legitimately differ between a fixture run
/// and a live run.
pub const DEFAULT_VOLATILE_ANNOTATIONS: &[&str] = &[
    "charts.openshift.io/lastCertifiedTimestamp",
    "charts.openshift.io/testedOpenShiftVersion",
];

/// Metadata sub-keys allowed to differ. A chart can be served from a local
/// path in one run and over HTTP in another.
pub const DEFAULT_VOLATILE_METADATA: &[&str] = &["chart-uri"];

/// One `{name, value}` annotation record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Annotation {
    pub name: String,
    pub value: String,
}

/// The four-section report-info document emitted by the verifier's `report`
/// subcommand.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReportInfo {
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub digests: Value,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub results: Value,
}

impl ReportInfo {
    pub fn from_json(raw: &str) -> Result<Self> {
        let mut info: Self =
            serde_json::from_str(raw).context("failed to decode report info JSON")?;
        info.normalize();
        Ok(info)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let mut info: Self =
            serde_yaml::from_str(raw).context("failed to decode report info YAML")?;
        info.normalize();
        Ok(info)
    }

    /// Loads a document, picking the format from the file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read report info {}", path.display()))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => Self::from_yaml(&raw),
            _ => Self::from_json(&raw),
        }
    }

    // Count fields arrive as strings from some verifier builds. Fold them to
    // integers so fixtures written either way compare equal.
    fn normalize(&mut self) {
        if let Value::Object(results) = &mut self.results {
            for key in ["passed", "failed"] {
                if let Some(value) = results.get_mut(key)
                    && let Some(text) = value.as_str()
                    && let Ok(count) = text.trim().parse::<i64>()
                {
                    *value = Value::from(count);
                }
            }
        }
    }

    pub fn annotation_map(&self) -> BTreeMap<&str, &str> {
        self.annotations
            .iter()
            .map(|annotation| (annotation.name.as_str(), annotation.value.as_str()))
            .collect()
    }

    /// Passed/failed counts, when the results section carries them.
    pub fn result_counts(&self) -> Option<(i64, i64)> {
        let results = self.results.as_object()?;
        let passed = results.get("passed")?.as_i64()?;
        let failed = results.get("failed")?.as_i64()?;
        Some((passed, failed))
    }
}

/// Tolerances applied when comparing two report-info documents.
#[derive(Debug, Clone)]
pub struct ReportCompareOptions {
    pub volatile_annotations: BTreeSet<String>,
    pub volatile_metadata: BTreeSet<String>,
}

impl Default for ReportCompareOptions {
    fn default() -> Self {
        Self {
            volatile_annotations: DEFAULT_VOLATILE_ANNOTATIONS
                .iter()
                .map(|name| name.to_string())
                .collect(),
            volatile_metadata: DEFAULT_VOLATILE_METADATA
                .iter()
                .map(|key| key.to_string())
                .collect(),
        }
    }
}

impl ReportCompareOptions {
    /// No tolerances at all; every shared field must match.
    pub fn strict() -> Self {
        Self {
            volatile_annotations: BTreeSet::new(),
            volatile_metadata: BTreeSet::new(),
        }
    }

    pub fn allow_annotation_drift(mut self, name: impl Into<String>) -> Self {
        self.volatile_annotations.insert(name.into());
        self
    }

    pub fn allow_metadata_drift(mut self, key: impl Into<String>) -> Self {
        self.volatile_metadata.insert(key.into());
        self
    }

    /// Compares section by section, accumulating every discrepancy rather
    /// than stopping at the first.
    pub fn compare(&self, expected: &ReportInfo, actual: &ReportInfo) -> ReportComparison {
        let mut discrepancies = Vec::new();

        let results = diff::diff(&expected.results, &actual.results);
        if !results.is_empty() {
            discrepancies.push(Discrepancy::Results { diff: results });
        }

        let expected_map = expected.annotation_map();
        let actual_map = actual.annotation_map();
        let missing: Vec<String> = expected_map
            .keys()
            .filter(|name| !actual_map.contains_key(**name))
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            discrepancies.push(Discrepancy::MissingAnnotations { names: missing });
        }
        let extra: Vec<String> = actual_map
            .keys()
            .filter(|name| !expected_map.contains_key(**name))
            .map(|name| name.to_string())
            .collect();
        if !extra.is_empty() {
            discrepancies.push(Discrepancy::ExtraAnnotations { names: extra });
        }
        for (name, expected_value) in &expected_map {
            if self.volatile_annotations.contains(*name) {
                continue;
            }
            if let Some(actual_value) = actual_map.get(name)
                && actual_value != expected_value
            {
                discrepancies.push(Discrepancy::AnnotationValue {
                    name: name.to_string(),
                    expected: expected_value.to_string(),
                    actual: actual_value.to_string(),
                });
            }
        }

        let digests = diff::diff(&expected.digests, &actual.digests);
        if !digests.is_empty() {
            discrepancies.push(Discrepancy::Digests { diff: digests });
        }

        for (key, expected_value) in &expected.metadata {
            if self.volatile_metadata.contains(key) {
                continue;
            }
            let actual_value = actual.metadata.get(key).cloned().unwrap_or(Value::Null);
            let entry = diff::diff(expected_value, &actual_value);
            if !entry.is_empty() {
                discrepancies.push(Discrepancy::Metadata {
                    key: key.clone(),
                    diff: entry,
                });
            }
        }

        ReportComparison { discrepancies }
    }
}

/// One recorded difference between an expected and an actual report.
#[derive(Debug, Clone, PartialEq)]
pub enum Discrepancy {
    Results { diff: ValueDiff },
    MissingAnnotations { names: Vec<String> },
    ExtraAnnotations { names: Vec<String> },
    AnnotationValue {
        name: String,
        expected: String,
        actual: String,
    },
    Digests { diff: ValueDiff },
    Metadata { key: String, diff: ValueDiff },
}

impl Discrepancy {
    /// Which report section the discrepancy belongs to.
    pub fn section(&self) -> &str {
        match self {
            Discrepancy::Results { .. } => "results",
            Discrepancy::MissingAnnotations { .. }
            | Discrepancy::ExtraAnnotations { .. }
            | Discrepancy::AnnotationValue { .. } => "annotations",
            Discrepancy::Digests { .. } => "digests",
            Discrepancy::Metadata { .. } => "metadata",
        }
    }
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discrepancy::Results { diff } => write!(f, "difference found in results: {diff}"),
            Discrepancy::MissingAnnotations { names } => {
                write!(f, "missing annotations: {}", names.join(", "))
            }
            Discrepancy::ExtraAnnotations { names } => {
                write!(f, "unexpected annotations: {}", names.join(", "))
            }
            Discrepancy::AnnotationValue {
                name,
                expected,
                actual,
            } => write!(
                f,
                "annotation {name} differs: expected {expected}, got {actual}"
            ),
            Discrepancy::Digests { diff } => write!(f, "difference found in digests: {diff}"),
            Discrepancy::Metadata { key, diff } => {
                write!(f, "difference found in {key} metadata: {diff}")
            }
        }
    }
}

/// Comparison outcome carrying every discrepancy found.
#[derive(Debug, Clone, Default)]
pub struct ReportComparison {
    pub discrepancies: Vec<Discrepancy>,
}

impl ReportComparison {
    pub fn passed(&self) -> bool {
        self.discrepancies.is_empty()
    }

    pub fn summary(&self) -> String {
        self.discrepancies
            .iter()
            .map(|discrepancy| discrepancy.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Compares with the default tolerances.
pub fn compare_reports(expected: &ReportInfo, actual: &ReportInfo) -> ReportComparison {
    ReportCompareOptions::default().compare(expected, actual)
}
