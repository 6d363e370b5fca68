use std::collections::BTreeMap;
use thiserror::Error;

pub const WEIGHT_TOTAL_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationIssue {
    #[error("Class name required")]
    ClassNameRequired,
    #[error("At least one category required")]
    NoCategories,
    #[error("Required")]
    CategoryNameRequired,
    #[error("0–100")]
    WeightOutOfRange,
    #[error("Weights must sum to 100% (currently {0})")]
    WeightTotal(f64),
}

/// A category row as submitted by the class editor. `weight` is `None` when
/// the field was blank or not a number.
#[derive(Debug, Clone)]
pub struct CategoryDraft {
    pub id: Option<String>,
    pub name: String,
    pub weight: Option<f64>,
}

impl CategoryDraft {
    fn key(&self, index: usize) -> String {
        self.id.clone().unwrap_or_else(|| index.to_string())
    }
}

pub fn weight_total(categories: &[CategoryDraft]) -> f64 {
    categories
        .iter()
        .filter_map(|c| c.weight)
        .filter(|w| w.is_finite())
        .sum()
}

/// Checks a class before it is stored. Problems are keyed by field:
/// `name`, `categories`, `name_<id>`, `w_<id>` and `weightTotal`.
pub fn validate_class(
    name: &str,
    categories: &[CategoryDraft],
) -> BTreeMap<String, ValidationIssue> {
    let mut issues = BTreeMap::new();

    if name.trim().is_empty() {
        issues.insert("name".to_string(), ValidationIssue::ClassNameRequired);
    }
    if categories.is_empty() {
        issues.insert("categories".to_string(), ValidationIssue::NoCategories);
    }

    for (i, c) in categories.iter().enumerate() {
        let key = c.key(i);
        if c.name.trim().is_empty() {
            issues.insert(format!("name_{key}"), ValidationIssue::CategoryNameRequired);
        }
        let weight_ok = c
            .weight
            .map(|w| w.is_finite() && (0.0..=100.0).contains(&w))
            .unwrap_or(false);
        if !weight_ok {
            issues.insert(format!("w_{key}"), ValidationIssue::WeightOutOfRange);
        }
    }

    if !categories.is_empty() {
        let total = weight_total(categories);
        if (total - 100.0).abs() > WEIGHT_TOTAL_TOLERANCE {
            issues.insert("weightTotal".to_string(), ValidationIssue::WeightTotal(total));
        }
    }

    issues
}

pub fn issues_json(issues: &BTreeMap<String, ValidationIssue>) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = issues
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.to_string())))
        .collect();
    serde_json::Value::Object(map)
}
