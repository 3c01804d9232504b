//! Declarative, rule-based insight generation.
//!
//! A rule pairs a [`Condition`] over dataset statistics with a fixed
//! headline template. Rules run in registry order; a rule whose statistic
//! is undefined (for example an empty subset) is skipped.

use serde::Serialize;
use tracing::debug;

use crate::data::Record;
use crate::error::Result;
use crate::kpi::row_ratio;
use crate::schema::{DatasetKind, SchemaRegistry};
use crate::stats;
use crate::store::DatasetStore;

/// A finding produced by a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Insight {
    pub rule: String,
    pub category: String,
    pub insight: String,
}

/// Row filter. Thresholds are computed over the rows that reach the filter,
/// so a chain of filters narrows step by step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Filter {
    /// Keep rows whose value is above the column mean.
    AboveMean(&'static str),
    /// Keep rows whose value is above the given quantile of the column.
    AboveQuantile(&'static str, f64),
    /// Keep rows whose value is below the given quantile of the column.
    BelowQuantile(&'static str, f64),
    /// Keep rows whose value equals the constant.
    Equals(&'static str, f64),
}

/// Statistic evaluated over (a subset of) the dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Statistic {
    Mean {
        column: &'static str,
        filters: &'static [Filter],
    },
    /// Mean of the row-wise ratio; zero denominators are excluded.
    MeanRatio {
        numerator: &'static str,
        denominator: &'static str,
    },
    Mode(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Condition {
    /// Statistic is strictly below a constant.
    LessThan(Statistic, f64),
    /// First statistic is strictly below the second.
    LessThanStatistic(Statistic, Statistic),
    /// The filtered subset has at least one row.
    NonEmpty(&'static [Filter]),
    /// Always fires while the statistic is defined; its value fills `{value}`.
    Report(Statistic),
}

/// How `{value}` is rendered in a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueFormat {
    Plain,
    /// Ratio rendered as a percentage with two decimals.
    Percent,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InsightRule {
    pub id: &'static str,
    pub category: &'static str,
    pub condition: Condition,
    pub template: &'static str,
    pub format: ValueFormat,
}

#[derive(Debug, Clone, PartialEq)]
enum StatValue {
    Number(f64),
    Text(String),
}

impl InsightRule {
    /// Evaluate the rule over `records`, returning the rendered insight if it fires.
    pub fn evaluate(&self, records: &[&Record]) -> Option<Insight> {
        let value = match &self.condition {
            Condition::LessThan(stat, threshold) => {
                let v = number(stat, records)?;
                (v < *threshold).then_some(StatValue::Number(v))?
            }
            Condition::LessThanStatistic(left, right) => {
                let l = number(left, records)?;
                let r = number(right, records)?;
                (l < r).then_some(StatValue::Number(l))?
            }
            Condition::NonEmpty(filters) => {
                let subset = apply_filters(records, filters)?;
                if subset.is_empty() {
                    return None;
                }
                StatValue::Number(subset.len() as f64)
            }
            Condition::Report(stat) => statistic(stat, records)?,
        };

        Some(Insight {
            rule: self.id.to_string(),
            category: self.category.to_string(),
            insight: self.render(&value),
        })
    }

    fn render(&self, value: &StatValue) -> String {
        let rendered = match (value, self.format) {
            (StatValue::Number(v), ValueFormat::Percent) => format!("{:.2}%", v * 100.0),
            (StatValue::Number(v), ValueFormat::Plain) => format!("{v:.2}"),
            (StatValue::Text(s), _) => s.clone(),
        };
        self.template.replace("{value}", &rendered)
    }
}

/// Run every rule registered for `kind` against the stored datasets of that kind.
pub fn generate_insights(
    store: &DatasetStore,
    registry: &SchemaRegistry,
    kind: DatasetKind,
) -> Result<Vec<Insight>> {
    let datasets = store.of_kind(kind);
    let records: Vec<&Record> = datasets.iter().flat_map(|d| d.records.iter()).collect();

    let mut insights = Vec::new();
    for rule in registry.insight_rules(kind) {
        match rule.evaluate(&records) {
            Some(insight) => insights.push(insight),
            None => debug!(%kind, rule = rule.id, "Rule did not fire"),
        }
    }
    Ok(insights)
}

fn number(stat: &Statistic, records: &[&Record]) -> Option<f64> {
    match statistic(stat, records)? {
        StatValue::Number(v) => Some(v),
        StatValue::Text(_) => None,
    }
}

fn statistic(stat: &Statistic, records: &[&Record]) -> Option<StatValue> {
    match *stat {
        Statistic::Mean { column, filters } => {
            let subset = apply_filters(records, filters)?;
            let values = column_values(&subset, column);
            stats::mean(&values).map(StatValue::Number)
        }
        Statistic::MeanRatio {
            numerator,
            denominator,
        } => {
            let ratios: Vec<f64> = records
                .iter()
                .filter_map(|r| row_ratio(r, &[numerator], denominator))
                .collect();
            stats::mean(&ratios).map(StatValue::Number)
        }
        Statistic::Mode(column) => {
            let keys: Vec<String> = records.iter().filter_map(|r| r.get(column).key()).collect();
            stats::mode(keys.iter().map(String::as_str)).map(StatValue::Text)
        }
    }
}

/// Apply filters in sequence. `None` when a threshold is undefined.
fn apply_filters<'a>(records: &[&'a Record], filters: &[Filter]) -> Option<Vec<&'a Record>> {
    let mut rows: Vec<&'a Record> = records.to_vec();
    for filter in filters {
        rows = match *filter {
            Filter::AboveMean(column) => {
                let threshold = stats::mean(&column_values(&rows, column))?;
                keep(rows, column, |v| v > threshold)
            }
            Filter::AboveQuantile(column, q) => {
                let threshold = stats::quantile(&column_values(&rows, column), q)?;
                keep(rows, column, |v| v > threshold)
            }
            Filter::BelowQuantile(column, q) => {
                let threshold = stats::quantile(&column_values(&rows, column), q)?;
                keep(rows, column, |v| v < threshold)
            }
            Filter::Equals(column, target) => keep(rows, column, |v| v == target),
        };
    }
    Some(rows)
}

fn keep<'a>(rows: Vec<&'a Record>, column: &str, pred: impl Fn(f64) -> bool) -> Vec<&'a Record> {
    rows.into_iter()
        .filter(|r| r.numeric(column).map_or(false, &pred))
        .collect()
}

fn column_values(rows: &[&Record], column: &str) -> Vec<f64> {
    rows.iter().filter_map(|r| r.numeric(column)).collect()
}
