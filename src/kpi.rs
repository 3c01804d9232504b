//! Time-windowed KPI aggregation with period-over-period comparison.
//!
//! For a period of `p` days ending at `now` the current window is
//! `[now - p, now]` and the previous window is `[now - 2p, now - p)`.
//! When no dataset of a kind has a time column, the kind is aggregated
//! whole as the current window and has no previous window. Undated datasets
//! next to dated ones of the same kind are left out.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;

use crate::data::Record;
use crate::error::{Error, Result};
use crate::schema::{Aggregate, DatasetKind, KpiFormula, SchemaRegistry};
use crate::stats;
use crate::store::DatasetStore;

/// Numeric or string KPI value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum KpiValue {
    Number(f64),
    Text(String),
}

impl KpiValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            KpiValue::Number(v) => Some(*v),
            KpiValue::Text(_) => None,
        }
    }
}

impl fmt::Display for KpiValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KpiValue::Number(v) => write!(f, "{v}"),
            KpiValue::Text(s) => f.write_str(s),
        }
    }
}

/// A computed KPI. Produced fresh on every request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiResult {
    pub id: String,
    pub kind: DatasetKind,
    pub label: String,
    pub value: KpiValue,
    pub unit: Option<String>,
    pub change_pct: f64,
    pub trend_label: String,
    pub next_step: String,
}

/// Closed current window and half-open previous window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Windows {
    pub previous_start: DateTime<Utc>,
    pub current_start: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

impl Windows {
    pub fn new(now: DateTime<Utc>, period_days: u32) -> Self {
        let period = Duration::days(i64::from(period_days));
        Self {
            previous_start: now - period - period,
            current_start: now - period,
            now,
        }
    }

    pub fn in_current(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.current_start && ts <= self.now
    }

    pub fn in_previous(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.previous_start && ts < self.current_start
    }
}

/// Records of one kind split into windows.
struct WindowedRecords<'a> {
    current: Vec<&'a Record>,
    previous: Vec<&'a Record>,
    has_previous: bool,
}

/// Compute KPIs for every loaded kind, in registry order.
pub fn compute_kpis(
    store: &DatasetStore,
    registry: &SchemaRegistry,
    period_days: u32,
    now: DateTime<Utc>,
) -> Result<Vec<KpiResult>> {
    validate_period(period_days)?;

    let mut results = Vec::new();
    for kind in DatasetKind::ALL {
        results.extend(kind_kpis(store, registry, kind, period_days, now));
    }
    Ok(results)
}

/// Compute KPIs for a single kind. Fails when no dataset of that kind is loaded.
pub fn compute_kpis_for(
    store: &DatasetStore,
    registry: &SchemaRegistry,
    kind: DatasetKind,
    period_days: u32,
    now: DateTime<Utc>,
) -> Result<Vec<KpiResult>> {
    validate_period(period_days)?;
    if store.of_kind(kind).is_empty() {
        return Err(Error::UnsupportedKind(format!("no {kind} dataset is loaded")));
    }
    Ok(kind_kpis(store, registry, kind, period_days, now))
}

fn validate_period(period_days: u32) -> Result<()> {
    if period_days == 0 {
        return Err(Error::InvalidArgument("period_days must be positive".to_string()));
    }
    Ok(())
}

fn kind_kpis(
    store: &DatasetStore,
    registry: &SchemaRegistry,
    kind: DatasetKind,
    period_days: u32,
    now: DateTime<Utc>,
) -> Vec<KpiResult> {
    let datasets = store.of_kind(kind);
    if datasets.is_empty() {
        return Vec::new();
    }

    let schema = registry.schema(kind);
    let windows = Windows::new(now, period_days);
    debug!(%kind, current_start = %windows.current_start, previous_start = %windows.previous_start, "KPI windows");

    let mut split = WindowedRecords {
        current: Vec::new(),
        previous: Vec::new(),
        has_previous: false,
    };
    // Undated datasets count as the current window only when the kind has no
    // dated dataset; otherwise their rows cannot be placed in either window.
    let any_dated = datasets.iter().any(|d| d.has_column(schema.time_column));
    split.has_previous = any_dated;
    for dataset in &datasets {
        if !dataset.has_column(schema.time_column) {
            if any_dated {
                debug!(%kind, dataset = %dataset.name, "Undated dataset left out of windowed KPIs");
            } else {
                split.current.extend(dataset.records.iter());
            }
            continue;
        }
        for record in &dataset.records {
            match record.timestamp(schema.time_column) {
                Some(ts) if windows.in_current(ts) => split.current.push(record),
                Some(ts) if windows.in_previous(ts) => split.previous.push(record),
                _ => {}
            }
        }
    }

    registry
        .kpi_formulas(kind)
        .iter()
        .map(|formula| evaluate_formula(formula, kind, &split, period_days))
        .collect()
}

fn evaluate_formula(
    formula: &KpiFormula,
    kind: DatasetKind,
    split: &WindowedRecords<'_>,
    period_days: u32,
) -> KpiResult {
    let current = aggregate(&formula.aggregate, &split.current);
    let previous = if split.has_previous {
        aggregate(&formula.aggregate, &split.previous)
    } else {
        None
    };

    let (value, change_pct) = match current {
        Some(KpiValue::Number(cur)) => {
            let prev = previous.as_ref().and_then(KpiValue::as_f64);
            (
                KpiValue::Number(stats::round_to(cur * formula.scale, 2)),
                stats::round_to(change_pct(cur, prev), 1),
            )
        }
        Some(text @ KpiValue::Text(_)) => (text, 0.0),
        // Mean of an empty window reports zero.
        None => match formula.aggregate {
            Aggregate::Mode(_) => (KpiValue::Text(String::new()), 0.0),
            _ => (KpiValue::Number(0.0), 0.0),
        },
    };

    KpiResult {
        id: formula.id.to_string(),
        kind,
        label: formula.label.replace("{period}", &period_days.to_string()),
        value,
        unit: formula.unit.map(str::to_string),
        change_pct,
        trend_label: format!("vs previous {period_days} days"),
        next_step: formula.next_step.to_string(),
    }
}

/// Percentage change from `previous` to `current`.
///
/// A zero or absent baseline yields exactly 0 rather than an infinite or
/// NaN change.
pub fn change_pct(current: f64, previous: Option<f64>) -> f64 {
    match previous {
        Some(prev) if prev != 0.0 => {
            let change = (current - prev) / prev * 100.0;
            if change.is_finite() {
                change
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

/// Evaluate an aggregate over a set of records. `None` means undefined
/// (mean or mode of nothing).
pub fn aggregate(aggregate: &Aggregate, records: &[&Record]) -> Option<KpiValue> {
    match *aggregate {
        Aggregate::Sum { column, only } => {
            let sum = records
                .iter()
                .filter(|r| match only {
                    Some((tag_column, tag)) => r.text(tag_column) == Some(tag),
                    None => true,
                })
                .filter_map(|r| r.numeric(column))
                .fold(0.0, |acc, v| acc + v);
            Some(KpiValue::Number(sum))
        }
        Aggregate::DistinctCount(column) => {
            let distinct: HashSet<String> =
                records.iter().filter_map(|r| r.get(column).key()).collect();
            Some(KpiValue::Number(distinct.len() as f64))
        }
        Aggregate::Mean(column) => {
            let values: Vec<f64> = records.iter().filter_map(|r| r.numeric(column)).collect();
            stats::mean(&values).map(KpiValue::Number)
        }
        Aggregate::MeanRatio {
            numerators,
            denominator,
        } => {
            let ratios: Vec<f64> = records
                .iter()
                .filter_map(|r| row_ratio(r, numerators, denominator))
                .collect();
            stats::mean(&ratios).map(KpiValue::Number)
        }
        Aggregate::Mode(column) => {
            let keys: Vec<String> = records.iter().filter_map(|r| r.get(column).key()).collect();
            stats::mode(keys.iter().map(String::as_str)).map(KpiValue::Text)
        }
    }
}

/// Row-wise ratio; rows with a zero or missing denominator are undefined.
pub fn row_ratio(record: &Record, numerators: &[&str], denominator: &str) -> Option<f64> {
    let den = record.numeric(denominator)?;
    if den == 0.0 {
        return None;
    }
    let mut num = 0.0;
    for column in numerators {
        num += record.numeric(column)?;
    }
    Some(num / den)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{load_csv, Dataset};
    use chrono::TimeZone;

    fn store_with(kind: DatasetKind, name: &str, csv: &str) -> DatasetStore {
        let store = DatasetStore::new();
        let mut table = load_csv(csv.as_bytes()).unwrap();
        table.coerce_timestamps("date");
        store.replace(Dataset::new(name, kind, table));
        store
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 26, 0, 0, 0).unwrap()
    }

    fn find<'a>(kpis: &'a [KpiResult], id: &str) -> &'a KpiResult {
        kpis.iter().find(|k| k.id == id).unwrap()
    }

    #[test]
    fn test_revenue_period_over_period() {
        let store = store_with(
            DatasetKind::Transactions,
            "ledger",
            "date,user_id,amount,source\n\
             2025-12-25,1,100,bank\n\
             2025-12-20,2,200,bank\n\
             2025-12-21,3,999,web\n\
             2025-11-25,1,150,bank\n",
        );

        let kpis = compute_kpis(&store, &SchemaRegistry::new(), 30, now()).unwrap();
        let revenue = find(&kpis, "revenue");
        assert_eq!(revenue.value, KpiValue::Number(300.0));
        assert_eq!(revenue.change_pct, 100.0);
        assert_eq!(revenue.label, "Revenue (Last 30 days)");
        assert_eq!(revenue.unit.as_deref(), Some("USD"));
        assert_eq!(revenue.trend_label, "vs previous 30 days");

        // Three distinct users now, one before.
        let active = find(&kpis, "active_customers");
        assert_eq!(active.value, KpiValue::Number(3.0));
        assert_eq!(active.change_pct, 200.0);
    }

    #[test]
    fn test_zero_baseline_reports_zero_change() {
        let store = store_with(
            DatasetKind::Transactions,
            "ledger",
            "date,user_id,amount,source\n2025-12-25,1,100,bank\n2025-11-20,1,0,bank\n",
        );

        for period in [1, 7, 30, 365] {
            let kpis = compute_kpis(&store, &SchemaRegistry::new(), period, now()).unwrap();
            for kpi in &kpis {
                assert!(kpi.change_pct.is_finite());
            }
        }
        let kpis = compute_kpis(&store, &SchemaRegistry::new(), 30, now()).unwrap();
        assert_eq!(find(&kpis, "revenue").change_pct, 0.0);
    }

    #[test]
    fn test_change_pct_policy() {
        assert_eq!(change_pct(300.0, Some(150.0)), 100.0);
        assert_eq!(change_pct(50.0, Some(100.0)), -50.0);
        assert_eq!(change_pct(50.0, Some(0.0)), 0.0);
        assert_eq!(change_pct(50.0, None), 0.0);
    }

    #[test]
    fn test_window_boundaries() {
        let windows = Windows::new(now(), 30);
        let start = Utc.with_ymd_and_hms(2025, 11, 26, 0, 0, 0).unwrap();
        assert!(windows.in_current(start));
        assert!(!windows.in_previous(start));
        assert!(windows.in_current(now()));
        assert!(windows.in_previous(start - Duration::seconds(1)));
        assert!(!windows.in_current(now() + Duration::seconds(1)));
    }

    #[test]
    fn test_content_kpis_exclude_zero_views() {
        let store = store_with(
            DatasetKind::Content,
            "youtube",
            "video_id,category,views,likes,comments,watch_time_minutes\n\
             YT_001,Tech,100,8,2,5.5\n\
             YT_002,Tech,0,3,1,2.0\n\
             YT_003,Music,200,10,10,12.0\n",
        );

        let kpis = compute_kpis(&store, &SchemaRegistry::new(), 30, now()).unwrap();
        let ids: Vec<&str> = kpis.iter().map(|k| k.id.as_str()).collect();
        assert_eq!(ids, vec!["total_views", "engagement_rate", "active_videos", "top_category"]);

        assert_eq!(find(&kpis, "total_views").value, KpiValue::Number(300.0));
        // (10/100 + 20/200) / 2 = 0.1 -> 10%
        assert_eq!(find(&kpis, "engagement_rate").value, KpiValue::Number(10.0));
        assert_eq!(find(&kpis, "active_videos").value, KpiValue::Number(3.0));
        assert_eq!(find(&kpis, "top_category").value, KpiValue::Text("Tech".into()));
        assert!(kpis.iter().all(|k| k.change_pct == 0.0));
    }

    #[test]
    fn test_banking_churn_rate() {
        let store = store_with(
            DatasetKind::Banking,
            "banking",
            "customer_id,age,account_balance,transaction_count,products_used,churn_flag\n\
             C1,30,1000,10,1,1\n\
             C2,40,3000,20,2,0\n\
             C3,50,5000,30,3,0\n\
             C4,60,7000,40,2,0\n",
        );

        let kpis = compute_kpis(&store, &SchemaRegistry::new(), 30, now()).unwrap();
        assert_eq!(find(&kpis, "churn_rate").value, KpiValue::Number(25.0));
        assert_eq!(find(&kpis, "average_balance").value, KpiValue::Number(4000.0));
        assert_eq!(find(&kpis, "average_products").value, KpiValue::Number(2.0));
    }

    #[test]
    fn test_empty_store_and_validation() {
        let store = DatasetStore::new();
        let registry = SchemaRegistry::new();
        assert!(compute_kpis(&store, &registry, 30, now()).unwrap().is_empty());
        assert!(matches!(
            compute_kpis(&store, &registry, 0, now()),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            compute_kpis_for(&store, &registry, DatasetKind::Banking, 30, now()),
            Err(Error::UnsupportedKind(_))
        ));
    }

    #[test]
    fn test_empty_window_sum_is_positive_zero() {
        let store = store_with(
            DatasetKind::Transactions,
            "ledger",
            "date,user_id,amount,source\n2025-12-25,1,100,web\n",
        );
        let kpis = compute_kpis(&store, &SchemaRegistry::new(), 30, now()).unwrap();
        let revenue = find(&kpis, "revenue");
        match revenue.value {
            KpiValue::Number(v) => {
                assert_eq!(v, 0.0);
                assert!(v.is_sign_positive());
            }
            KpiValue::Text(_) => panic!("revenue should be numeric"),
        }
        assert!(revenue.change_pct.is_sign_positive());
    }

    #[test]
    fn test_undated_dataset_next_to_dated_is_left_out() {
        let store = store_with(
            DatasetKind::Transactions,
            "ledger",
            "date,user_id,amount,source\n\
             2025-12-25,1,300,bank\n\
             2025-11-25,2,150,bank\n",
        );
        let undated = load_csv(b"user_id,amount,source\n3,5000,bank\n4,7000,bank\n").unwrap();
        store.replace(Dataset::new("archive", DatasetKind::Transactions, undated));

        let kpis = compute_kpis(&store, &SchemaRegistry::new(), 30, now()).unwrap();
        let revenue = find(&kpis, "revenue");
        assert_eq!(revenue.value, KpiValue::Number(300.0));
        assert_eq!(revenue.change_pct, 100.0);
        assert_eq!(find(&kpis, "active_customers").value, KpiValue::Number(1.0));
    }

    #[test]
    fn test_conversion_rate_skips_zero_clicks() {
        let store = store_with(
            DatasetKind::Advertising,
            "ads",
            "campaign_id,campaign_name,impressions,clicks,conversions,cost\n\
             AD_1,Spring,1000,50,5,40.0\n\
             AD_2,Summer,800,0,0,25.0\n\
             AD_3,Autumn,2000,100,30,60.0\n",
        );
        let kpis = compute_kpis(&store, &SchemaRegistry::new(), 30, now()).unwrap();
        // (5/50 + 30/100) / 2 = 0.2; the zero-click row is undefined, not zero.
        assert_eq!(find(&kpis, "conversion_rate").value, KpiValue::Number(20.0));
        // (0.05 + 0 + 0.05) / 3
        assert_eq!(find(&kpis, "click_through_rate").value, KpiValue::Number(3.33));
    }

    #[test]
    fn test_order_is_stable() {
        let store = store_with(
            DatasetKind::Advertising,
            "ads",
            "campaign_id,campaign_name,impressions,clicks,conversions,cost\n\
             AD_1,Summer Sale,1000,50,5,40.0\n",
        );
        let registry = SchemaRegistry::new();
        let first = compute_kpis(&store, &registry, 30, now()).unwrap();
        let second = compute_kpis(&store, &registry, 30, now()).unwrap();
        assert_eq!(first, second);

        let ids: Vec<&str> = first.iter().map(|k| k.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "total_impressions",
                "click_through_rate",
                "conversion_rate",
                "total_cost",
                "active_campaigns"
            ]
        );
        assert_eq!(find(&first, "click_through_rate").value, KpiValue::Number(5.0));
        assert_eq!(find(&first, "conversion_rate").value, KpiValue::Number(10.0));
    }
}
