//! Schema registry: per-kind column contracts, segmentation feature sets,
//! KPI formulas and insight rule sets.
//!
//! Every engine reads its per-kind configuration from here, so supporting a
//! new kind of dataset means adding a [`KindSchema`] entry rather than new
//! branches in the engines.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::insight::{Condition, Filter, InsightRule, Statistic, ValueFormat};

/// Closed set of dataset kinds the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    /// Generic time-stamped ledger: `date,user_id,amount,source`
    Transactions,
    /// Video/content analytics
    Content,
    /// Ad-campaign analytics
    Advertising,
    /// Banking customer analytics
    Banking,
}

impl DatasetKind {
    /// All kinds in registry order. KPI output follows this order.
    pub const ALL: [DatasetKind; 4] = [
        DatasetKind::Transactions,
        DatasetKind::Content,
        DatasetKind::Advertising,
        DatasetKind::Banking,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Transactions => "transactions",
            DatasetKind::Content => "content",
            DatasetKind::Advertising => "advertising",
            DatasetKind::Banking => "banking",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "transactions" | "ledger" | "timeseries" => Ok(DatasetKind::Transactions),
            "content" | "youtube" => Ok(DatasetKind::Content),
            "advertising" | "ads" => Ok(DatasetKind::Advertising),
            "banking" => Ok(DatasetKind::Banking),
            other => Err(Error::UnsupportedKind(other.to_string())),
        }
    }
}

/// Expected value kind of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Numeric,
    Categorical,
    Timestamp,
    Identifier,
}

/// A required column and the kind of value it is expected to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub kind: ColumnKind,
}

const fn column(name: &'static str, kind: ColumnKind) -> ColumnSpec {
    ColumnSpec { name, kind }
}

/// Aggregation applied to the records of one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregate {
    /// Sum of a numeric column, optionally restricted to rows whose
    /// categorical `tag.0` equals `tag.1`.
    Sum {
        column: &'static str,
        only: Option<(&'static str, &'static str)>,
    },
    /// Number of distinct non-missing values.
    DistinctCount(&'static str),
    /// Mean of a numeric column.
    Mean(&'static str),
    /// Row-wise `sum(numerators) / denominator`, averaged. Rows with a zero
    /// or missing denominator are excluded.
    MeanRatio {
        numerators: &'static [&'static str],
        denominator: &'static str,
    },
    /// Most frequent value (string KPI).
    Mode(&'static str),
}

/// One KPI applicable to a dataset kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KpiFormula {
    pub id: &'static str,
    /// Display label; `{period}` is replaced with the window length in days.
    pub label: &'static str,
    pub unit: Option<&'static str>,
    pub aggregate: Aggregate,
    /// Multiplier applied to the aggregate (100 for percentages).
    pub scale: f64,
    pub next_step: &'static str,
}

/// Full registry entry for one dataset kind.
#[derive(Debug)]
pub struct KindSchema {
    pub kind: DatasetKind,
    pub columns: &'static [ColumnSpec],
    /// Column identifying the entity a record describes.
    pub identifier: &'static str,
    /// Column used for KPI windowing when present.
    pub time_column: &'static str,
    /// Numeric features used for segmentation; empty when unsupported.
    pub features: &'static [&'static str],
    pub kpis: &'static [KpiFormula],
    pub rules: &'static [InsightRule],
}

const TIME_COLUMN: &str = "date";

static TRANSACTIONS: KindSchema = KindSchema {
    kind: DatasetKind::Transactions,
    columns: &[
        column("date", ColumnKind::Timestamp),
        column("user_id", ColumnKind::Identifier),
        column("amount", ColumnKind::Numeric),
        column("source", ColumnKind::Categorical),
    ],
    identifier: "user_id",
    time_column: TIME_COLUMN,
    features: &[],
    kpis: &[
        KpiFormula {
            id: "revenue",
            label: "Revenue (Last {period} days)",
            unit: Some("USD"),
            aggregate: Aggregate::Sum {
                column: "amount",
                only: Some(("source", "bank")),
            },
            scale: 1.0,
            next_step: "If revenue fell >5%, review top 3 products.",
        },
        KpiFormula {
            id: "active_customers",
            label: "Active Customers",
            unit: None,
            aggregate: Aggregate::DistinctCount("user_id"),
            scale: 1.0,
            next_step: "Run a referral campaign if growth is flat.",
        },
    ],
    rules: &[],
};

static CONTENT: KindSchema = KindSchema {
    kind: DatasetKind::Content,
    columns: &[
        column("video_id", ColumnKind::Identifier),
        column("category", ColumnKind::Categorical),
        column("views", ColumnKind::Numeric),
        column("likes", ColumnKind::Numeric),
        column("comments", ColumnKind::Numeric),
        column("watch_time_minutes", ColumnKind::Numeric),
    ],
    identifier: "video_id",
    time_column: TIME_COLUMN,
    features: &["views", "likes", "watch_time_minutes"],
    kpis: &[
        KpiFormula {
            id: "total_views",
            label: "Total Views",
            unit: None,
            aggregate: Aggregate::Sum {
                column: "views",
                only: None,
            },
            scale: 1.0,
            next_step: "Promote the top performing videos on other channels.",
        },
        KpiFormula {
            id: "engagement_rate",
            label: "Engagement Rate",
            unit: Some("%"),
            aggregate: Aggregate::MeanRatio {
                numerators: &["likes", "comments"],
                denominator: "views",
            },
            scale: 100.0,
            next_step: "Add calls to action if engagement is dropping.",
        },
        KpiFormula {
            id: "active_videos",
            label: "Active Videos",
            unit: None,
            aggregate: Aggregate::DistinctCount("video_id"),
            scale: 1.0,
            next_step: "Keep a steady publishing cadence.",
        },
        KpiFormula {
            id: "top_category",
            label: "Top Category",
            unit: None,
            aggregate: Aggregate::Mode("category"),
            scale: 1.0,
            next_step: "Plan more content in the leading category.",
        },
    ],
    rules: &[
        InsightRule {
            id: "short_videos_engage",
            category: "Content Strategy",
            condition: Condition::LessThan(
                Statistic::Mean {
                    column: "watch_time_minutes",
                    filters: &[Filter::AboveMean("views")],
                },
                10.0,
            ),
            template: "High engagement videos tend to be under 10 minutes.",
            format: ValueFormat::Plain,
        },
        InsightRule {
            id: "most_popular_category",
            category: "Trend",
            condition: Condition::Report(Statistic::Mode("category")),
            template: "The most popular category is {value}.",
            format: ValueFormat::Plain,
        },
    ],
};

static ADVERTISING: KindSchema = KindSchema {
    kind: DatasetKind::Advertising,
    columns: &[
        column("campaign_id", ColumnKind::Identifier),
        column("campaign_name", ColumnKind::Categorical),
        column("impressions", ColumnKind::Numeric),
        column("clicks", ColumnKind::Numeric),
        column("conversions", ColumnKind::Numeric),
        column("cost", ColumnKind::Numeric),
    ],
    identifier: "campaign_id",
    time_column: TIME_COLUMN,
    features: &["impressions", "clicks", "cost"],
    kpis: &[
        KpiFormula {
            id: "total_impressions",
            label: "Total Impressions",
            unit: None,
            aggregate: Aggregate::Sum {
                column: "impressions",
                only: None,
            },
            scale: 1.0,
            next_step: "Broaden targeting if reach is shrinking.",
        },
        KpiFormula {
            id: "click_through_rate",
            label: "Click-Through Rate",
            unit: Some("%"),
            aggregate: Aggregate::MeanRatio {
                numerators: &["clicks"],
                denominator: "impressions",
            },
            scale: 100.0,
            next_step: "Refresh creatives on campaigns below the average CTR.",
        },
        KpiFormula {
            id: "conversion_rate",
            label: "Conversion Rate",
            unit: Some("%"),
            aggregate: Aggregate::MeanRatio {
                numerators: &["conversions"],
                denominator: "clicks",
            },
            scale: 100.0,
            next_step: "Review landing pages if conversions are slipping.",
        },
        KpiFormula {
            id: "total_cost",
            label: "Total Cost",
            unit: Some("USD"),
            aggregate: Aggregate::Sum {
                column: "cost",
                only: None,
            },
            scale: 1.0,
            next_step: "Pause campaigns with high cost and low conversion.",
        },
        KpiFormula {
            id: "active_campaigns",
            label: "Active Campaigns",
            unit: None,
            aggregate: Aggregate::DistinctCount("campaign_id"),
            scale: 1.0,
            next_step: "Consolidate budget into the strongest campaigns.",
        },
    ],
    rules: &[
        InsightRule {
            id: "high_cost_low_conversion",
            category: "Optimization",
            condition: Condition::NonEmpty(&[
                Filter::AboveQuantile("cost", 0.75),
                Filter::BelowQuantile("conversions", 0.25),
            ]),
            template: "Certain ad campaigns have high cost but low conversion.",
            format: ValueFormat::Plain,
        },
        InsightRule {
            id: "average_ctr",
            category: "Performance",
            condition: Condition::Report(Statistic::MeanRatio {
                numerator: "clicks",
                denominator: "impressions",
            }),
            template: "Average CTR is {value}. Campaigns below this need optimization.",
            format: ValueFormat::Percent,
        },
    ],
};

static BANKING: KindSchema = KindSchema {
    kind: DatasetKind::Banking,
    columns: &[
        column("customer_id", ColumnKind::Identifier),
        column("age", ColumnKind::Numeric),
        column("account_balance", ColumnKind::Numeric),
        column("transaction_count", ColumnKind::Numeric),
        column("products_used", ColumnKind::Numeric),
        column("churn_flag", ColumnKind::Numeric),
    ],
    identifier: "customer_id",
    time_column: TIME_COLUMN,
    features: &["account_balance", "transaction_count", "products_used"],
    kpis: &[
        KpiFormula {
            id: "active_customers",
            label: "Active Customers",
            unit: None,
            aggregate: Aggregate::DistinctCount("customer_id"),
            scale: 1.0,
            next_step: "Run a referral campaign if growth is flat.",
        },
        KpiFormula {
            id: "average_balance",
            label: "Average Balance",
            unit: Some("USD"),
            aggregate: Aggregate::Mean("account_balance"),
            scale: 1.0,
            next_step: "Offer savings products to low-balance customers.",
        },
        KpiFormula {
            id: "churn_rate",
            label: "Churn Rate",
            unit: Some("%"),
            aggregate: Aggregate::Mean("churn_flag"),
            scale: 100.0,
            next_step: "Contact at-risk customers if churn is rising.",
        },
        KpiFormula {
            id: "average_products",
            label: "Average Products per Customer",
            unit: None,
            aggregate: Aggregate::Mean("products_used"),
            scale: 1.0,
            next_step: "Cross-sell a second product to single-product customers.",
        },
    ],
    rules: &[
        InsightRule {
            id: "fewer_products_churn",
            category: "Retention",
            condition: Condition::LessThanStatistic(
                Statistic::Mean {
                    column: "products_used",
                    filters: &[Filter::Equals("churn_flag", 1.0)],
                },
                Statistic::Mean {
                    column: "products_used",
                    filters: &[],
                },
            ),
            template: "Customers with fewer products show higher churn.",
            format: ValueFormat::Plain,
        },
        InsightRule {
            id: "low_balance_churn",
            category: "Risk",
            condition: Condition::LessThanStatistic(
                Statistic::Mean {
                    column: "account_balance",
                    filters: &[Filter::Equals("churn_flag", 1.0)],
                },
                Statistic::Mean {
                    column: "account_balance",
                    filters: &[],
                },
            ),
            template: "Lower account balances are correlated with higher churn risk.",
            format: ValueFormat::Plain,
        },
    ],
};

/// Pure lookup over the static per-kind configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaRegistry;

impl SchemaRegistry {
    pub fn new() -> Self {
        Self
    }

    /// Registry entry for a kind.
    pub fn schema(&self, kind: DatasetKind) -> &'static KindSchema {
        match kind {
            DatasetKind::Transactions => &TRANSACTIONS,
            DatasetKind::Content => &CONTENT,
            DatasetKind::Advertising => &ADVERTISING,
            DatasetKind::Banking => &BANKING,
        }
    }

    pub fn required_columns(&self, kind: DatasetKind) -> &'static [ColumnSpec] {
        self.schema(kind).columns
    }

    /// Segmentation features for a kind. Kinds without a feature set are
    /// unsupported for segmentation.
    pub fn features(&self, kind: DatasetKind) -> Result<&'static [&'static str]> {
        let features = self.schema(kind).features;
        if features.is_empty() {
            return Err(Error::UnsupportedKind(format!(
                "segmentation is not supported for {kind}"
            )));
        }
        Ok(features)
    }

    pub fn kpi_formulas(&self, kind: DatasetKind) -> &'static [KpiFormula] {
        self.schema(kind).kpis
    }

    pub fn insight_rules(&self, kind: DatasetKind) -> &'static [InsightRule] {
        self.schema(kind).rules
    }

    /// Required columns of `kind` absent from `columns`, in schema order.
    pub fn missing_columns(&self, kind: DatasetKind, columns: &[String]) -> Vec<String> {
        self.required_columns(kind)
            .iter()
            .filter(|spec| !columns.iter().any(|c| c == spec.name))
            .map(|spec| spec.name.to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind_aliases() {
        assert_eq!("ads".parse::<DatasetKind>().unwrap(), DatasetKind::Advertising);
        assert_eq!("YouTube".parse::<DatasetKind>().unwrap(), DatasetKind::Content);
        assert_eq!(" banking ".parse::<DatasetKind>().unwrap(), DatasetKind::Banking);
        assert_eq!("ledger".parse::<DatasetKind>().unwrap(), DatasetKind::Transactions);

        let err = "weather".parse::<DatasetKind>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedKind(_)));
    }

    #[test]
    fn test_missing_columns_in_schema_order() {
        let registry = SchemaRegistry::new();
        let columns = vec!["user_id".to_string(), "date".to_string(), "extra".to_string()];
        let missing = registry.missing_columns(DatasetKind::Transactions, &columns);
        assert_eq!(missing, vec!["amount".to_string(), "source".to_string()]);
    }

    #[test]
    fn test_features_unsupported_for_transactions() {
        let registry = SchemaRegistry::new();
        assert!(registry.features(DatasetKind::Transactions).is_err());
        assert_eq!(
            registry.features(DatasetKind::Banking).unwrap(),
            &["account_balance", "transaction_count", "products_used"]
        );
    }

    #[test]
    fn test_features_and_kpi_columns_are_required() {
        let registry = SchemaRegistry::new();
        for kind in DatasetKind::ALL {
            let schema = registry.schema(kind);
            for feature in schema.features {
                assert!(schema.columns.iter().any(|c| c.name == *feature));
            }
            assert!(schema.columns.iter().any(|c| c.name == schema.identifier));
            assert!(!schema.kpis.is_empty());
        }
    }
}
