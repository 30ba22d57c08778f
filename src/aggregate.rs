//! Aggregation of filtered rows into report rows
//!
//! An [AggregationRequest] is first resolved against the dataset columns into an
//! [AggregationPlan], which reports every [ConfigError] before any row is touched. Executing
//! the plan groups the rows of a [RowView] and produces ordered [ResultRow]s.
//!
//! Ordering rules:
//!
//! * count, sum and ratio rows are ordered by ascending group key
//! * top_n rows are ordered by descending sum, ties broken by ascending group key, with the
//!   remainder group last
//! * with a period sub-grouping, rows are ordered by ascending period first

use crate::error::{ColumnRole, ConfigError};
use crate::filter::RowView;
use crate::models::{
    AggregationMode, AggregationRequest, Granularity, ResultRow, UNSPECIFIED_LABEL,
};
use crate::types::{timestamp, ColumnKind, Dataset};

use std::borrow::Cow;
use std::collections::BTreeMap;

use hashbrown::{HashMap, HashSet};

/// Running totals of one group
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Totals {
    sum: f64,
    rows: usize,
}

impl Totals {
    fn add(&mut self, other: Totals) {
        self.sum += other.sum;
        self.rows += other.rows;
    }
}

/// Period sub-grouping resolved to a column position
#[derive(Clone, Copy, Debug)]
struct Period {
    column: usize,
    granularity: Granularity,
}

/// An aggregation request whose columns have been checked against a dataset
#[derive(Clone, Debug)]
pub struct AggregationPlan {
    mode: AggregationMode,
    group_by: usize,
    measure: Option<usize>,
    limit: usize,
    remainder_label: String,
    period: Option<Period>,
}

impl AggregationPlan {
    /// Check `request` against the columns of `dataset`.
    pub fn resolve(dataset: &Dataset, request: &AggregationRequest) -> Result<Self, ConfigError> {
        let column = |name: &str, role| {
            dataset.column(name).ok_or_else(|| ConfigError::UnknownColumn {
                column: name.to_string(),
                role,
            })
        };

        let (group_by, _) = column(&request.group_by, ColumnRole::Grouping)?;

        let measure = match &request.measure {
            Some(name) => {
                let (index, spec) = column(name, ColumnRole::Measure)?;
                if request.mode.requires_measure() && spec.kind != ColumnKind::Number {
                    return Err(ConfigError::NonNumericMeasure {
                        column: name.clone(),
                        kind: spec.kind,
                    });
                }
                Some(index)
            }
            None if request.mode.requires_measure() => {
                return Err(ConfigError::MissingMeasure { mode: request.mode })
            }
            None => None,
        };

        let limit = match (request.mode, request.limit) {
            (AggregationMode::TopN, None | Some(0)) => return Err(ConfigError::InvalidLimit),
            (_, limit) => limit.unwrap_or(0),
        };

        let period = match &request.period {
            Some(period) => {
                let (index, spec) = column(&period.column, ColumnRole::Period)?;
                if spec.kind != ColumnKind::Timestamp {
                    return Err(ConfigError::NonTimestampPeriod {
                        column: period.column.clone(),
                        kind: spec.kind,
                    });
                }
                Some(Period {
                    column: index,
                    granularity: period.granularity,
                })
            }
            None => None,
        };

        Ok(Self {
            mode: request.mode,
            group_by,
            measure,
            limit,
            remainder_label: request.remainder_label().to_string(),
            period,
        })
    }

    /// Aggregate the rows of `view`.
    ///
    /// An empty view yields no rows.
    #[tracing::instrument(level = "DEBUG", skip_all, fields(mode = %self.mode, rows = view.len()))]
    pub fn execute(&self, dataset: &Dataset, view: &RowView) -> Vec<ResultRow> {
        let groups = self.group(dataset, view);
        match self.mode {
            AggregationMode::Count => sorted(groups, |totals| Some(totals.rows as f64)),
            AggregationMode::Sum => sorted(groups, |totals| Some(totals.sum)),
            AggregationMode::Ratio => sorted(groups, |totals| {
                (totals.rows > 0).then(|| totals.sum / totals.rows as f64)
            }),
            AggregationMode::TopN => self.top_n(groups),
        }
    }

    /// Accumulate totals per (group, period) key.
    fn group<'a>(
        &self,
        dataset: &'a Dataset,
        view: &RowView,
    ) -> HashMap<(Cow<'a, str>, Option<String>), Totals> {
        let mut groups: HashMap<(Cow<'a, str>, Option<String>), Totals> = HashMap::new();
        for row in view.iter() {
            let group = dataset
                .value(row, self.group_by)
                .map_or(Cow::Borrowed(UNSPECIFIED_LABEL), |v| v.key());
            let period = self.period.map(|period| {
                dataset
                    .value(row, period.column)
                    .and_then(|v| v.as_timestamp())
                    .map_or_else(
                        || UNSPECIFIED_LABEL.to_string(),
                        |ts| match period.granularity {
                            Granularity::Month => timestamp::format_month(ts),
                            Granularity::Day => timestamp::format_day(ts),
                        },
                    )
            });
            let sum = self
                .measure
                .and_then(|measure| dataset.value(row, measure))
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);
            groups
                .entry((group, period))
                .or_default()
                .add(Totals { sum, rows: 1 });
        }
        groups
    }

    /// Keep the `limit` largest groups and fold the rest into the remainder group.
    ///
    /// Groups are ranked on their totals over the whole view. With a period sub-grouping the
    /// fold is then applied inside each period.
    fn top_n(&self, groups: HashMap<(Cow<'_, str>, Option<String>), Totals>) -> Vec<ResultRow> {
        let mut overall: HashMap<&str, Totals> = HashMap::new();
        let mut by_period: BTreeMap<Option<&str>, HashMap<&str, Totals>> = BTreeMap::new();
        for ((group, period), totals) in &groups {
            overall.entry(&**group).or_default().add(*totals);
            by_period
                .entry(period.as_deref())
                .or_default()
                .insert(&**group, *totals);
        }

        let mut ranking: Vec<(&str, Totals)> = overall
            .into_iter()
            // A real group named like the remainder is always folded into it.
            .filter(|(group, _)| *group != self.remainder_label)
            .collect();
        ranking.sort_by(|(a, a_totals), (b, b_totals)| {
            b_totals.sum.total_cmp(&a_totals.sum).then_with(|| a.cmp(b))
        });
        let kept: Vec<&str> = ranking
            .iter()
            .take(self.limit)
            .map(|(group, _)| *group)
            .collect();
        let kept_set: HashSet<&str> = kept.iter().copied().collect();

        let mut rows = Vec::new();
        for (period, period_groups) in &by_period {
            for group in &kept {
                if let Some(totals) = period_groups.get(group) {
                    rows.push(ResultRow::new(group, *period, totals.sum, totals.rows));
                }
            }
            let mut remainder: Option<Totals> = None;
            for (group, totals) in period_groups {
                if !kept_set.contains(group) {
                    remainder.get_or_insert_with(Totals::default).add(*totals);
                }
            }
            if let Some(totals) = remainder {
                rows.push(ResultRow::new(&self.remainder_label, *period, totals.sum, totals.rows));
            }
        }
        rows
    }
}

/// Order groups by (period, group) and compute their values, dropping groups without one.
fn sorted<F>(
    groups: HashMap<(Cow<'_, str>, Option<String>), Totals>,
    value: F,
) -> Vec<ResultRow>
where
    F: Fn(&Totals) -> Option<f64>,
{
    let mut groups: Vec<_> = groups.into_iter().collect();
    groups.sort_by(|((a, a_period), _), ((b, b_period), _)| {
        a_period.cmp(b_period).then_with(|| a.cmp(b))
    });
    groups
        .into_iter()
        .filter_map(|((group, period), totals)| {
            value(&totals)
                .map(|value| ResultRow::new(&group, period.as_deref(), value, totals.rows))
        })
        .collect()
}
