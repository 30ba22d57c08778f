//! Row filtering
//!
//! [FilterEngine::apply] narrows a [RowView] of a [Dataset] by the constraints of a
//! [FilterSpec]. Views are lists of row indices, so filtering never copies or mutates records
//! and a filtered view can be filtered again.

use crate::error::Warning;
use crate::models::FilterSpec;
use crate::types::{ColumnKind, Dataset, DateBound, Value};

use std::collections::BTreeSet;

use rayon::prelude::*;
use tracing::{event, Level};

/// Views shorter than this are filtered sequentially even when rayon is enabled.
const PARALLEL_THRESHOLD: usize = 16 * 1024;

/// Ascending indices of the rows of a [Dataset] that passed filtering
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RowView {
    rows: Vec<usize>,
}

impl RowView {
    /// Return a view of every row of `dataset`.
    pub fn all(dataset: &Dataset) -> Self {
        Self {
            rows: (0..dataset.len()).collect(),
        }
    }

    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.rows.iter().copied()
    }
}

/// Result of filtering
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filtered {
    pub view: RowView,
    /// Constraints that were skipped
    pub warnings: Vec<Warning>,
}

/// A constraint resolved against the columns of a dataset
enum Predicate<'a> {
    /// Value key must be one of the allowed values
    OneOf {
        column: usize,
        values: &'a BTreeSet<String>,
    },
    /// Timestamp must lie within the bounds
    Within {
        column: usize,
        start: Option<DateBound>,
        end: Option<DateBound>,
    },
}

impl Predicate<'_> {
    fn matches(&self, dataset: &Dataset, row: usize) -> bool {
        match self {
            Self::OneOf { column, values } => match dataset.value(row, *column) {
                None => false,
                Some(Value::Str(s)) => values.contains(s.as_str()),
                Some(value) => values.contains(&*value.key()),
            },
            Self::Within { column, start, end } => {
                match dataset.value(row, *column).and_then(Value::as_timestamp) {
                    None => false,
                    Some(ts) => {
                        start.map_or(true, |s| s.admits_from(ts))
                            && end.map_or(true, |e| e.admits_until(ts))
                    }
                }
            }
        }
    }
}

/// Applies [FilterSpec]s to datasets.
#[derive(Clone, Copy, Debug, Default)]
pub struct FilterEngine {
    use_rayon: bool,
}

impl FilterEngine {
    /// Return a new FilterEngine.
    ///
    /// # Arguments
    ///
    /// * `use_rayon`: Whether to filter large views on the rayon thread pool
    pub fn new(use_rayon: bool) -> Self {
        Self { use_rayon }
    }

    /// Filter every row of `dataset`.
    pub fn apply(&self, dataset: &Dataset, filters: &FilterSpec) -> Filtered {
        self.apply_to(dataset, &RowView::all(dataset), filters)
    }

    /// Filter the rows of an existing view of `dataset`.
    ///
    /// Constraints on different columns are combined with logical AND. A constraint on a
    /// column that is not in the dataset is skipped with a warning, as is a date range over
    /// a column that does not hold timestamps. Null values never match an active constraint.
    #[tracing::instrument(level = "DEBUG", skip_all, fields(rows = view.len()))]
    pub fn apply_to(
        &self,
        dataset: &Dataset,
        view: &RowView,
        filters: &FilterSpec,
    ) -> Filtered {
        if filters.is_pass_through() {
            return Filtered {
                view: view.clone(),
                warnings: Vec::new(),
            };
        }
        let (predicates, warnings) = resolve(dataset, filters);
        for warning in &warnings {
            event!(Level::WARN, %warning, "filter constraint skipped");
        }
        if predicates.is_empty() {
            return Filtered {
                view: view.clone(),
                warnings,
            };
        }

        let keep = |row: &usize| predicates.iter().all(|p| p.matches(dataset, *row));
        let rows: Vec<usize> = if self.use_rayon && view.len() >= PARALLEL_THRESHOLD {
            view.rows.par_iter().copied().filter(keep).collect()
        } else {
            view.rows.iter().copied().filter(keep).collect()
        };
        event!(Level::DEBUG, matched = rows.len(), "filtered");
        Filtered {
            view: RowView { rows },
            warnings,
        }
    }
}

/// Resolve the active constraints of `filters` against the columns of `dataset`.
fn resolve<'a>(
    dataset: &Dataset,
    filters: &'a FilterSpec,
) -> (Vec<Predicate<'a>>, Vec<Warning>) {
    let mut predicates = Vec::new();
    let mut warnings = Vec::new();

    for (name, values) in filters.active_constraints() {
        match dataset.column(name) {
            Some((column, _)) => predicates.push(Predicate::OneOf { column, values }),
            None => warnings.push(Warning::UnknownFilterColumn {
                column: name.to_string(),
            }),
        }
    }

    if let Some(range) = filters.date_range.as_ref().filter(|r| !r.is_unbounded()) {
        match dataset.column(&range.column) {
            Some((column, spec)) if spec.kind == ColumnKind::Timestamp => {
                predicates.push(Predicate::Within {
                    column,
                    start: range.start,
                    end: range.end,
                })
            }
            Some((_, spec)) => warnings.push(Warning::NonTimestampFilterColumn {
                column: range.column.clone(),
                kind: spec.kind,
            }),
            None => warnings.push(Warning::UnknownFilterColumn {
                column: range.column.clone(),
            }),
        }
    }

    (predicates, warnings)
}
