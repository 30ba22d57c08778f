//! Query entry point
//!
//! [QueryFacade] is what the API layer talks to. A query obtains a dataset from the
//! [CacheManager], filters it with the [FilterEngine] and aggregates the result with an
//! [AggregationPlan]. Filtering and aggregation are CPU bound and run on the rayon thread pool
//! when configured.

use crate::aggregate::AggregationPlan;
use crate::cache::{CacheManager, Snapshot};
use crate::error::{ConfigError, CycleStatError, Warning};
use crate::filter::FilterEngine;
use crate::metrics::{QUERIES, QUERY_TIME_COLLECTOR};
use crate::models::{
    AggregationRequest, CacheStatus, DistinctValues, FilterSpec, InvalidateReport, QueryMetadata,
    QueryResult, ResultRow,
};

use std::time::Instant;

use tracing::{event, Level};
use uuid::Uuid;

/// Output of the CPU bound part of a query
struct Computed {
    matched_rows: usize,
    rows: Vec<ResultRow>,
    warnings: Vec<Warning>,
}

/// Single entry point for queries against the cached dataset
#[derive(Clone)]
pub struct QueryFacade {
    cache: CacheManager,
    filter: FilterEngine,
    use_rayon: bool,
}

impl QueryFacade {
    /// Return a new QueryFacade.
    ///
    /// # Arguments
    ///
    /// * `cache`: Dataset cache
    /// * `use_rayon`: Whether to filter and aggregate on the rayon thread pool
    pub fn new(cache: CacheManager, use_rayon: bool) -> Self {
        Self {
            cache,
            filter: FilterEngine::new(use_rayon),
            use_rayon,
        }
    }

    /// Filter the current dataset and aggregate the remaining rows.
    ///
    /// Returns [CycleStatError::Config] if the aggregation does not fit the dataset and
    /// [CycleStatError::Load] if no dataset can be produced.
    #[tracing::instrument(level = "DEBUG", skip_all, fields(query_id = tracing::field::Empty, mode = %aggregation.mode))]
    pub async fn run(
        &self,
        filters: &FilterSpec,
        aggregation: &AggregationRequest,
    ) -> Result<QueryResult, CycleStatError> {
        let started = Instant::now();
        let query_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("query_id", query_id.as_str());

        let snapshot = self.cache.get_current_dataset().await?;
        let computed = self
            .compute(snapshot.clone(), filters.clone(), aggregation.clone())
            .await?;

        let mut warnings: Vec<Warning> = snapshot.warning.clone().into_iter().collect();
        warnings.extend(computed.warnings);

        let elapsed = started.elapsed();
        let mode = aggregation.mode.to_string();
        QUERIES.with_label_values(&[&mode]).inc();
        QUERY_TIME_COLLECTOR
            .with_label_values(&[&mode])
            .observe(elapsed.as_secs_f64());
        event!(
            Level::DEBUG,
            matched_rows = computed.matched_rows,
            groups = computed.rows.len(),
            cache = %snapshot.outcome,
            "query answered"
        );

        Ok(QueryResult {
            metadata: QueryMetadata {
                query_id,
                total_rows: snapshot.dataset().len(),
                matched_rows: computed.matched_rows,
                groups: computed.rows.len(),
                cache: snapshot.outcome,
                generation: snapshot.entry.generation,
                fingerprint: snapshot.entry.fingerprint.digest().to_string(),
                elapsed_ms: elapsed.as_secs_f64() * 1000.0,
                warnings,
            },
            rows: computed.rows,
        })
    }

    /// Returns the sorted, non-null distinct values of a column.
    ///
    /// A column that is not in the dataset yields no values and a warning.
    pub async fn list_distinct_values(
        &self,
        column: &str,
    ) -> Result<DistinctValues, CycleStatError> {
        let snapshot = self.cache.get_current_dataset().await?;
        let mut warnings: Vec<Warning> = snapshot.warning.clone().into_iter().collect();
        let values = match snapshot.dataset().column(column) {
            Some((index, _)) => snapshot.dataset().distinct_values(index).into_iter().collect(),
            None => {
                let warning = Warning::UnknownColumn {
                    column: column.to_string(),
                };
                event!(Level::WARN, %warning, "distinct values requested");
                warnings.push(warning);
                Vec::new()
            }
        };
        Ok(DistinctValues {
            column: column.to_string(),
            values,
            warnings,
        })
    }

    pub async fn cache_status(&self) -> Result<CacheStatus, CycleStatError> {
        self.cache.cache_status().await
    }

    pub fn force_invalidate(&self) -> InvalidateReport {
        self.cache.force_invalidate()
    }

    /// Filter and aggregate, on the rayon thread pool if enabled.
    async fn compute(
        &self,
        snapshot: Snapshot,
        filters: FilterSpec,
        aggregation: AggregationRequest,
    ) -> Result<Computed, CycleStatError> {
        let filter = self.filter;
        let work = move || -> Result<Computed, ConfigError> {
            let dataset = snapshot.dataset();
            // Resolve first so a bad request fails even when no row matches.
            let plan = AggregationPlan::resolve(dataset, &aggregation)?;
            let filtered = filter.apply(dataset, &filters);
            let rows = plan.execute(dataset, &filtered.view);
            Ok(Computed {
                matched_rows: filtered.view.len(),
                rows,
                warnings: filtered.warnings,
            })
        };
        let computed = if self.use_rayon {
            tokio_rayon::spawn(work).await
        } else {
            work()
        };
        Ok(computed?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{Schema, SourceLoader};
    use crate::models::{AggregationMode, CacheOutcome, REMAINDER_LABEL};
    use crate::test_utils::{sample_rows, MemoryReader};

    use std::sync::Arc;

    use serde_json::json;

    fn facade(reader: &Arc<MemoryReader>, use_rayon: bool) -> QueryFacade {
        let cache = CacheManager::new(SourceLoader::new(reader.clone(), Schema::cycle()));
        QueryFacade::new(cache, use_rayon)
    }

    fn reader() -> Arc<MemoryReader> {
        let reader = MemoryReader::new();
        reader.set_source("a.jsonl", sample_rows());
        Arc::new(reader)
    }

    fn pairs(result: &QueryResult) -> Vec<(&str, f64)> {
        result
            .rows
            .iter()
            .map(|r| (r.group.as_str(), r.value))
            .collect()
    }

    #[tokio::test]
    async fn run_count() {
        let reader = reader();
        let facade = facade(&reader, false);
        let request = AggregationRequest::new("Material", AggregationMode::Count);
        let result = facade.run(&FilterSpec::new(), &request).await.unwrap();
        assert_eq!(vec![("Esteril", 1.0), ("Minerio", 2.0)], pairs(&result));
        assert_eq!(3, result.metadata.total_rows);
        assert_eq!(3, result.metadata.matched_rows);
        assert_eq!(2, result.metadata.groups);
        assert_eq!(CacheOutcome::Miss, result.metadata.cache);
        assert_eq!(1, result.metadata.generation);
        assert!(result.metadata.warnings.is_empty());
        assert!(Uuid::parse_str(&result.metadata.query_id).is_ok());

        let again = facade.run(&FilterSpec::new(), &request).await.unwrap();
        assert_eq!(CacheOutcome::Hit, again.metadata.cache);
        assert_ne!(result.metadata.query_id, again.metadata.query_id);
    }

    #[tokio::test]
    async fn run_filtered_sum_with_warning() {
        let reader = reader();
        let facade = facade(&reader, false);
        let filters = FilterSpec::new()
            .with_values("Tipo Input", ["Manual"])
            .with_values("Turno", ["A"]);
        let request = AggregationRequest::new("Material", AggregationMode::Sum).with_measure("Massa");
        let result = facade.run(&filters, &request).await.unwrap();
        assert_eq!(vec![("Esteril", 30.0), ("Minerio", 10.0)], pairs(&result));
        assert_eq!(2, result.metadata.matched_rows);
        assert_eq!(
            vec![Warning::UnknownFilterColumn {
                column: "Turno".to_string()
            }],
            result.metadata.warnings
        );
    }

    #[tokio::test]
    async fn run_on_rayon() {
        let reader = reader();
        let facade = facade(&reader, true);
        let request = AggregationRequest::new("Material", AggregationMode::TopN)
            .with_measure("Massa")
            .with_limit(1);
        let result = facade.run(&FilterSpec::new(), &request).await.unwrap();
        assert_eq!(vec![("Esteril", 30.0), (REMAINDER_LABEL, 30.0)], pairs(&result));
    }

    #[tokio::test]
    async fn empty_result_is_not_an_error() {
        let reader = reader();
        let facade = facade(&reader, false);
        let filters = FilterSpec::new().with_values("Material", ["Ouro"]);
        let request = AggregationRequest::new("Material", AggregationMode::Count);
        let result = facade.run(&filters, &request).await.unwrap();
        assert!(result.rows.is_empty());
        assert_eq!(0, result.metadata.matched_rows);
    }

    #[tokio::test]
    async fn unknown_group_column_is_config_error() {
        let reader = reader();
        let facade = facade(&reader, false);
        let request = AggregationRequest::new("Turno", AggregationMode::Count);
        let error = facade.run(&FilterSpec::new(), &request).await.unwrap_err();
        assert!(
            matches!(error, CycleStatError::Config(ConfigError::UnknownColumn { .. })),
            "{error:?}"
        );
    }

    #[tokio::test]
    async fn load_error_without_dataset() {
        let facade = facade(&Arc::new(MemoryReader::new()), false);
        let request = AggregationRequest::new("Material", AggregationMode::Count);
        let error = facade.run(&FilterSpec::new(), &request).await.unwrap_err();
        assert!(matches!(error, CycleStatError::Load(_)), "{error:?}");
    }

    #[tokio::test]
    async fn stale_warning_is_reported() {
        let reader = reader();
        let facade = facade(&reader, false);
        let request = AggregationRequest::new("Material", AggregationMode::Count);
        facade.run(&FilterSpec::new(), &request).await.unwrap();

        reader.set_source("b.jsonl", vec![json!({"Material": "Rocha"})]);
        let result = facade.run(&FilterSpec::new(), &request).await.unwrap();
        assert_eq!(CacheOutcome::Stale, result.metadata.cache);
        assert_eq!(3, result.metadata.total_rows);
        assert!(matches!(
            result.metadata.warnings.as_slice(),
            [Warning::StaleData { .. }]
        ));
    }

    #[tokio::test]
    async fn invalidate_then_run_sees_changes() {
        let reader = reader();
        let facade = facade(&reader, false);
        let request = AggregationRequest::new("Material", AggregationMode::Count);
        facade.run(&FilterSpec::new(), &request).await.unwrap();

        reader.replace_rows_silently(
            "a.jsonl",
            vec![json!({"DataHoraInicio": "2024-03-01", "Material": "Rocha"})],
        );
        let report = facade.force_invalidate();
        assert!(report.had_dataset);
        let result = facade.run(&FilterSpec::new(), &request).await.unwrap();
        assert_eq!(vec![("Rocha", 1.0)], pairs(&result));
        assert_eq!(CacheOutcome::Miss, result.metadata.cache);
    }

    #[tokio::test]
    async fn distinct_values() {
        let reader = reader();
        let facade = facade(&reader, false);
        let values = facade.list_distinct_values("Tipo Input").await.unwrap();
        assert_eq!(vec!["Automatico", "Manual"], values.values);
        assert!(values.warnings.is_empty());

        let values = facade.list_distinct_values("Massa").await.unwrap();
        assert_eq!(vec!["10", "20", "30"], values.values);
    }

    #[tokio::test]
    async fn distinct_values_of_unknown_column() {
        let reader = reader();
        let facade = facade(&reader, false);
        let values = facade.list_distinct_values("Turno").await.unwrap();
        assert!(values.values.is_empty());
        assert_eq!(
            vec![Warning::UnknownColumn {
                column: "Turno".to_string()
            }],
            values.warnings
        );
    }

    #[tokio::test]
    async fn status_and_invalidate() {
        let reader = reader();
        let facade = facade(&reader, false);
        assert!(!facade.cache_status().await.unwrap().cached);
        facade.list_distinct_values("Material").await.unwrap();
        let status = facade.cache_status().await.unwrap();
        assert!(status.cached);
        assert_eq!(3, status.row_count);
        assert!(facade.force_invalidate().had_dataset);
        assert!(!facade.force_invalidate().had_dataset);
    }
}
