use crate::cli::CommandLineArgs;
use crate::error::LoadError;
use crate::models::*;
use crate::source::{Row, SourceInfo, SourceReader};
use crate::types::{Column, ColumnKind, Dataset, Record, Value};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use clap::Parser;
use time::macros::datetime;

/// Create an AggregationRequest object with only required fields set.
pub(crate) fn get_test_aggregation_request() -> AggregationRequest {
    AggregationRequest {
        group_by: "Tipo Input".to_string(),
        measure: None,
        mode: AggregationMode::Count,
        limit: None,
        remainder_label: None,
        period: None,
    }
}

/// Create an AggregationRequest object with all fields set.
pub(crate) fn get_test_aggregation_request_optional() -> AggregationRequest {
    AggregationRequest {
        group_by: "Material".to_string(),
        measure: Some("Massa".to_string()),
        mode: AggregationMode::TopN,
        limit: Some(2),
        remainder_label: Some("Others".to_string()),
        period: Some(PeriodGrouping {
            column: "DataHoraInicio".to_string(),
            granularity: Granularity::Day,
        }),
    }
}

/// Command line arguments with every option at its default.
pub(crate) fn get_test_args() -> CommandLineArgs {
    CommandLineArgs::parse_from(["cyclestat"])
}

/// A small dataset of cycle records.
///
/// | row | DataHoraInicio   | Tipo Input | Massa | Material | Frota transporte |
/// |-----|------------------|------------|-------|----------|------------------|
/// | 0   | 2024-01-05 08:00 | Manual     | 10    | Minerio  | CAM-01           |
/// | 1   | 2024-01-05 09:30 | Automatico | 20    | Minerio  | CAM-02           |
/// | 2   | 2024-01-31 23:15 | Automatico | 30    | Esteril  | CAM-01           |
/// | 3   | 2024-02-01 00:10 | Manual     |       | Esteril  | CAM-03           |
/// | 4   | 2024-02-10 12:00 | Automatico | 5     |          | CAM-02           |
/// | 5   |                  | Manual     | 15    | Minerio  |                  |
/// | 6   | 2024-02-11 07:00 | Automatico | 40    | Rocha    | CAM-03           |
pub(crate) fn sample_dataset() -> Dataset {
    let columns = vec![
        Column::new("DataHoraInicio", ColumnKind::Timestamp),
        Column::new("Tipo Input", ColumnKind::String),
        Column::new("Massa", ColumnKind::Number),
        Column::new("Material", ColumnKind::String),
        Column::new("Frota transporte", ColumnKind::String),
    ];
    let rows = [
        (Some(datetime!(2024-01-05 08:00)), "Manual", Some(10.0), Some("Minerio"), Some("CAM-01")),
        (Some(datetime!(2024-01-05 09:30)), "Automatico", Some(20.0), Some("Minerio"), Some("CAM-02")),
        (Some(datetime!(2024-01-31 23:15)), "Automatico", Some(30.0), Some("Esteril"), Some("CAM-01")),
        (Some(datetime!(2024-02-01 00:10)), "Manual", None, Some("Esteril"), Some("CAM-03")),
        (Some(datetime!(2024-02-10 12:00)), "Automatico", Some(5.0), None, Some("CAM-02")),
        (None, "Manual", Some(15.0), Some("Minerio"), None),
        (Some(datetime!(2024-02-11 07:00)), "Automatico", Some(40.0), Some("Rocha"), Some("CAM-03")),
    ];
    let records = rows
        .into_iter()
        .map(|(start, input, mass, material, fleet)| {
            Record::new(vec![
                start.map(Value::from),
                Some(Value::from(input)),
                mass.map(Value::from),
                material.map(Value::from),
                fleet.map(Value::from),
            ])
        })
        .collect();
    Dataset::new(columns, records)
}

/// Dataset with one row per (group, measure) pair, for aggregation tests.
pub(crate) fn grouped_dataset(groups: &[(&str, f64)]) -> Dataset {
    let columns = vec![
        Column::new("Material", ColumnKind::String),
        Column::new("Massa", ColumnKind::Number),
    ];
    let records = groups
        .iter()
        .map(|(group, mass)| Record::new(vec![Some(Value::from(*group)), Some(Value::from(*mass))]))
        .collect();
    Dataset::new(columns, records)
}

/// Rows of the sample cycle source used by cache, query and API tests.
pub(crate) fn sample_rows() -> Vec<serde_json::Value> {
    vec![
        serde_json::json!({"DataHoraInicio": "2024-01-05 08:00", "Tipo Input": "Manual", "Massa": 10, "Material": "Minerio"}),
        serde_json::json!({"DataHoraInicio": "2024-01-05 09:30", "Tipo Input": "Automatico", "Massa": 20, "Material": "Minerio"}),
        serde_json::json!({"DataHoraInicio": "2024-02-01 00:10", "Tipo Input": "Manual", "Massa": 30, "Material": "Esteril"}),
    ]
}

/// In-memory [SourceReader] that counts reads and can be slowed down or made to fail.
pub(crate) struct MemoryReader {
    sources: Mutex<BTreeMap<String, (SourceInfo, Vec<Row>)>>,
    reads: AtomicUsize,
    clock: AtomicU64,
    failing: AtomicBool,
    delay: Duration,
    discover_stall: Mutex<Option<Duration>>,
}

impl MemoryReader {
    pub(crate) fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    /// Every read sleeps for `delay` before returning.
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            sources: Mutex::new(BTreeMap::new()),
            reads: AtomicUsize::new(0),
            clock: AtomicU64::new(0),
            failing: AtomicBool::new(false),
            delay,
            discover_stall: Mutex::new(None),
        }
    }

    /// Add or replace a source, advancing its modification time.
    pub(crate) fn set_source(&self, id: &str, rows: Vec<serde_json::Value>) {
        let tick = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        let info = SourceInfo {
            id: id.to_string(),
            modified: SystemTime::UNIX_EPOCH + Duration::from_secs(tick),
            size: serde_json::to_string(&rows).unwrap().len() as u64,
        };
        self.sources
            .lock()
            .unwrap()
            .insert(id.to_string(), (info, to_rows(rows)));
    }

    /// Replace the rows of a source without touching its metadata.
    pub(crate) fn replace_rows_silently(&self, id: &str, rows: Vec<serde_json::Value>) {
        let mut sources = self.sources.lock().unwrap();
        let entry = sources.get_mut(id).unwrap();
        entry.1 = to_rows(rows);
    }

    pub(crate) fn remove_source(&self, id: &str) {
        self.sources.lock().unwrap().remove(id);
    }

    /// Make subsequent reads fail.
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make the next discovery list the sources, then sleep for `stall` before returning them.
    pub(crate) fn stall_next_discover(&self, stall: Duration) {
        *self.discover_stall.lock().unwrap() = Some(stall);
    }

    /// Number of source reads performed so far.
    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

fn to_rows(rows: Vec<serde_json::Value>) -> Vec<Row> {
    rows.into_iter()
        .map(|row| match row {
            serde_json::Value::Object(row) => row,
            other => panic!("test rows must be objects, got {other}"),
        })
        .collect()
}

impl SourceReader for MemoryReader {
    fn location(&self) -> String {
        "memory".to_string()
    }

    fn discover(&self) -> Result<Vec<SourceInfo>, LoadError> {
        let listed = {
            let sources = self.sources.lock().unwrap();
            sources.values().map(|(info, _)| info.clone()).collect()
        };
        if let Some(stall) = self.discover_stall.lock().unwrap().take() {
            std::thread::sleep(stall);
        }
        Ok(listed)
    }

    fn read(&self, source: &SourceInfo) -> Result<Vec<Row>, LoadError> {
        std::thread::sleep(self.delay);
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(LoadError::Read {
                source_id: source.id.clone(),
                error: std::io::Error::new(std::io::ErrorKind::Other, "simulated failure"),
            });
        }
        let sources = self.sources.lock().unwrap();
        match sources.get(&source.id) {
            Some((_, rows)) => Ok(rows.clone()),
            None => Err(LoadError::Read {
                source_id: source.id.clone(),
                error: std::io::Error::new(std::io::ErrorKind::NotFound, "removed"),
            }),
        }
    }
}
