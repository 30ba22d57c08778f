/// Benchmarks for row filtering.
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use cyclestat::filter::FilterEngine;
use cyclestat::models::{DateRange, FilterSpec};
use cyclestat::types::timestamp::from_unix_seconds;
use cyclestat::types::{Column, ColumnKind, Dataset, DateBound, Record, Value};

const MATERIALS: [&str; 4] = ["Minerio", "Esteril", "Rocha", "Argila"];
const INPUTS: [&str; 2] = ["Manual", "Automatico"];

fn get_test_dataset(rows: usize) -> Dataset {
    let columns = vec![
        Column::new("DataHoraInicio", ColumnKind::Timestamp),
        Column::new("Tipo Input", ColumnKind::String),
        Column::new("Material", ColumnKind::String),
        Column::new("Massa", ColumnKind::Number),
    ];
    // One record every ten minutes from 2024-01-01.
    let records = (0..rows)
        .map(|i| {
            Record::new(vec![
                from_unix_seconds(1_704_067_200.0 + 600.0 * i as f64).map(Value::from),
                Some(Value::from(INPUTS[i % INPUTS.len()])),
                Some(Value::from(MATERIALS[i % MATERIALS.len()])),
                Some(Value::from((i % 97) as f64)),
            ])
        })
        .collect();
    Dataset::new(columns, records)
}

fn criterion_benchmark(c: &mut Criterion) {
    let date_range = DateRange {
        column: "DataHoraInicio".to_string(),
        start: DateBound::parse("2024-01-15"),
        end: DateBound::parse("2024-02-15"),
    };
    let filters = [
        ("none", FilterSpec::new()),
        ("values", FilterSpec::new().with_values("Material", ["Minerio", "Rocha"])),
        (
            "values+dates",
            FilterSpec::new()
                .with_values("Material", ["Minerio", "Rocha"])
                .with_values("Tipo Input", ["Manual"])
                .with_date_range(date_range),
        ),
    ];
    for size_k in [1, 16, 256] {
        let size = size_k * 1024;
        let dataset = get_test_dataset(size);
        for use_rayon in [false, true] {
            let engine = FilterEngine::new(use_rayon);
            for (filter_name, filter) in &filters {
                let name = format!("filter({}, {}, rayon={})", filter_name, size, use_rayon);
                c.bench_function(&name, |b| {
                    b.iter(|| engine.apply(black_box(&dataset), filter))
                });
            }
        }
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
