use std::hint::black_box;

use chrono::NaiveDate;
use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use lab_intake::{
    data::{Gender, Table},
    import::{ImportOptions, MemorySink, import_dataset},
    io_utils::parse_table,
    mapping::infer_mapping,
    ranges::RangePool,
    resolve::PatientProfile,
};

const TESTS: [&str; 4] = ["Glucose", "Hemoglobin", "Creatinine", "Heart Rate"];

fn generate_export(rows: usize) -> String {
    let mut text = String::from("Sr No,Patient,Test,Result,Units,Date,Age,Sex\n");
    for i in 0..rows {
        let test = TESTS[i % TESTS.len()];
        let sex = if i % 2 == 0 { "M" } else { "F" };
        let day = (i % 28) + 1;
        let hour = i % 24;
        text.push_str(&format!(
            "{i},P{:05},{test},{}.{},mg/dL,2024-01-{day:02} {hour:02}:15,{},{sex}\n",
            i % 5000,
            60 + i % 40,
            i % 10,
            18 + i % 60,
        ));
    }
    text
}

fn bench_import(c: &mut Criterion) {
    let table: Table = parse_table(&generate_export(20_000), b',').expect("parse export");
    let mapping = infer_mapping(&table.headers);
    let options = ImportOptions {
        processing_date: NaiveDate::from_ymd_opt(2025, 1, 1).expect("valid date"),
        ..ImportOptions::default()
    };

    let mut group = c.benchmark_group("import");
    group.sample_size(20);

    group.bench_function("with_duplicate_check", |b| {
        b.iter_batched(
            MemorySink::new,
            |mut sink| {
                let summary =
                    import_dataset(&table, &mapping, &mut sink, &options).expect("import");
                black_box(summary.rows_accepted);
            },
            BatchSize::LargeInput,
        );
    });

    let unchecked = ImportOptions {
        check_duplicates: false,
        ..options.clone()
    };
    group.bench_function("without_duplicate_check", |b| {
        b.iter_batched(
            MemorySink::new,
            |mut sink| {
                let summary =
                    import_dataset(&table, &mapping, &mut sink, &unchecked).expect("import");
                black_box(summary.rows_accepted);
            },
            BatchSize::LargeInput,
        );
    });
    group.finish();
}

fn bench_resolve(c: &mut Criterion) {
    let pool = RangePool::with_builtins();
    let profiles = [
        PatientProfile::new(Some(8), None, None),
        PatientProfile::new(Some(34), Some(Gender::Female), None),
        PatientProfile::new(None, Some(Gender::Male), None),
        PatientProfile::default(),
    ];
    c.bench_function("resolve_builtin", |b| {
        b.iter(|| {
            for profile in &profiles {
                for test in TESTS {
                    black_box(pool.resolve(test, profile));
                }
            }
        });
    });
}

criterion_group!(benches, bench_import, bench_resolve);
criterion_main!(benches);
