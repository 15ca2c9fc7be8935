//! Benchmarks for generated-code execution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gateflow::exec::{Cell, CodeRunner, ExecutionNamespace, Table};

fn orders(rows: i64) -> Table {
    let regions = ["north", "south", "east", "west"];
    Table::from_pairs(vec![
        ("order_id".into(), (0..rows).map(Cell::Int).collect()),
        (
            "region".into(),
            (0..rows)
                .map(|i| Cell::Str(regions[(i % 4) as usize].to_string()))
                .collect(),
        ),
        (
            "amount".into(),
            (0..rows).map(|i| Cell::Float((i % 97) as f64 * 1.5)).collect(),
        ),
    ])
    .expect("columns have equal length")
}

fn interpreter_benchmark(c: &mut Criterion) {
    let runner = CodeRunner::new();
    let base = ExecutionNamespace::from_tables(vec![("orders".into(), orders(5_000))]);
    let code = vec![
        "big = orders[orders['amount'] > 50]".to_string(),
        "totals = big.groupby('region')['amount'].sum()".to_string(),
        "result = totals.reset_index().sort_values('amount', ascending=False)".to_string(),
    ];

    c.bench_function("groupby_sum_5k", |b| {
        b.iter(|| {
            let mut ns = base.clone();
            black_box(runner.run_lines(black_box(&code), &mut ns))
        });
    });

    c.bench_function("parse_and_filter", |b| {
        b.iter(|| {
            let mut ns = base.clone();
            black_box(runner.run(black_box("result = orders.head(10)"), &mut ns))
        });
    });
}

criterion_group!(benches, interpreter_benchmark);
criterion_main!(benches);
