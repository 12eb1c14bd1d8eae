// Benchmark for GRBL response parsing and command formatting
// Run with: cargo bench

use criterion::{criterion_group, criterion_main, Criterion};
use grbl_motors::grbl::{Axis, GrblResponse, MotionCommand};
use std::hint::black_box;

fn bench_response_parsing(c: &mut Criterion) {
    let lines: Vec<String> = (0..10_000)
        .map(|i| match i % 4 {
            0 => "ok".to_string(),
            1 => format!("<Run|MPos:{}.000,{}.500,0.000|FS:500,0|WCO:0.000,0.000,0.000>", i, i),
            2 => format!("${}={}.000", 100 + i % 30, i),
            _ => "[MSG:Caution: Unlocked]".to_string(),
        })
        .collect();
    c.bench_function("parse 10k GRBL responses", |b| {
        b.iter(|| {
            let statuses = lines
                .iter()
                .map(|l| GrblResponse::parse(black_box(l)))
                .filter(|r| matches!(r, GrblResponse::Status(_)))
                .count();
            assert_eq!(statuses, 2_500);
        });
    });
}

fn bench_command_formatting(c: &mut Criterion) {
    c.bench_function("format 10k motion commands", |b| {
        b.iter(|| {
            for steps in 1..=10_000i64 {
                let cmd = MotionCommand::relative(Axis::ALL[steps as usize % 4], steps, Some(500.0));
                black_box(cmd.to_gcode(1000.0, 6400.0));
            }
        });
    });
}

criterion_group!(benches, bench_response_parsing, bench_command_formatting);
criterion_main!(benches);
