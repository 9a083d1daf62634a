//! Diff Operations Benchmarks
//!
//! Benchmarks for pixel diffing, masking and verdict evaluation.
//!
//! Run with: `cargo bench --bench diff_ops`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{Rgba, RgbaImage};
use visreg::{ImageDiffer, Region, VerdictPolicy};

fn noisy(width: u32, height: u32, every: u32) -> RgbaImage {
    let mut image = RgbaImage::from_pixel(width, height, Rgba([240, 240, 240, 255]));
    for (i, pixel) in image.pixels_mut().enumerate() {
        if every > 0 && i as u32 % every == 0 {
            *pixel = Rgba([20, 40, 200, 255]);
        }
    }
    image
}

fn bench_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("image_diff");

    let sizes = vec![
        (375, 667, "375x667"),
        (1280, 720, "1280x720"),
        (1920, 1080, "1920x1080"),
    ];

    for (width, height, name) in sizes {
        let baseline = noisy(width, height, 0);
        let actual = noisy(width, height, 97);
        group.bench_with_input(
            BenchmarkId::from_parameter(name),
            &(baseline, actual),
            |bench, (baseline, actual)| {
                let differ = ImageDiffer::new(0.1);
                bench.iter(|| {
                    let output = differ.diff(black_box(baseline), black_box(actual), &[]);
                    black_box(output)
                });
            },
        );
    }

    group.finish();
}

fn bench_diff_with_masks(c: &mut Criterion) {
    let mut group = c.benchmark_group("image_diff_masked");
    let baseline = noisy(1280, 720, 0);
    let actual = noisy(1280, 720, 13);

    for count in [1u32, 10, 100] {
        let masks: Vec<Region> = (0..count)
            .map(|i| Region::new((i * 37) % 1200, (i * 53) % 700, 64, 16))
            .collect();
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{count}_masks")),
            &masks,
            |bench, masks| {
                let differ = ImageDiffer::new(0.1);
                bench.iter(|| black_box(differ.diff(&baseline, &actual, black_box(masks))));
            },
        );
    }

    group.finish();
}

fn bench_verdict(c: &mut Criterion) {
    let baseline = noisy(800, 600, 0);
    let actual = noisy(800, 600, 211);
    let Ok(output) = ImageDiffer::new(0.1).diff(&baseline, &actual, &[]) else {
        return;
    };
    let policy = VerdictPolicy::exact()
        .with_max_diff_pixels(100)
        .with_max_diff_ratio(0.01);

    c.bench_function("verdict_evaluate", |bench| {
        bench.iter(|| black_box(policy.evaluate(black_box(&output.summary))));
    });
}

criterion_group!(benches, bench_diff, bench_diff_with_masks, bench_verdict);
criterion_main!(benches);
