//! Benchmarks for gain map composition and generation.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use hdrconv_core::{
    CanonicalRendering, Composer, GainmapComposer, GainmapGenerator, GainmapVariant,
    GenerateOptions, Generator,
};
use std::hint::black_box;

/// Create a test rendering with a gradient reaching 4x SDR white.
fn create_rendering(width: u32, height: u32) -> CanonicalRendering {
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            let fx = x as f32 / width.max(1) as f32;
            let fy = y as f32 / height.max(1) as f32;
            data.extend([fx * 4.0, fy * 2.0, 0.5]);
        }
    }
    CanonicalRendering::new(width, height, data).unwrap()
}

fn bench_compose(c: &mut Criterion) {
    let mut group = c.benchmark_group("compose");

    let sizes = [(256, 256), (512, 512), (1024, 1024), (1920, 1080)];

    for (width, height) in sizes {
        let pixels = (width * height) as u64;
        group.throughput(Throughput::Elements(pixels));

        let rendering = create_rendering(width, height);
        let options = GenerateOptions {
            gainmap_scale: 4,
            ..Default::default()
        };
        for (name, variant) in [("iso", GainmapVariant::Iso), ("apple", GainmapVariant::Apple)] {
            let container = GainmapGenerator::new(variant)
                .generate(&rendering, &options)
                .unwrap();
            group.bench_with_input(
                BenchmarkId::new(name, format!("{}x{}", width, height)),
                &container,
                |b, container| {
                    b.iter_batched(
                        || container.clone(),
                        |container| GainmapComposer.compose(black_box(container)).unwrap(),
                        BatchSize::LargeInput,
                    );
                },
            );
        }
    }

    group.finish();
}

fn bench_generate(c: &mut Criterion) {
    let mut group = c.benchmark_group("generate");

    let sizes = [(256, 256), (512, 512), (1024, 1024), (1920, 1080)];

    for (width, height) in sizes {
        let pixels = (width * height) as u64;
        group.throughput(Throughput::Elements(pixels));

        let rendering = create_rendering(width, height);
        let cases = [
            ("iso_multichannel", GainmapVariant::Iso, true),
            ("iso_luminance", GainmapVariant::Iso, false),
            ("apple", GainmapVariant::Apple, false),
        ];
        for (name, variant, multichannel) in cases {
            let generator = GainmapGenerator::new(variant);
            let options = GenerateOptions {
                gainmap_scale: 4,
                multichannel,
                ..Default::default()
            };
            group.bench_with_input(
                BenchmarkId::new(name, format!("{}x{}", width, height)),
                &(width, height),
                |b, _| {
                    b.iter(|| {
                        generator
                            .generate(black_box(&rendering), black_box(&options))
                            .unwrap()
                    });
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_compose, bench_generate);
criterion_main!(benches);
