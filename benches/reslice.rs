use atlas_registration::data::{BitDepth, Dims, Reslicer, Volume};
use atlas_registration::transform::DeformationField;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn test_volume(size: usize) -> Volume {
    Volume::from_fn(Dims::new(size, size, size), BitDepth::Eight, |x, y, z| {
        ((x * 31 + y * 17 + z * 7) % 256) as f32
    })
    .unwrap()
}

fn reslice_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("reslice");
    for size in [32, 64, 128] {
        let volume = test_volume(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &volume, |b, v| {
            b.iter(|| Reslicer::reslice(black_box(v)).unwrap())
        });
    }
    group.finish();
}

fn warp_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("warp_slice");
    for size in [64, 256] {
        let volume = test_volume(size);
        let field = DeformationField::translation(4, size, size, 1.5, -0.5).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), &volume, |b, v| {
            b.iter(|| field.warp_slice(black_box(v.slice(0)), BitDepth::Eight))
        });
    }
    group.finish();
}

criterion_group!(benches, reslice_benchmarks, warp_benchmarks);
criterion_main!(benches);
