//! Filter chain composition benchmarks.
//!
//! ```bash
//! cargo bench --package loopclip-media --bench filter_chain
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use loopclip_media::filters::{compose, ComposeParams};

fn params(crop: bool, zoom: f64) -> ComposeParams {
    ComposeParams {
        input_width: 1920,
        input_height: 1080,
        output_width: 1080,
        output_height: 1920,
        crop,
        zoom,
        framerate: 30.0,
    }
}

fn bench_compose(c: &mut Criterion) {
    let mut group = c.benchmark_group("compose");

    for (name, crop, zoom) in [("crop", true, 0.0), ("pad", false, 0.0), ("pad_zoom", false, 40.0)] {
        let p = params(crop, zoom);
        group.bench_with_input(BenchmarkId::from_parameter(name), &p, |b, p| {
            b.iter(|| compose(black_box(p)).to_string())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_compose);
criterion_main!(benches);
