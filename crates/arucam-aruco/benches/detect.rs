use arucam_aruco::{
    adaptive_threshold_inv, render_marker, Dictionary, DetectorParams, MarkerDetector,
};
use arucam_core::GrayImage;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// White canvas with a grid of markers pasted at integer offsets.
fn synthetic_scene(dict: &Dictionary, width: usize, height: usize, side: usize) -> GrayImage {
    let mut canvas = GrayImage::filled(width, height, 255);
    let step = side + side / 2;
    let mut id = 0u32;
    for oy in (side / 2..height.saturating_sub(side)).step_by(step) {
        for ox in (side / 2..width.saturating_sub(side)).step_by(step) {
            let Ok(marker) = render_marker(dict, id % dict.len() as u32, side, 1) else {
                continue;
            };
            for y in 0..side {
                let dst = (oy + y) * width + ox;
                canvas.data[dst..dst + side].copy_from_slice(&marker.data[y * side..(y + 1) * side]);
            }
            id += 1;
        }
    }
    canvas
}

fn bench_detect(c: &mut Criterion) {
    let dict = Dictionary::generate("ARUCAM_7X7_50", 50, 7, 0).unwrap();
    let detector = MarkerDetector::new(dict.clone(), DetectorParams::default());

    let mut group = c.benchmark_group("detect_markers");
    for (width, height) in [(640, 480), (1280, 720), (1920, 1080)] {
        let scene = synthetic_scene(&dict, width, height, height / 6);
        let id = format!("{}x{}", width, height);
        group.bench_with_input(BenchmarkId::new("full", &id), &scene, |b, img| {
            b.iter(|| detector.detect(black_box(&img.view())))
        });
        group.bench_with_input(BenchmarkId::new("threshold", &id), &scene, |b, img| {
            b.iter(|| adaptive_threshold_inv(black_box(&img.view()), 13, 7.0))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_detect);
criterion_main!(benches);
