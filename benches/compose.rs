use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::{Rgb, RgbImage, Rgba, RgbaImage};
use photobooth::compose::{compose, Frame};

fn photo(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    })
}

fn frame(width: u32, height: u32, border: u32) -> Frame {
    let overlay = RgbaImage::from_fn(width, height, |x, y| {
        let inside =
            x >= border && y >= border && x < width - border && y < height - border;
        if inside {
            Rgba([0, 0, 0, 0])
        } else {
            Rgba([240, 200, 40, 255])
        }
    });
    Frame::from_overlay("bench.png", "bench.png", overlay).expect("frame has a window")
}

fn bench_compose(c: &mut Criterion) {
    let preview = photo(640, 480);
    let still = photo(1920, 1080);
    let small = frame(800, 600, 40);
    let print = frame(1800, 1200, 90);

    c.bench_function("compose_preview_800x600", |b| {
        b.iter(|| compose(black_box(&preview), black_box(&small)))
    });

    let mut group = c.benchmark_group("compose_print");
    group.sample_size(10);
    group.bench_function("1920x1080_into_1800x1200", |b| {
        b.iter(|| compose(black_box(&still), black_box(&print)))
    });
    group.finish();
}

criterion_group!(benches, bench_compose);
criterion_main!(benches);
