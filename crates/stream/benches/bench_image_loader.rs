use std::hint::black_box;
use std::sync::Arc;
use std::time::Instant;

use prism_assets::{BufferManager, ImporterRegistry, MemoryStreamFactory};
use prism_resource::{HeadlessDevice, ResourceManager};
use prism_stream::{BatchId, ImageLoadListener, ImageLoader, LoadStatus, LoaderConfig};

struct Count(usize);

impl ImageLoadListener for Count {
    fn on_image_load_complete(&mut self, _path: &str, _status: LoadStatus) {
        self.0 += 1;
    }

    fn on_image_batch_complete(&mut self, _batch: BatchId) {}
}

fn png(side: u32, shade: u8) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(side, side, image::Rgba([shade, shade, shade, 255]));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .expect("encode fixture");
    out.into_inner()
}

fn bench_batch(images: usize, side: u32, workers: usize) {
    let streams = Arc::new(MemoryStreamFactory::new());
    let paths: Vec<String> = (0..images).map(|i| format!("img/{i}.png")).collect();
    for (i, path) in paths.iter().enumerate() {
        streams.insert(path.clone(), png(side, i as u8));
    }
    let path_refs: Vec<&str> = paths.iter().map(String::as_str).collect();

    let mut resources = ResourceManager::new(HeadlessDevice::new());
    let mut buffers = BufferManager::new(streams, ImporterRegistry::with_native());
    buffers.create_placeholder(&mut resources);
    let config = LoaderConfig {
        workers,
        ..LoaderConfig::default()
    };
    let mut loader = ImageLoader::for_buffers(config, &buffers).expect("spawn workers");

    let start = Instant::now();
    let batch = loader.load_image_batch(&path_refs, None, Box::new(Count(0)), &mut buffers);
    loader.block_until_loaded(black_box(batch), &mut buffers, &mut resources);
    let elapsed = start.elapsed();
    println!(
        "  batch ({images} images, {side}x{side}, {workers} workers): {elapsed:?} total, {:?}/image",
        elapsed / images as u32
    );
}

fn main() {
    println!("=== Image Loader Benchmarks ===\n");

    println!("Small images:");
    bench_batch(64, 16, 1);
    bench_batch(64, 16, 4);

    println!("\nLarger images:");
    bench_batch(16, 512, 1);
    bench_batch(16, 512, 4);

    println!("\n=== Done ===");
}
