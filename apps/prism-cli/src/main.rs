use anyhow::Context;
use clap::{Parser, Subcommand};
use glam::{Vec3, Vec4};
use prism_assets::{CUBE_PRIMITIVE, FsStreamFactory, ImporterRegistry};
use prism_common::{Size, StringTable};
use prism_graph::{
    ClassDef, ClassKind, ClassRegistry, ImageSlot, LayerBackground, LightKind, ObjectData,
    PropertyDefault, RenderGraph,
};
use prism_persist::{PresentationStore, structure_digest};
use prism_render::{GraphDump, Renderer, RendererConfig};
use prism_resource::HeadlessDevice;
use prism_stream::{BatchId, ImageLoadListener, LoadStatus};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "prism-cli", about = "CLI tool for prism render graph operations")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Render the demo presentation on a headless device
    Demo {
        /// Number of frames to render
        #[arg(short, long, default_value = "3")]
        frames: u64,
        /// Directory images and meshes are read from
        #[arg(short, long)]
        assets: Option<PathBuf>,
        /// Viewport width and height
        #[arg(long, default_value = "1280")]
        width: u32,
        #[arg(long, default_value = "720")]
        height: u32,
    },
    /// Save the demo presentation as a new revision in a store
    Save {
        /// Store directory, created if missing
        dir: PathBuf,
    },
    /// Verify a store and print the graph of one revision
    Inspect {
        dir: PathBuf,
        /// Revision to load; the newest when omitted
        #[arg(short, long)]
        revision: Option<u32>,
    },
    /// Load images through the background loader and report each result
    LoadImages {
        /// Image paths, relative to --assets when given
        #[arg(required = true)]
        paths: Vec<String>,
        #[arg(short, long)]
        assets: Option<PathBuf>,
        /// Worker threads
        #[arg(short, long, default_value = "2")]
        workers: usize,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("prism-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", prism_common::crate_info());
            println!("arena: {}", prism_arena::crate_info());
            println!("resource: {}", prism_resource::crate_info());
            println!("graph: {}", prism_graph::crate_info());
            println!("persist: {}", prism_persist::crate_info());
            println!("assets: {}", prism_assets::crate_info());
            println!("stream: {}", prism_stream::crate_info());
            println!("render: {}", prism_render::crate_info());
        }
        Commands::Demo {
            frames,
            assets,
            width,
            height,
        } => {
            let mut graph = demo_graph();
            let mut renderer = renderer(assets, RendererConfig::default())?;
            let viewport = Size::new(width, height);
            for _ in 0..frames {
                let stats = renderer.render_frame(&mut graph, viewport);
                println!(
                    "frame {}: layers={} models={} draws={} shaders={} images={} texts={} effects={} transforms={} slabs={}",
                    stats.frame,
                    stats.layers,
                    stats.models,
                    stats.draw_calls,
                    stats.shader_keys,
                    stats.renderable_images,
                    stats.texts_rasterized,
                    stats.effects_applied,
                    stats.transforms_updated,
                    stats.arena.slab_count,
                );
                renderer.block_until_idle();
            }
            let timer = renderer.timer();
            println!(
                "frame time: avg={:?} min={:?} max={:?}",
                timer.average(),
                timer.min(),
                timer.max()
            );
            print!("{}", GraphDump::new().with_globals().render(&graph));
            renderer.release_graph(&mut graph);
            let live = renderer.resources().live_counts();
            println!("live resources after release: {live:?}");
        }
        Commands::Save { dir } => {
            let graph = demo_graph();
            let mut store = PresentationStore::open(&dir)
                .with_context(|| format!("opening store {}", dir.display()))?;
            let revision = store.save_graph(&graph)?;
            println!(
                "saved revision {revision}: objects={} digest={:#018x}",
                graph.len(),
                structure_digest(&graph)
            );
        }
        Commands::Inspect { dir, revision } => {
            let store = PresentationStore::open(&dir)
                .with_context(|| format!("opening store {}", dir.display()))?;
            store.verify_integrity().context("integrity check failed")?;
            let meta = store.meta();
            println!(
                "store: schema={} format={} revisions={}",
                meta.store_schema_version, meta.graph_format_version, meta.revision_count
            );
            let graph = match revision {
                Some(revision) => {
                    store.load_revision(revision, StringTable::new(), demo_classes())?
                }
                None => store.load_latest(StringTable::new(), demo_classes())?,
            };
            println!("digest: {:#018x}", structure_digest(&graph));
            print!("{}", GraphDump::new().render(&graph));
        }
        Commands::LoadImages {
            paths,
            assets,
            workers,
        } => {
            let mut config = RendererConfig::default();
            config.loader.workers = workers.max(1);
            let mut renderer = renderer(assets, config)?;
            let paths: Vec<&str> = paths.iter().map(String::as_str).collect();
            let batch = renderer.load_image_batch(&paths, None, Box::new(PrintListener));
            if !renderer.block_until_loaded(batch) {
                anyhow::bail!("batch {} did not complete", batch.0);
            }
            let stats = renderer.loader().stats();
            println!(
                "loaded={} failed={} submitted={}",
                stats.images_loaded, stats.images_failed, stats.jobs_submitted
            );
        }
    }

    Ok(())
}

fn renderer(
    assets: Option<PathBuf>,
    config: RendererConfig,
) -> anyhow::Result<Renderer<HeadlessDevice>> {
    let mut streams = FsStreamFactory::new();
    if let Some(dir) = assets {
        streams = streams.with_search_path(dir);
    }
    let renderer = Renderer::new(
        HeadlessDevice::new(),
        Arc::new(streams),
        ImporterRegistry::with_native(),
        config,
    )?;
    Ok(renderer)
}

struct PrintListener;

impl ImageLoadListener for PrintListener {
    fn on_image_load_complete(&mut self, path: &str, status: LoadStatus) {
        println!("  {path}: {status:?}");
    }

    fn on_image_batch_complete(&mut self, batch: BatchId) {
        println!("batch {} complete", batch.0);
    }
}

/// Classes the demo presentation instantiates.
fn demo_classes() -> ClassRegistry {
    let mut classes = ClassRegistry::new();
    classes.register(
        ClassDef::new("Vignette", ClassKind::Effect)
            .with_property("strength", PropertyDefault::Float(0.4))
            .with_payload(b"vignette".to_vec()),
    );
    classes.register(
        ClassDef::new("Brushed", ClassKind::CustomMaterial)
            .with_property("roughness", PropertyDefault::Float(0.6))
            .with_property("grain", PropertyDefault::Image),
    );
    classes
}

/// Two layers: a lit 3D layer with a vignette, and a 2D caption layer.
fn demo_graph() -> RenderGraph {
    let mut graph = RenderGraph::with_context(StringTable::new(), demo_classes());
    let scene = graph.create_scene();

    let stage = graph.create_layer();
    graph.add_child(scene, stage);
    if let Some(effect) = graph.create_effect("Vignette") {
        graph.add_effect(stage, effect);
    }

    let sun = graph.create_light(LightKind::Directional);
    graph.set_rotation(sun, Vec3::new(-0.6, 0.3, 0.0));
    graph.add_child(stage, sun);

    let group = graph.create_node();
    graph.add_child(stage, group);
    for i in 0..3 {
        let cube = graph.create_model(CUBE_PRIMITIVE);
        graph.set_position(cube, Vec3::new(i as f32 * 150.0 - 150.0, 0.0, -600.0));
        graph.set_scale(cube, Vec3::splat(80.0));
        graph.add_child(group, cube);

        let material = graph.create_default_material();
        let diffuse = graph.create_image("textures/crate.png");
        graph.set_material_image(material, ImageSlot::Diffuse, Some(diffuse));
        graph.add_material(cube, material);
    }

    if let Some(brushed) = graph.create_custom_material("Brushed") {
        let plate = graph.create_model(CUBE_PRIMITIVE);
        graph.set_position(plate, Vec3::new(0.0, -120.0, -600.0));
        graph.set_scale(plate, Vec3::new(500.0, 10.0, 200.0));
        graph.add_child(stage, plate);
        graph.add_material(plate, brushed);
    }

    let caption = graph.create_layer();
    graph.add_child(scene, caption);
    graph.edit(caption, |data| {
        if let ObjectData::Layer(layer) = data {
            layer.background = LayerBackground::Transparent;
            layer.clear_color = Vec4::ZERO;
        }
    });
    let title = graph.create_text("prism");
    graph.set_position(title, Vec3::new(0.0, 300.0, 0.0));
    graph.add_child(caption, title);

    graph
}
