use crate::frame::{LightEntry, RenderableImage, chain_iter};
use crate::prepare::{self, LayerContents};
use crate::shader::{ProgramKind, ShaderKeyBuilder};
use crate::stats::{FrameStats, FrameTimer};
use crate::text::{BlockTextRasterizer, TextRasterizer, TextRequest};
use glam::{Mat4, Vec3};
use prism_arena::{ArenaConfig, FrameArena};
use prism_assets::{
    BufferManager, ImporterRegistry, InputStreamFactory, RECTANGLE_PRIMITIVE, RenderMesh,
};
use prism_common::{Size, TextureFormat};
use prism_graph::{
    GraphObjectType, ImageBinding, ImageSlot, LayerBackground, LayerFrameCache, ObjectData,
    ObjectId, PropertyValue, RenderGraph,
};
use prism_resource::{
    Attachment, BindTarget, Device, DrawCall, EnsureOutcome, ResourceConfig, ResourceManager,
    ScopedFrameBuffer, ScopedRenderBuffer, ScopedTexture, TextureKey,
};
use prism_stream::{
    BatchId, ImageLoadListener, ImageLoader, LoadError, LoadStatus, LoaderConfig,
};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

/// Renderer configuration. Every layer of the stack is configured here.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Render layers with effects to an offscreen target and composite.
    pub layer_targets: bool,
    /// Used when the scene does not set its own clear colour.
    pub clear_color: [f32; 4],
    /// Lights considered per model.
    pub max_lights: usize,
    /// Frames kept by the frame timer.
    pub timer_history: usize,
    pub arena: ArenaConfig,
    pub resources: ResourceConfig,
    pub loader: LoaderConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            layer_targets: true,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            max_lights: 8,
            timer_history: 120,
            arena: ArenaConfig::default(),
            resources: ResourceConfig::default(),
            loader: LoaderConfig::default(),
        }
    }
}

/// Offscreen target of a layer that has effects.
#[derive(Debug, Default)]
struct LayerTarget {
    frame_buffer: ScopedFrameBuffer,
    color: ScopedTexture,
    depth: ScopedRenderBuffer,
}

impl LayerTarget {
    fn ensure<D: Device>(&mut self, resources: &mut ResourceManager<D>, size: Size) -> bool {
        if !self.frame_buffer.ensure(resources) {
            return false;
        }
        let color = self.color.ensure(resources, size, TextureFormat::Rgba8);
        let depth = self
            .depth
            .ensure(resources, size, TextureFormat::Depth24Stencil8);
        if color == EnsureOutcome::Failed || depth == EnsureOutcome::Failed {
            return false;
        }
        let (Some(fb), Some(color), Some(depth)) =
            (self.frame_buffer.key(), self.color.key(), self.depth.key())
        else {
            return false;
        };
        resources.attach_texture(fb, Attachment::Color0, Some(color))
            && resources.attach_render_buffer(fb, Attachment::DepthStencil, Some(depth))
    }

    fn release<D: Device>(&mut self, resources: &mut ResourceManager<D>) {
        self.frame_buffer.release(resources);
        self.color.release(resources);
        self.depth.release(resources);
    }
}

/// Collects image paths that finished loading so the images using them can
/// be marked dirty.
#[derive(Clone, Default)]
struct ReloadListener(Rc<RefCell<Vec<String>>>);

impl ImageLoadListener for ReloadListener {
    fn on_image_load_complete(&mut self, path: &str, _status: LoadStatus) {
        self.0.borrow_mut().push(path.to_string());
    }

    fn on_image_batch_complete(&mut self, _batch: BatchId) {}
}

/// Walks the render graph every frame and issues draws through the resource
/// manager.
///
/// Per frame, the renderable image chains, shader keys, light lists and draw
/// list are rebuilt from scratch in the frame arena. Global transforms,
/// image texture matrices and text textures are only recomputed when dirty.
pub struct Renderer<D: Device> {
    config: RendererConfig,
    resources: ResourceManager<D>,
    buffers: BufferManager,
    loader: ImageLoader,
    arena: FrameArena,
    text: Box<dyn TextRasterizer>,
    layer_targets: HashMap<ObjectId, LayerTarget>,
    reloaded: ReloadListener,
    timer: FrameTimer,
    frame: u64,
    frame_start: Option<Instant>,
    stats: FrameStats,
}

impl<D: Device> Renderer<D> {
    pub fn new(
        device: D,
        streams: Arc<dyn InputStreamFactory>,
        importers: ImporterRegistry,
        config: RendererConfig,
    ) -> Result<Self, LoadError> {
        let mut resources = ResourceManager::with_config(device, config.resources.clone());
        let mut buffers = BufferManager::new(streams, importers);
        if !buffers.create_placeholder(&mut resources) {
            tracing::warn!("no placeholder texture; pending images will not draw");
        }
        let loader = ImageLoader::for_buffers(config.loader.clone(), &buffers)?;
        Ok(Self {
            arena: FrameArena::with_config(config.arena.clone()),
            timer: FrameTimer::new(config.timer_history),
            config,
            resources,
            buffers,
            loader,
            text: Box::new(BlockTextRasterizer),
            layer_targets: HashMap::new(),
            reloaded: ReloadListener::default(),
            frame: 0,
            frame_start: None,
            stats: FrameStats::default(),
        })
    }

    pub fn with_text_rasterizer(mut self, rasterizer: Box<dyn TextRasterizer>) -> Self {
        self.text = rasterizer;
        self
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn resources(&self) -> &ResourceManager<D> {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut ResourceManager<D> {
        &mut self.resources
    }

    pub fn buffers(&self) -> &BufferManager {
        &self.buffers
    }

    pub fn buffers_mut(&mut self) -> &mut BufferManager {
        &mut self.buffers
    }

    pub fn loader(&self) -> &ImageLoader {
        &self.loader
    }

    pub fn last_stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn timer(&self) -> &FrameTimer {
        &self.timer
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    // --- image loading ----------------------------------------------------

    /// Queue images for background loading. Callbacks arrive during
    /// [`begin_frame`](Self::begin_frame).
    pub fn load_image_batch(
        &mut self,
        paths: &[&str],
        placeholder: Option<&str>,
        listener: Box<dyn ImageLoadListener>,
    ) -> BatchId {
        self.loader
            .load_image_batch(paths, placeholder, listener, &mut self.buffers)
    }

    pub fn cancel_image_batch_loading(&mut self, batch: BatchId) -> bool {
        self.loader
            .cancel_image_batch_loading(batch, &mut self.buffers)
    }

    pub fn cancel_image_loading(&mut self, path: &str) -> bool {
        self.loader.cancel_image_loading(path, &mut self.buffers)
    }

    /// Block until `batch` has loaded. The only call that waits on I/O.
    pub fn block_until_loaded(&mut self, batch: BatchId) -> bool {
        self.loader
            .block_until_loaded(batch, &mut self.buffers, &mut self.resources)
    }

    /// Block until every outstanding load has finished.
    pub fn block_until_idle(&mut self) {
        self.loader
            .block_until_idle(&mut self.buffers, &mut self.resources);
    }

    // --- frame ------------------------------------------------------------

    /// Start a frame: drain loader completions and mark the images whose
    /// textures changed as dirty.
    pub fn begin_frame(&mut self, graph: &mut RenderGraph) {
        self.frame += 1;
        self.frame_start = Some(Instant::now());
        self.stats = FrameStats {
            frame: self.frame,
            ..FrameStats::default()
        };
        self.resources.begin_frame();
        self.loader.drain(&mut self.buffers, &mut self.resources);

        let reloaded = std::mem::take(&mut *self.reloaded.0.borrow_mut());
        self.stats.images_completed = reloaded.len();
        if reloaded.is_empty() {
            return;
        }
        let paths: HashSet<&str> = reloaded.iter().map(String::as_str).collect();
        let touched: Vec<ObjectId> = graph
            .iter()
            .filter_map(|(id, object)| match &object.data {
                ObjectData::Image(image) if paths.contains(graph.resolve(image.image_path)) => {
                    Some(id)
                }
                _ => None,
            })
            .collect();
        for id in touched {
            graph.edit_image(id, |image| image.binding = None);
        }
    }

    /// Draw the graph into `viewport`.
    pub fn render(&mut self, graph: &mut RenderGraph, viewport: Size) -> &FrameStats {
        let _span = tracing::info_span!("render", frame = self.frame).entered();
        self.stats.transforms_updated = prepare::update_transforms(graph);

        let Some(scene) = graph.scene() else {
            return &self.stats;
        };
        let clear_color = match graph.get(scene).map(|o| &o.data) {
            Some(ObjectData::Scene(s)) if s.use_clear_color => s.clear_color.to_array(),
            _ => self.config.clear_color,
        };
        let layers: Vec<ObjectId> = graph
            .children(scene)
            .filter(|id| graph.object_type(*id) == Some(GraphObjectType::Layer))
            .collect();

        let Self {
            config,
            resources,
            buffers,
            loader,
            arena,
            text,
            layer_targets,
            stats,
            ..
        } = self;

        resources.bind_frame_buffer(None);
        resources.set_viewport(viewport);
        resources.clear(clear_color);

        let mut pass = FramePass {
            config: &*config,
            resources: &mut *resources,
            buffers: &mut *buffers,
            loader: &mut *loader,
            arena: &*arena,
            text: text.as_mut(),
            stats: &mut *stats,
            missing_images: Vec::new(),
            shader_keys: HashSet::new(),
        };
        let mut offscreen = HashSet::new();
        for layer in layers {
            if let Some(target) = pass.layer(graph, layer, viewport, layer_targets) {
                offscreen.insert(target);
            }
        }
        let missing = std::mem::take(&mut pass.missing_images);
        pass.stats.shader_keys = pass.shader_keys.len();

        layer_targets.retain(|layer, target| {
            let keep = offscreen.contains(layer);
            if !keep {
                target.release(resources);
            }
            keep
        });

        if !missing.is_empty() {
            let paths: Vec<&str> = missing.iter().map(|p| &**p).collect();
            self.stats.images_requested = paths.len();
            self.loader.load_image_batch(
                &paths,
                None,
                Box::new(self.reloaded.clone()),
                &mut self.buffers,
            );
        }
        self.stats.arena = self.arena.stats();
        graph.clear_all_dirty();
        &self.stats
    }

    /// Finish a frame: rewind the arena and collect released resources.
    pub fn end_frame(&mut self) -> FrameStats {
        self.arena.reset();
        self.resources.end_frame();
        if let Some(start) = self.frame_start.take() {
            self.stats.frame_time = start.elapsed();
            self.timer.record(self.stats.frame_time);
        }
        tracing::debug!(
            frame = self.frame,
            draws = self.stats.draw_calls,
            slabs = self.stats.arena.slab_count,
            "frame complete"
        );
        self.stats.clone()
    }

    /// `begin_frame`, `render` and `end_frame` in one call.
    pub fn render_frame(&mut self, graph: &mut RenderGraph, viewport: Size) -> FrameStats {
        self.begin_frame(graph);
        self.render(graph, viewport);
        self.end_frame()
    }

    /// Give back every backend resource the graph holds through the renderer:
    /// text textures, effect outputs and layer targets. Call before the graph
    /// is dropped.
    pub fn release_graph(&mut self, graph: &mut RenderGraph) {
        let ids: Vec<ObjectId> = graph.iter().map(|(id, _)| id).collect();
        for id in ids {
            let Some(object) = graph.get_mut(id) else {
                continue;
            };
            match &mut object.data {
                ObjectData::Text(text) => {
                    if let Some(texture) = text.texture.take() {
                        self.resources.release(texture);
                    }
                    text.texture_size = None;
                    text.text_dirty = true;
                }
                ObjectData::Effect(effect) => {
                    if let Some(texture) = effect.context.take().and_then(|c| c.output) {
                        self.resources.release(texture);
                    }
                }
                ObjectData::Image(image) => image.binding = None,
                ObjectData::Layer(layer) => layer.last_frame = None,
                _ => {}
            }
        }
        for (_, mut target) in self.layer_targets.drain() {
            target.release(&mut self.resources);
        }
        self.resources.collect_released();
    }
}

/// State borrowed for the duration of one `render` call. Arena data lives
/// for `'f`.
struct FramePass<'f, D: Device> {
    config: &'f RendererConfig,
    resources: &'f mut ResourceManager<D>,
    buffers: &'f mut BufferManager,
    loader: &'f mut ImageLoader,
    arena: &'f FrameArena,
    text: &'f mut dyn TextRasterizer,
    stats: &'f mut FrameStats,
    missing_images: Vec<Arc<str>>,
    shader_keys: HashSet<u64>,
}

impl<'f, D: Device> FramePass<'f, D> {
    /// Render one layer. Returns the layer id when it used an offscreen
    /// target.
    fn layer(
        &mut self,
        graph: &mut RenderGraph,
        layer: ObjectId,
        viewport: Size,
        targets: &mut HashMap<ObjectId, LayerTarget>,
    ) -> Option<ObjectId> {
        let (active, size, background, clear) = {
            let l = graph.layer(layer)?;
            let size = if l.size.is_empty() { viewport } else { l.size };
            (l.node.global.active, size, l.background, l.clear_color)
        };
        if !active {
            self.recycle_idle_effects(graph, layer, &[]);
            return None;
        }
        self.stats.layers += 1;
        let draws_before = self.stats.draw_calls;

        let effects: Vec<ObjectId> = graph
            .effects(layer)
            .filter(|id| graph.effect(*id).is_some_and(|e| e.active))
            .collect();
        let mut offscreen = None;
        if self.config.layer_targets && !effects.is_empty() {
            let target = targets.entry(layer).or_default();
            if target.ensure(self.resources, size) {
                self.resources.bind_frame_buffer(target.frame_buffer.key());
                offscreen = Some(layer);
                self.stats.offscreen_layers += 1;
            } else {
                tracing::warn!(?layer, "layer target unavailable, drawing direct");
            }
        }
        if offscreen.is_none() {
            self.resources.bind_frame_buffer(None);
        }
        self.resources.set_viewport(size);
        if background == LayerBackground::Color {
            self.resources.clear(clear.to_array());
        } else if offscreen.is_some() {
            self.resources.clear([0.0; 4]);
        }

        let contents = prepare::collect_layer(graph, layer);
        let lights = self.collect_lights(graph, &contents);
        self.stats.lights += lights.len();
        for &model in &contents.models {
            self.model(graph, model, lights);
        }
        for &text in &contents.texts {
            self.text(graph, text);
        }

        let mut applied = Vec::new();
        if let Some(target) = offscreen.and_then(|l| targets.get(&l))
            && let Some(input) = target.color.key()
        {
            let output = self.effects(graph, &effects, target, input, size, &mut applied);
            self.composite(output, viewport);
        }
        self.recycle_idle_effects(graph, layer, &applied);

        if let Some(l) = graph.layer_mut(layer) {
            l.last_frame = Some(LayerFrameCache {
                viewport: size,
                draw_calls: (self.stats.draw_calls - draws_before) as u32,
            });
        }
        offscreen
    }

    fn collect_lights(
        &mut self,
        graph: &RenderGraph,
        contents: &LayerContents,
    ) -> &'f [LightEntry] {
        let entries: Vec<LightEntry> = contents
            .lights
            .iter()
            .filter_map(|&id| {
                let light = graph.light(id)?;
                let world = light.node.global.world;
                Some(LightEntry {
                    light: id,
                    kind: light.kind,
                    position: world.transform_point3(Vec3::ZERO),
                    direction: world.transform_vector3(Vec3::NEG_Z).normalize_or_zero(),
                    color: light.diffuse * (light.brightness / 100.0),
                    cast_shadow: light.cast_shadow,
                    scope: light.scope,
                })
            })
            .collect();
        self.arena.alloc_slice_copy(&entries)
    }

    fn model(&mut self, graph: &mut RenderGraph, model: ObjectId, lights: &'f [LightEntry]) {
        let Some((path, world, opacity)) = graph.model(model).map(|m| {
            (
                graph.strings().get_shared(m.mesh_path),
                m.node.global.world,
                m.node.global.opacity,
            )
        }) else {
            return;
        };
        self.stats.models += 1;
        let Some(mesh) = self.mesh(&path) else {
            return;
        };

        let scoped: Vec<LightEntry> = lights
            .iter()
            .filter(|l| l.scope.is_none_or(|scope| prepare::in_scope(graph, model, scope)))
            .take(self.config.max_lights)
            .copied()
            .collect();
        let scoped: &'f [LightEntry] = self.arena.alloc_slice_copy(&scoped);

        let materials: Vec<ObjectId> = graph.materials(model).collect();
        let mut shaded: Vec<(u64, Option<&'f RenderableImage<'f>>)> = Vec::new();
        for &material in &materials {
            let Some(resolved) = resolve_material(graph, material) else {
                continue;
            };
            let chain = self.image_chain(graph, resolved);
            let key = material_key(graph, resolved, chain, scoped);
            shaded.push((key, chain));
        }
        if shaded.is_empty() {
            shaded.push((ShaderKeyBuilder::new(ProgramKind::DefaultMaterial).finish(), None));
        }

        for (n, subset) in mesh.subsets.iter().enumerate() {
            let (key, chain) = shaded[n.min(shaded.len() - 1)];
            self.bind_chain(chain);
            self.draw_mesh(&mesh, key, subset.first_index, subset.index_count, world, opacity);
        }
    }

    /// The resident mesh for `path`, requesting a background load if needed.
    fn mesh(&mut self, path: &str) -> Option<Rc<RenderMesh>> {
        if path.is_empty() {
            return None;
        }
        if path.starts_with('#') {
            return self.buffers.load_mesh(self.resources, path);
        }
        if let Some(mesh) = self.buffers.mesh(path) {
            return Some(mesh);
        }
        if !self.buffers.is_mesh_failed(path) {
            self.loader.request_mesh(path, self.buffers);
            self.stats.meshes_pending += 1;
        }
        None
    }

    /// Build the active image slots of `material` as an arena-allocated chain
    /// in shader-binding order.
    fn image_chain(
        &mut self,
        graph: &mut RenderGraph,
        material: ObjectId,
    ) -> Option<&'f RenderableImage<'f>> {
        let slots: Vec<(ImageSlot, ObjectId)> = material_images(graph, material);
        let mut head: Option<&'f RenderableImage<'f>> = None;
        for &(slot, image) in slots.iter().rev() {
            let Some(path) = graph
                .image(image)
                .map(|i| graph.strings().get_shared(i.image_path))
            else {
                continue;
            };
            if path.is_empty() {
                continue;
            }
            // Only unknown paths; failed and cancelled ones are not retried.
            if self.buffers.image_status(&path).is_none() && !self.missing_images.contains(&path)
            {
                self.missing_images.push(Arc::clone(&path));
            }
            let Some(resolved) = self.buffers.resolve_image(&path) else {
                continue;
            };
            let Some(data) = graph.image_mut(image) else {
                continue;
            };
            data.binding = Some(ImageBinding {
                texture: resolved.texture,
                placeholder: resolved.placeholder,
            });
            let matrix = data.texture_matrix();
            head = Some(self.arena.alloc(RenderableImage {
                slot,
                image,
                texture: resolved.texture,
                matrix,
                placeholder: resolved.placeholder,
                next: head,
            }));
            self.stats.renderable_images += 1;
        }
        head
    }

    fn bind_chain(&mut self, chain: Option<&RenderableImage<'_>>) {
        let units = self.resources.caps().max_texture_units;
        for (unit, image) in chain_iter(chain).enumerate() {
            if unit as u32 >= units {
                break;
            }
            self.resources.bind_texture(unit as u32, Some(image.texture));
        }
    }

    fn draw_mesh(
        &mut self,
        mesh: &RenderMesh,
        shader_key: u64,
        first: u32,
        count: u32,
        world: Mat4,
        opacity: f32,
    ) {
        let vertex = self.resources.buffer_info(mesh.vertex_key());
        let index = self.resources.buffer_info(mesh.index_key());
        let (Some(vertex), Some(index)) = (vertex, index) else {
            return;
        };
        self.resources
            .bind_buffer(BindTarget::Vertex, Some(mesh.vertex_key()));
        self.resources
            .bind_buffer(BindTarget::Index, Some(mesh.index_key()));
        let call = DrawCall {
            shader_key,
            vertex_buffer: vertex.backend,
            index_buffer: Some(index.backend),
            first,
            count,
            world,
            opacity,
        };
        if self.resources.draw(&call) {
            self.stats.draw_calls += 1;
            self.shader_keys.insert(shader_key);
        }
    }

    fn quad(&mut self) -> Option<Rc<RenderMesh>> {
        self.buffers.load_mesh(self.resources, RECTANGLE_PRIMITIVE)
    }

    fn text(&mut self, graph: &mut RenderGraph, id: ObjectId) {
        let Some((stale, content, font)) = graph.text(id).map(|t| {
            (
                t.text_dirty || t.texture.is_none(),
                graph.strings().get_shared(t.text),
                graph.strings().get_shared(t.font),
            )
        }) else {
            return;
        };
        let Some(text) = graph.text_mut(id) else {
            return;
        };
        if stale {
            let raster = self.text.rasterize(&TextRequest {
                text: &content,
                font: &font,
                font_size: text.font_size,
                align: text.align,
                leading: text.leading,
                tracking: text.tracking,
            });
            text.text_dirty = false;
            match raster {
                Some(raster) => {
                    let outcome =
                        self.resources
                            .ensure_texture(&mut text.texture, raster.size, raster.format);
                    let uploaded = outcome != EnsureOutcome::Failed
                        && text.texture.as_ref().is_some_and(|t| {
                            self.resources.upload_texture(
                                t.key(),
                                raster.size,
                                raster.format,
                                &raster.pixels,
                            )
                        });
                    text.texture_size = uploaded.then_some(raster.size);
                    self.stats.texts_rasterized += 1;
                }
                None => {
                    if let Some(texture) = text.texture.take() {
                        self.resources.release(texture);
                    }
                    text.texture_size = None;
                }
            }
        }

        let (Some(texture), Some(size)) = (text.texture.as_ref().map(|t| t.key()), text.texture_size)
        else {
            return;
        };
        let world = text.node.global.world
            * Mat4::from_scale(Vec3::new(size.width as f32, size.height as f32, 1.0));
        let opacity = text.node.global.opacity;
        let Some(quad) = self.quad() else {
            return;
        };
        self.resources.bind_texture(0, Some(texture));
        let key = ShaderKeyBuilder::new(ProgramKind::Text).finish();
        self.draw_mesh(&quad, key, 0, quad.index_count, world, opacity);
    }

    /// Run the layer's effects in list order, each reading the previous
    /// output. Returns the final texture; `applied` gets the effects that ran.
    fn effects(
        &mut self,
        graph: &mut RenderGraph,
        effects: &[ObjectId],
        target: &LayerTarget,
        mut input: TextureKey,
        size: Size,
        applied: &mut Vec<ObjectId>,
    ) -> TextureKey {
        let Some(fb) = target.frame_buffer.key() else {
            return input;
        };
        let Some(quad) = self.quad() else {
            return input;
        };
        for &id in effects {
            let Some(key) = graph.effect(id).map(|e| {
                ShaderKeyBuilder::new(ProgramKind::Effect)
                    .class(graph.resolve(e.class_name))
                    .payload(&e.payload)
                    .finish()
            }) else {
                continue;
            };
            let Some(output) = self
                .resources
                .acquire_pooled_texture(size, TextureFormat::Rgba8)
            else {
                tracing::warn!(effect = ?id, "no texture for effect output, skipping");
                continue;
            };
            let output_key = output.key();
            self.resources
                .attach_texture(fb, Attachment::Color0, Some(output_key));
            self.resources.bind_texture(0, Some(input));
            self.draw_mesh(&quad, key, 0, quad.index_count, Mat4::IDENTITY, 1.0);

            if let Some(effect) = graph.effect_mut(id) {
                let context = effect.context.get_or_insert_with(Default::default);
                if let Some(previous) = context.output.replace(output) {
                    self.resources.recycle_texture(previous);
                }
                context.frames_rendered += 1;
            }
            self.stats.effects_applied += 1;
            applied.push(id);
            input = output_key;
        }
        if let Some(color) = target.color.key() {
            self.resources
                .attach_texture(fb, Attachment::Color0, Some(color));
        }
        input
    }

    /// Pool the outputs of this layer's effects that did not run this frame.
    fn recycle_idle_effects(
        &mut self,
        graph: &mut RenderGraph,
        layer: ObjectId,
        applied: &[ObjectId],
    ) {
        let idle: Vec<ObjectId> = graph
            .effects(layer)
            .filter(|id| !applied.contains(id))
            .collect();
        for id in idle {
            let output = graph
                .effect_mut(id)
                .and_then(|e| e.context.as_mut())
                .and_then(|c| c.output.take());
            if let Some(output) = output {
                self.resources.recycle_texture(output);
            }
        }
    }

    fn composite(&mut self, texture: TextureKey, viewport: Size) {
        self.resources.bind_frame_buffer(None);
        self.resources.set_viewport(viewport);
        let Some(quad) = self.quad() else {
            return;
        };
        self.resources.bind_texture(0, Some(texture));
        let key = ShaderKeyBuilder::new(ProgramKind::Composite).finish();
        let world = Mat4::from_scale(Vec3::new(2.0, 2.0, 1.0));
        self.draw_mesh(&quad, key, 0, quad.index_count, world, 1.0);
    }
}

/// Follow referenced materials to the material that actually shades.
fn resolve_material(graph: &RenderGraph, material: ObjectId) -> Option<ObjectId> {
    let mut current = material;
    for _ in 0..8 {
        match &graph.get(current)?.data {
            ObjectData::ReferencedMaterial(r) => current = r.referenced?,
            ObjectData::DefaultMaterial(_) | ObjectData::CustomMaterial(_) => {
                return Some(current);
            }
            _ => return None,
        }
    }
    tracing::warn!(?material, "referenced material chain too deep");
    None
}

/// Image slots of a shading material, in binding order.
fn material_images(graph: &RenderGraph, material: ObjectId) -> Vec<(ImageSlot, ObjectId)> {
    let mut slots = Vec::new();
    let lightmaps = match graph.get(material).map(|o| &o.data) {
        Some(ObjectData::DefaultMaterial(m)) => {
            slots.extend(
                m.image_slots()
                    .into_iter()
                    .filter_map(|(slot, image)| image.map(|i| (slot, i))),
            );
            m.lightmaps
        }
        Some(ObjectData::CustomMaterial(m)) => {
            for (n, property) in m.properties.iter().enumerate() {
                if let PropertyValue::Image(Some(image)) = property.value {
                    slots.push((ImageSlot::Custom(n as u16), image));
                }
            }
            m.lightmaps
        }
        _ => None,
    };
    if let Some(l) = lightmaps.and_then(|id| graph.lightmaps(id)) {
        for (slot, image) in [
            (ImageSlot::LightmapIndirect, l.indirect),
            (ImageSlot::LightmapRadiosity, l.radiosity),
            (ImageSlot::LightmapShadow, l.shadow),
        ] {
            if let Some(image) = image {
                slots.push((slot, image));
            }
        }
    }
    slots
}

fn material_key(
    graph: &RenderGraph,
    material: ObjectId,
    chain: Option<&RenderableImage<'_>>,
    lights: &[LightEntry],
) -> u64 {
    match graph.get(material).map(|o| &o.data) {
        Some(ObjectData::DefaultMaterial(m)) => ShaderKeyBuilder::new(ProgramKind::DefaultMaterial)
            .default_material(m)
            .images(chain)
            .lights(lights)
            .finish(),
        Some(ObjectData::CustomMaterial(m)) => ShaderKeyBuilder::new(ProgramKind::CustomMaterial)
            .class(graph.resolve(m.class_name))
            .transparent(m.has_transparency)
            .images(chain)
            .lights(lights)
            .finish(),
        _ => ShaderKeyBuilder::new(ProgramKind::DefaultMaterial).finish(),
    }
}
