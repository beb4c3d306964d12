use crossbeam::channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use prism_assets::{
    AssetError, BufferManager, DecodedImage, ImporterRegistry, InputStreamFactory, MeshData,
    decode_image,
};
use prism_resource::{Device, ResourceManager};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Outcome of one image load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct JobId(u64);

/// Receives completions on the render thread, from `ImageLoader::drain`.
pub trait ImageLoadListener {
    fn on_image_load_complete(&mut self, path: &str, status: LoadStatus);

    fn on_image_batch_complete(&mut self, batch: BatchId);
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to spawn loader worker: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub workers: usize,
    pub thread_name_prefix: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .clamp(1, 4);
        Self {
            workers,
            thread_name_prefix: "prism-loader".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderStats {
    pub jobs_submitted: u64,
    pub images_loaded: u64,
    pub images_failed: u64,
    pub meshes_loaded: u64,
    pub meshes_failed: u64,
    pub jobs_cancelled: u64,
    pub batches_completed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobKind {
    Image,
    Mesh,
}

struct Job {
    id: JobId,
    path: Arc<str>,
    kind: JobKind,
}

enum JobOutput {
    Image(Result<DecodedImage, AssetError>),
    Mesh(Result<MeshData, AssetError>),
}

struct Completion {
    id: JobId,
    path: Arc<str>,
    output: JobOutput,
}

/// State shared with the workers. Everything here is touched under one lock.
#[derive(Default)]
struct QueueState {
    /// Submitted and not yet finished or skipped.
    pending: HashSet<JobId>,
    running: HashSet<JobId>,
    cancelled: HashSet<JobId>,
    completed: Vec<Completion>,
}

#[derive(Default)]
struct SharedQueue {
    state: Mutex<QueueState>,
    changed: Condvar,
}

struct PathJob {
    id: JobId,
    /// Batches waiting on this path, in submission order.
    waiters: Vec<BatchId>,
}

struct Batch {
    paths: Vec<Arc<str>>,
    remaining: usize,
    /// Paths that were already resident when the batch was submitted.
    ready: Vec<Arc<str>>,
    listener: Box<dyn ImageLoadListener>,
}

/// Loads and decodes images and meshes on worker threads.
///
/// Workers only read bytes and decode. Uploads and listener callbacks happen
/// on the render thread inside [`ImageLoader::drain`], so no worker ever
/// touches the device or the graph. One job runs per path at a time; later
/// requests for the same path join it, which keeps per-path completions in
/// submission order.
pub struct ImageLoader {
    queue: Arc<SharedQueue>,
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    next_job: u64,
    next_batch: u64,
    images: HashMap<Arc<str>, PathJob>,
    meshes: HashMap<Arc<str>, JobId>,
    batches: HashMap<BatchId, Batch>,
    stats: LoaderStats,
}

impl ImageLoader {
    pub fn new(
        config: LoaderConfig,
        streams: Arc<dyn InputStreamFactory>,
        importers: Arc<ImporterRegistry>,
    ) -> Result<Self, LoadError> {
        let (sender, receiver) = crossbeam::channel::unbounded::<Job>();
        let queue = Arc::new(SharedQueue::default());
        let mut workers = Vec::with_capacity(config.workers.max(1));
        for n in 0..config.workers.max(1) {
            let worker = Worker {
                queue: Arc::clone(&queue),
                jobs: receiver.clone(),
                streams: Arc::clone(&streams),
                importers: Arc::clone(&importers),
            };
            let handle = std::thread::Builder::new()
                .name(format!("{}-{n}", config.thread_name_prefix))
                .spawn(move || worker.run())?;
            workers.push(handle);
        }
        tracing::debug!(workers = workers.len(), "image loader started");
        Ok(Self {
            queue,
            sender: Some(sender),
            workers,
            next_job: 0,
            next_batch: 0,
            images: HashMap::new(),
            meshes: HashMap::new(),
            batches: HashMap::new(),
            stats: LoaderStats::default(),
        })
    }

    /// A loader reading through the buffer manager's streams and importers.
    pub fn for_buffers(config: LoaderConfig, buffers: &BufferManager) -> Result<Self, LoadError> {
        Self::new(config, buffers.streams(), buffers.importers())
    }

    pub fn stats(&self) -> LoaderStats {
        self.stats
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Jobs submitted whose results have not been drained yet.
    pub fn in_flight(&self) -> usize {
        self.images.len() + self.meshes.len()
    }

    pub fn active_batches(&self) -> usize {
        self.batches.len()
    }

    /// Queue every path for loading and return at once. Until a path
    /// completes, lookups through `buffers` resolve to `placeholder` if it is
    /// loaded, or to the default placeholder.
    pub fn load_image_batch(
        &mut self,
        paths: &[&str],
        placeholder: Option<&str>,
        listener: Box<dyn ImageLoadListener>,
        buffers: &mut BufferManager,
    ) -> BatchId {
        self.next_batch += 1;
        let batch = BatchId(self.next_batch);
        let mut ready = Vec::new();
        let mut batch_paths = Vec::with_capacity(paths.len());
        for &path in paths {
            let path: Arc<str> = Arc::from(path);
            batch_paths.push(Arc::clone(&path));
            if buffers.image_status(&path) == Some(prism_assets::ImageStatus::Loaded)
                && !self.images.contains_key(&path)
            {
                ready.push(path);
                continue;
            }
            buffers.mark_pending(&path, placeholder);
            if let Some(job) = self.images.get_mut(&path) {
                job.waiters.push(batch);
                continue;
            }
            let id = self.submit(Arc::clone(&path), JobKind::Image);
            self.images.insert(
                path,
                PathJob {
                    id,
                    waiters: vec![batch],
                },
            );
        }
        tracing::debug!(
            batch = batch.0,
            paths = paths.len(),
            ready = ready.len(),
            "image batch submitted"
        );
        self.batches.insert(
            batch,
            Batch {
                paths: batch_paths,
                remaining: paths.len(),
                ready,
                listener,
            },
        );
        batch
    }

    /// Queue a mesh load. Returns `false` when the mesh is resident, already
    /// requested, known to fail, or a built-in primitive.
    pub fn request_mesh(&mut self, path: &str, buffers: &mut BufferManager) -> bool {
        if path.starts_with('#') || !buffers.mark_mesh_pending(path) {
            return false;
        }
        let path: Arc<str> = Arc::from(path);
        let id = self.submit(Arc::clone(&path), JobKind::Mesh);
        self.meshes.insert(path, id);
        true
    }

    /// Deliver finished work: upload results, update the caches and call the
    /// listeners. Returns the number of item callbacks made.
    pub fn drain<D: Device>(
        &mut self,
        buffers: &mut BufferManager,
        resources: &mut ResourceManager<D>,
    ) -> usize {
        let completed = std::mem::take(&mut self.queue.state.lock().completed);
        let mut delivered = 0;
        for completion in completed {
            match completion.output {
                JobOutput::Image(result) => {
                    let Some(job) = self.images.remove(&completion.path) else {
                        continue;
                    };
                    if job.id != completion.id {
                        self.images.insert(Arc::clone(&completion.path), job);
                        continue;
                    }
                    let status = match result {
                        Ok(image) if buffers.upload_image(resources, &completion.path, &image) => {
                            self.stats.images_loaded += 1;
                            LoadStatus::Succeeded
                        }
                        Ok(_) => {
                            self.stats.images_failed += 1;
                            LoadStatus::Failed
                        }
                        Err(e) => {
                            tracing::warn!(path = %completion.path, error = %e, "image load failed");
                            buffers.mark_failed(&completion.path);
                            self.stats.images_failed += 1;
                            LoadStatus::Failed
                        }
                    };
                    for batch in job.waiters {
                        delivered += self.deliver(batch, &completion.path, status);
                    }
                }
                JobOutput::Mesh(result) => {
                    if self.meshes.get(&completion.path) != Some(&completion.id) {
                        continue;
                    }
                    self.meshes.remove(&completion.path);
                    match result {
                        Ok(data) => {
                            if buffers
                                .insert_mesh(resources, &completion.path, &data)
                                .is_some()
                            {
                                self.stats.meshes_loaded += 1;
                            } else {
                                self.stats.meshes_failed += 1;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(path = %completion.path, error = %e, "mesh load failed");
                            buffers.mark_mesh_failed(&completion.path);
                            self.stats.meshes_failed += 1;
                        }
                    }
                }
            }
        }

        let mut ids: Vec<BatchId> = self.batches.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            let ready = self
                .batches
                .get_mut(&id)
                .map(|b| std::mem::take(&mut b.ready))
                .unwrap_or_default();
            for path in ready {
                delivered += self.deliver(id, &path, LoadStatus::Succeeded);
            }
            if self.batches.get(&id).is_some_and(|b| b.remaining == 0) {
                self.complete_batch(id);
            }
        }
        delivered
    }

    /// Stop a batch. No callback for it fires after this returns. Jobs no
    /// other batch waits on are cancelled.
    pub fn cancel_image_batch_loading(
        &mut self,
        batch: BatchId,
        buffers: &mut BufferManager,
    ) -> bool {
        let Some(cancelled) = self.batches.remove(&batch) else {
            return false;
        };
        for path in &cancelled.paths {
            let orphaned = match self.images.get_mut(path) {
                Some(job) => {
                    job.waiters.retain(|b| *b != batch);
                    job.waiters.is_empty()
                }
                None => false,
            };
            if orphaned && let Some(job) = self.images.remove(path) {
                self.cancel_job(job.id);
                buffers.cancel_pending(path);
            }
        }
        tracing::debug!(batch = batch.0, "image batch cancelled");
        true
    }

    /// Stop loading one path. No completion for it fires after this returns;
    /// the batches that asked for it count it as resolved.
    pub fn cancel_image_loading(&mut self, path: &str, buffers: &mut BufferManager) -> bool {
        let mut found = false;
        if let Some(job) = self.images.remove(path) {
            self.cancel_job(job.id);
            buffers.cancel_pending(path);
            for batch in job.waiters {
                if let Some(b) = self.batches.get_mut(&batch) {
                    b.remaining = b.remaining.saturating_sub(1);
                }
            }
            found = true;
        }
        for b in self.batches.values_mut() {
            let before = b.ready.len();
            b.ready.retain(|p| &**p != path);
            let dropped = before - b.ready.len();
            b.remaining = b.remaining.saturating_sub(dropped);
            found |= dropped > 0;
        }
        found
    }

    /// Wait for every job of `batch` to finish, then drain. The only call that
    /// blocks the render thread on I/O.
    pub fn block_until_loaded<D: Device>(
        &mut self,
        batch: BatchId,
        buffers: &mut BufferManager,
        resources: &mut ResourceManager<D>,
    ) -> bool {
        let Some(b) = self.batches.get(&batch) else {
            return false;
        };
        let jobs: Vec<JobId> = b
            .paths
            .iter()
            .filter_map(|p| self.images.get(p).map(|job| job.id))
            .collect();
        {
            let mut state = self.queue.state.lock();
            while jobs.iter().any(|id| state.pending.contains(id)) {
                self.queue.changed.wait(&mut state);
            }
        }
        self.drain(buffers, resources);
        true
    }

    /// Wait for every submitted job to finish, then drain.
    pub fn block_until_idle<D: Device>(
        &mut self,
        buffers: &mut BufferManager,
        resources: &mut ResourceManager<D>,
    ) {
        {
            let mut state = self.queue.state.lock();
            while !state.pending.is_empty() {
                self.queue.changed.wait(&mut state);
            }
        }
        self.drain(buffers, resources);
    }

    fn submit(&mut self, path: Arc<str>, kind: JobKind) -> JobId {
        self.next_job += 1;
        let id = JobId(self.next_job);
        self.queue.state.lock().pending.insert(id);
        self.stats.jobs_submitted += 1;
        let sent = self
            .sender
            .as_ref()
            .is_some_and(|s| s.send(Job { id, path, kind }).is_ok());
        if !sent {
            tracing::error!("loader workers are gone; job dropped");
            self.queue.state.lock().pending.remove(&id);
        }
        id
    }

    /// Drop a job's result whether it is queued, running or finished. Blocks
    /// while it runs.
    fn cancel_job(&mut self, id: JobId) {
        let mut state = self.queue.state.lock();
        state.completed.retain(|c| c.id != id);
        if state.pending.contains(&id) {
            state.cancelled.insert(id);
        }
        while state.running.contains(&id) {
            self.queue.changed.wait(&mut state);
        }
        self.stats.jobs_cancelled += 1;
    }

    fn deliver(&mut self, batch: BatchId, path: &str, status: LoadStatus) -> usize {
        let Some(b) = self.batches.get_mut(&batch) else {
            return 0;
        };
        b.remaining = b.remaining.saturating_sub(1);
        b.listener.on_image_load_complete(path, status);
        if b.remaining == 0 && b.ready.is_empty() {
            self.complete_batch(batch);
        }
        1
    }

    fn complete_batch(&mut self, batch: BatchId) {
        if let Some(mut b) = self.batches.remove(&batch) {
            b.listener.on_image_batch_complete(batch);
            self.stats.batches_completed += 1;
            tracing::debug!(batch = batch.0, "image batch complete");
        }
    }
}

impl Drop for ImageLoader {
    fn drop(&mut self) {
        {
            let mut state = self.queue.state.lock();
            let pending: Vec<JobId> = state.pending.iter().copied().collect();
            state.cancelled.extend(pending);
        }
        self.sender = None;
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("loader worker panicked");
            }
        }
    }
}

struct Worker {
    queue: Arc<SharedQueue>,
    jobs: Receiver<Job>,
    streams: Arc<dyn InputStreamFactory>,
    importers: Arc<ImporterRegistry>,
}

impl Worker {
    fn run(self) {
        while let Ok(job) = self.jobs.recv() {
            {
                let mut state = self.queue.state.lock();
                if state.cancelled.remove(&job.id) {
                    state.pending.remove(&job.id);
                    self.queue.changed.notify_all();
                    continue;
                }
                state.running.insert(job.id);
            }

            let output = match job.kind {
                JobKind::Image => JobOutput::Image(
                    self.streams
                        .read_all(&job.path)
                        .and_then(|bytes| decode_image(&bytes)),
                ),
                JobKind::Mesh => JobOutput::Mesh(
                    self.streams
                        .read_all(&job.path)
                        .and_then(|bytes| self.importers.import(&job.path, &bytes)),
                ),
            };

            let mut state = self.queue.state.lock();
            state.running.remove(&job.id);
            state.pending.remove(&job.id);
            if !state.cancelled.remove(&job.id) {
                state.completed.push(Completion {
                    id: job.id,
                    path: job.path,
                    output,
                });
            }
            self.queue.changed.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_assets::{ImageStatus, MemoryStreamFactory};
    use prism_resource::HeadlessDevice;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Item(String, LoadStatus),
        Batch(BatchId),
    }

    #[derive(Clone, Default)]
    struct Recorder(Rc<RefCell<Vec<Event>>>);

    impl Recorder {
        fn events(&self) -> Vec<Event> {
            self.0.borrow().clone()
        }
    }

    impl ImageLoadListener for Recorder {
        fn on_image_load_complete(&mut self, path: &str, status: LoadStatus) {
            self.0.borrow_mut().push(Event::Item(path.to_string(), status));
        }

        fn on_image_batch_complete(&mut self, batch: BatchId) {
            self.0.borrow_mut().push(Event::Batch(batch));
        }
    }

    /// Streams that block every open until the gate is released.
    #[derive(Default)]
    struct GatedStreams {
        inner: MemoryStreamFactory,
        open: Mutex<bool>,
        opened: Condvar,
    }

    impl GatedStreams {
        fn release(&self) {
            *self.open.lock() = true;
            self.opened.notify_all();
        }
    }

    impl InputStreamFactory for GatedStreams {
        fn open(&self, path: &str) -> Result<Box<dyn std::io::Read + Send>, AssetError> {
            let mut open = self.open.lock();
            while !*open {
                self.opened.wait(&mut open);
            }
            drop(open);
            self.inner.open(path)
        }

        fn exists(&self, path: &str) -> bool {
            self.inner.exists(path)
        }
    }

    fn png(rgba: [u8; 4]) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba(rgba));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    struct Fixture {
        loader: ImageLoader,
        buffers: BufferManager,
        resources: ResourceManager<HeadlessDevice>,
    }

    fn fixture(streams: Arc<dyn InputStreamFactory>, workers: usize) -> Fixture {
        let mut resources = ResourceManager::new(HeadlessDevice::new());
        let mut buffers = BufferManager::new(streams, ImporterRegistry::with_native());
        buffers.create_placeholder(&mut resources);
        let config = LoaderConfig {
            workers,
            ..LoaderConfig::default()
        };
        let loader = ImageLoader::for_buffers(config, &buffers).unwrap();
        Fixture {
            loader,
            buffers,
            resources,
        }
    }

    fn five_paths() -> Arc<MemoryStreamFactory> {
        let streams = Arc::new(MemoryStreamFactory::new());
        for n in [1, 2, 4, 5] {
            streams.insert(format!("img/{n}.png"), png([n, 0, 0, 255]));
        }
        streams.insert("img/3.png", b"not an image".to_vec());
        streams
    }

    const FIVE: [&str; 5] = [
        "img/1.png",
        "img/2.png",
        "img/3.png",
        "img/4.png",
        "img/5.png",
    ];

    #[test]
    fn batch_with_one_failure_reports_every_item_then_the_batch() {
        let mut f = fixture(five_paths(), 2);
        let recorder = Recorder::default();
        let batch = f
            .loader
            .load_image_batch(&FIVE, None, Box::new(recorder.clone()), &mut f.buffers);

        assert!(f.buffers.resolve_image("img/3.png").unwrap().placeholder);
        assert!(f.loader.block_until_loaded(batch, &mut f.buffers, &mut f.resources));

        let events = recorder.events();
        assert_eq!(events.len(), 6);
        assert_eq!(events.last(), Some(&Event::Batch(batch)));
        let items: Vec<_> = events[..5]
            .iter()
            .map(|e| match e {
                Event::Item(path, status) => (path.clone(), *status),
                Event::Batch(_) => panic!("batch completed early"),
            })
            .collect();
        assert_eq!(
            items.iter().filter(|(_, s)| *s == LoadStatus::Succeeded).count(),
            4
        );
        assert!(items.contains(&("img/3.png".to_string(), LoadStatus::Failed)));

        let failed = f.buffers.resolve_image("img/3.png").unwrap();
        assert!(failed.placeholder);
        assert_eq!(Some(failed.texture), f.buffers.placeholder());
        assert!(!f.buffers.resolve_image("img/1.png").unwrap().placeholder);
        assert_eq!(f.loader.stats().images_failed, 1);
        assert_eq!(f.loader.stats().batches_completed, 1);
        assert_eq!(f.loader.in_flight(), 0);
    }

    #[test]
    fn nothing_is_delivered_outside_drain() {
        let streams = five_paths();
        let mut f = fixture(streams, 1);
        let recorder = Recorder::default();
        f.loader
            .load_image_batch(&["img/1.png"], None, Box::new(recorder.clone()), &mut f.buffers);
        std::thread::sleep(Duration::from_millis(50));
        assert!(recorder.events().is_empty());
        f.loader.block_until_idle(&mut f.buffers, &mut f.resources);
        assert_eq!(recorder.events().len(), 2);
    }

    #[test]
    fn empty_batch_completes_on_next_drain() {
        let mut f = fixture(five_paths(), 1);
        let recorder = Recorder::default();
        let batch = f
            .loader
            .load_image_batch(&[], None, Box::new(recorder.clone()), &mut f.buffers);
        assert!(recorder.events().is_empty());
        f.loader.drain(&mut f.buffers, &mut f.resources);
        assert_eq!(recorder.events(), vec![Event::Batch(batch)]);
    }

    #[test]
    fn repeated_path_in_one_batch_decodes_once() {
        let mut f = fixture(five_paths(), 2);
        let recorder = Recorder::default();
        let batch = f.loader.load_image_batch(
            &["img/1.png", "img/1.png"],
            None,
            Box::new(recorder.clone()),
            &mut f.buffers,
        );
        assert_eq!(f.loader.stats().jobs_submitted, 1);
        assert!(f.loader.block_until_loaded(batch, &mut f.buffers, &mut f.resources));

        let item = Event::Item("img/1.png".into(), LoadStatus::Succeeded);
        assert_eq!(
            recorder.events(),
            vec![item.clone(), item, Event::Batch(batch)]
        );
        assert_eq!(f.loader.stats().images_loaded, 1);
        assert_eq!(f.loader.stats().batches_completed, 1);
        f.loader.drain(&mut f.buffers, &mut f.resources);
        assert_eq!(recorder.events().len(), 3);
    }

    #[test]
    fn resident_images_complete_without_a_job() {
        let mut f = fixture(five_paths(), 1);
        f.buffers.load_image_sync(&mut f.resources, "img/1.png");
        let recorder = Recorder::default();
        let batch = f.loader.load_image_batch(
            &["img/1.png"],
            None,
            Box::new(recorder.clone()),
            &mut f.buffers,
        );
        assert_eq!(f.loader.stats().jobs_submitted, 0);
        f.loader.drain(&mut f.buffers, &mut f.resources);
        assert_eq!(
            recorder.events(),
            vec![
                Event::Item("img/1.png".into(), LoadStatus::Succeeded),
                Event::Batch(batch)
            ]
        );
    }

    #[test]
    fn shared_path_completes_in_submission_order() {
        let mut f = fixture(five_paths(), 2);
        let log = Rc::new(RefCell::new(Vec::new()));
        let first = f.loader.load_image_batch(
            &["img/2.png"],
            None,
            Box::new(Recorder(log.clone())),
            &mut f.buffers,
        );
        let second = f.loader.load_image_batch(
            &["img/2.png"],
            None,
            Box::new(Recorder(log.clone())),
            &mut f.buffers,
        );
        f.loader.block_until_loaded(second, &mut f.buffers, &mut f.resources);
        assert_eq!(f.loader.stats().jobs_submitted, 1);
        let item = Event::Item("img/2.png".into(), LoadStatus::Succeeded);
        assert_eq!(
            *log.borrow(),
            vec![
                item.clone(),
                Event::Batch(first),
                item,
                Event::Batch(second)
            ]
        );
    }

    #[test]
    fn cancelled_path_never_reports() {
        let streams = Arc::new(GatedStreams::default());
        streams.inner.insert("img/slow.png", png([9, 9, 9, 255]));
        streams.inner.insert("img/fast.png", png([1, 1, 1, 255]));
        let mut f = fixture(streams.clone(), 1);
        let recorder = Recorder::default();
        let batch = f.loader.load_image_batch(
            &["img/slow.png", "img/fast.png"],
            None,
            Box::new(recorder.clone()),
            &mut f.buffers,
        );

        let gate = streams.clone();
        let opener = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            gate.release();
        });
        assert!(f.loader.cancel_image_loading("img/slow.png", &mut f.buffers));
        opener.join().unwrap();

        f.loader.block_until_loaded(batch, &mut f.buffers, &mut f.resources);
        f.loader.drain(&mut f.buffers, &mut f.resources);
        let events = recorder.events();
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, Event::Item(p, _) if p == "img/slow.png"))
        );
        assert_eq!(
            events,
            vec![
                Event::Item("img/fast.png".into(), LoadStatus::Succeeded),
                Event::Batch(batch)
            ]
        );
        assert_eq!(
            f.buffers.image_status("img/slow.png"),
            Some(ImageStatus::Cancelled)
        );
    }

    #[test]
    fn cancelled_batch_gets_no_callbacks() {
        let streams = Arc::new(GatedStreams::default());
        streams.inner.insert("img/a.png", png([5, 5, 5, 255]));
        let mut f = fixture(streams.clone(), 1);
        let recorder = Recorder::default();
        let batch = f.loader.load_image_batch(
            &["img/a.png"],
            None,
            Box::new(recorder.clone()),
            &mut f.buffers,
        );
        let gate = streams.clone();
        let opener = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            gate.release();
        });
        assert!(f.loader.cancel_image_batch_loading(batch, &mut f.buffers));
        opener.join().unwrap();
        f.loader.block_until_idle(&mut f.buffers, &mut f.resources);

        assert!(recorder.events().is_empty());
        assert_eq!(f.loader.active_batches(), 0);
        assert_eq!(
            f.buffers.image_status("img/a.png"),
            Some(ImageStatus::Cancelled)
        );
        assert!(!f.loader.cancel_image_batch_loading(batch, &mut f.buffers));
    }

    #[test]
    fn custom_placeholder_shows_while_pending() {
        let streams = Arc::new(GatedStreams::default());
        streams.inner.insert("img/wait.png", png([3, 3, 3, 255]));
        streams.inner.insert("img/spinner.png", png([7, 7, 7, 255]));
        streams.release();
        let mut f = fixture(streams.clone(), 1);
        f.buffers.load_image_sync(&mut f.resources, "img/spinner.png");
        *streams.open.lock() = false;

        let batch = f.loader.load_image_batch(
            &["img/wait.png"],
            Some("img/spinner.png"),
            Box::new(Recorder::default()),
            &mut f.buffers,
        );
        let spinner = f.buffers.resolve_image("img/spinner.png").unwrap().texture;
        let pending = f.buffers.resolve_image("img/wait.png").unwrap();
        assert!(pending.placeholder);
        assert_eq!(pending.texture, spinner);

        streams.release();
        f.loader.block_until_loaded(batch, &mut f.buffers, &mut f.resources);
        assert_eq!(f.buffers.image_status("img/wait.png"), Some(ImageStatus::Loaded));
        assert!(!f.buffers.resolve_image("img/wait.png").unwrap().placeholder);
    }

    #[test]
    fn meshes_load_in_the_background() {
        let streams = Arc::new(MemoryStreamFactory::new());
        streams.insert("mesh/quad.mesh", MeshData::rectangle().encode().unwrap());
        let mut f = fixture(streams, 1);
        assert!(f.loader.request_mesh("mesh/quad.mesh", &mut f.buffers));
        assert!(!f.loader.request_mesh("mesh/quad.mesh", &mut f.buffers));
        assert!(!f.loader.request_mesh("#Cube", &mut f.buffers));
        assert!(f.loader.request_mesh("mesh/missing.mesh", &mut f.buffers));

        f.loader.block_until_idle(&mut f.buffers, &mut f.resources);
        let mesh = f.buffers.mesh("mesh/quad.mesh").unwrap();
        assert_eq!(mesh.index_count, 6);
        assert!(f.buffers.is_mesh_failed("mesh/missing.mesh"));
    }

    #[test]
    fn drop_joins_workers_with_jobs_outstanding() {
        let streams = Arc::new(GatedStreams::default());
        streams.inner.insert("img/a.png", png([1, 2, 3, 255]));
        let mut f = fixture(streams.clone(), 2);
        f.loader.load_image_batch(
            &["img/a.png"],
            None,
            Box::new(Recorder::default()),
            &mut f.buffers,
        );
        streams.release();
        drop(f.loader);
    }
}
