use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        Arc,
        mpsc::{Receiver, RecvTimeoutError, Sender, channel},
    },
    time::{Duration, Instant},
};

use anyhow::Context;

use crate::{
    assets::decode::{ImageRgba, decode_image},
    foundation::error::{PanoError, PanoResult},
};

/// Load state of one image key.
#[derive(Clone, Debug)]
pub enum ImageSlot {
    Loading,
    Ready(Arc<ImageRgba>),
    Failed(String),
}

struct Completion {
    key: String,
    ticket: u64,
    result: PanoResult<ImageRgba>,
}

/// Keyed image registry with background decoding.
///
/// Requests decode on a worker thread and report back over a channel; [`ImageStore::poll`]
/// applies finished decodes on the caller's thread. Completions for keys that were removed or
/// re-requested since are dropped.
pub struct ImageStore {
    slots: HashMap<String, ImageSlot>,
    tickets: HashMap<String, u64>,
    next_ticket: u64,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
}

impl Default for ImageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ImageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageStore")
            .field("slots", &self.slots.len())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl ImageStore {
    pub fn new() -> Self {
        let (tx, rx) = channel();
        Self {
            slots: HashMap::new(),
            tickets: HashMap::new(),
            next_ticket: 0,
            tx,
            rx,
        }
    }

    /// Register an already decoded image.
    pub fn insert_ready(&mut self, key: impl Into<String>, image: ImageRgba) -> Arc<ImageRgba> {
        let key = key.into();
        let image = Arc::new(image);
        self.tickets.remove(&key);
        self.slots.insert(key, ImageSlot::Ready(image.clone()));
        image
    }

    /// Mark `key` as loading for a decode driven by the host. Finish it with
    /// [`ImageStore::insert_ready`] or [`ImageStore::mark_failed`].
    pub fn mark_loading(&mut self, key: impl Into<String>) {
        let key = key.into();
        self.tickets.remove(&key);
        self.slots.insert(key, ImageSlot::Loading);
    }

    pub fn mark_failed(&mut self, key: impl Into<String>, error: impl Into<String>) {
        let key = key.into();
        self.tickets.remove(&key);
        self.slots.insert(key, ImageSlot::Failed(error.into()));
    }

    /// Decode encoded bytes in the background.
    pub fn request_bytes(&mut self, key: impl Into<String>, bytes: Vec<u8>) {
        self.spawn(key.into(), move || decode_image(&bytes));
    }

    /// Read and decode a file in the background.
    pub fn request_path(&mut self, key: impl Into<String>, path: PathBuf) {
        self.spawn(key.into(), move || {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("read image '{}'", path.display()))?;
            decode_image(&bytes)
        });
    }

    fn spawn<F>(&mut self, key: String, job: F)
    where
        F: FnOnce() -> PanoResult<ImageRgba> + Send + 'static,
    {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.tickets.insert(key.clone(), ticket);
        self.slots.insert(key.clone(), ImageSlot::Loading);

        let tx = self.tx.clone();
        let worker_key = key.clone();
        let spawned = std::thread::Builder::new()
            .name("panolayer-decode".to_owned())
            .spawn(move || {
                let result = job();
                let _ = tx.send(Completion {
                    key: worker_key,
                    ticket,
                    result,
                });
            });
        if let Err(e) = spawned {
            tracing::warn!(key = %key, error = %e, "failed to spawn image decode worker");
            self.tickets.remove(&key);
            self.slots
                .insert(key, ImageSlot::Failed(format!("spawn decode worker: {e}")));
        }
    }

    /// Apply finished decodes. Returns the keys whose state changed.
    pub fn poll(&mut self) -> Vec<String> {
        let mut changed = Vec::new();
        while let Ok(done) = self.rx.try_recv() {
            if let Some(key) = self.apply(done) {
                changed.push(key);
            }
        }
        changed
    }

    /// Block until every background decode has landed or `timeout` elapses. Returns the keys
    /// that changed. Keys marked loading by the host are not waited for.
    pub fn wait_idle(&mut self, timeout: Duration) -> PanoResult<Vec<String>> {
        let deadline = Instant::now() + timeout;
        let mut changed = self.poll();
        while !self.tickets.is_empty() {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(left) {
                Ok(done) => changed.extend(self.apply(done)),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(PanoError::resource(format!(
                        "{} image(s) still decoding after {timeout:?}",
                        self.tickets.len()
                    )));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(PanoError::resource("image decode channel closed"));
                }
            }
        }
        Ok(changed)
    }

    fn apply(&mut self, done: Completion) -> Option<String> {
        if self.tickets.get(&done.key) != Some(&done.ticket) {
            tracing::debug!(key = %done.key, "dropping stale image decode");
            return None;
        }
        self.tickets.remove(&done.key);
        let slot = match done.result {
            Ok(img) => {
                tracing::debug!(key = %done.key, w = img.width(), h = img.height(), "image ready");
                ImageSlot::Ready(Arc::new(img))
            }
            Err(e) => {
                tracing::warn!(key = %done.key, error = %e, "image decode failed");
                ImageSlot::Failed(e.to_string())
            }
        };
        self.slots.insert(done.key.clone(), slot);
        Some(done.key)
    }

    pub fn state(&self, key: &str) -> Option<&ImageSlot> {
        self.slots.get(key)
    }

    pub fn get(&self, key: &str) -> Option<Arc<ImageRgba>> {
        match self.slots.get(key) {
            Some(ImageSlot::Ready(img)) => Some(img.clone()),
            _ => None,
        }
    }

    pub fn is_pending(&self, key: &str) -> bool {
        matches!(self.slots.get(key), Some(ImageSlot::Loading))
    }

    pub fn pending_count(&self) -> usize {
        self.slots
            .values()
            .filter(|s| matches!(s, ImageSlot::Loading))
            .count()
    }

    /// Forget a key. An in-flight decode for it is discarded when it lands.
    pub fn remove(&mut self, key: &str) -> bool {
        self.tickets.remove(key);
        self.slots.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
