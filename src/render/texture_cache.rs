use std::collections::HashMap;

use crate::{
    assets::decode::ImageRgba,
    foundation::error::{PanoError, PanoResult},
};

/// A device resource that must be torn down explicitly.
pub trait Releasable {
    fn release_resource(&mut self);
}

#[derive(Debug)]
struct CacheEntry<T> {
    texture: T,
    generation: u64,
    last_used: u64,
    ref_count: u32,
    width: u32,
    height: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub active_textures: usize,
    pub total_ref_count: u64,
    pub evictions: u64,
}

/// Reference-counted LRU of uploaded images keyed by image key.
///
/// Entries with a non-zero reference count are never evicted; when nothing is evictable the
/// cache grows past `max_size`. `last_used` is a logical tick so eviction order is exact.
#[derive(Debug)]
pub struct TextureCache<T: Releasable> {
    entries: HashMap<String, CacheEntry<T>>,
    max_size: usize,
    tick: u64,
    evictions: u64,
}

impl<T: Releasable> TextureCache<T> {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_size: max_size.max(1),
            tick: 0,
            evictions: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Take a reference to `id`, uploading `image` on a miss.
    ///
    /// A hit whose image generation changed re-uploads in place and keeps its references.
    pub fn load<F>(&mut self, id: &str, image: &ImageRgba, upload: F) -> PanoResult<&T>
    where
        F: FnOnce(&ImageRgba) -> PanoResult<T>,
    {
        let tick = self.next_tick();
        if self.entries.contains_key(id) {
            let entry = self
                .entries
                .get_mut(id)
                .ok_or_else(|| PanoError::resource("cache entry vanished"))?;
            if entry.generation != image.generation() {
                tracing::debug!(id, "texture source changed, re-uploading");
                let fresh = upload(image)?;
                let mut old = std::mem::replace(&mut entry.texture, fresh);
                old.release_resource();
                entry.generation = image.generation();
                entry.width = image.width();
                entry.height = image.height();
            }
            entry.last_used = tick;
            entry.ref_count += 1;
            return Ok(&entry.texture);
        }

        if self.entries.len() >= self.max_size {
            self.evict_lru();
        }
        let texture = upload(image)?;
        let entry = self.entries.entry(id.to_owned()).or_insert(CacheEntry {
            texture,
            generation: image.generation(),
            last_used: tick,
            ref_count: 1,
            width: image.width(),
            height: image.height(),
        });
        Ok(&entry.texture)
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.entries.get(id).map(|e| &e.texture)
    }

    /// Drop one reference. Eviction stays lazy.
    pub fn release(&mut self, id: &str) {
        match self.entries.get_mut(id) {
            Some(e) if e.ref_count > 0 => e.ref_count -= 1,
            Some(_) => tracing::warn!(id, "texture released more times than loaded"),
            None => tracing::warn!(id, "release of unknown texture"),
        }
    }

    pub fn has(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn dimensions(&self, id: &str) -> Option<(u32, u32)> {
        self.entries.get(id).map(|e| (e.width, e.height))
    }

    pub fn ref_count(&self, id: &str) -> Option<u32> {
        self.entries.get(id).map(|e| e.ref_count)
    }

    /// Evict the least recently used unreferenced entry. Returns its key.
    pub fn evict_lru(&mut self) -> Option<String> {
        let victim = self
            .entries
            .iter()
            .filter(|(_, e)| e.ref_count == 0)
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| k.clone());
        match victim {
            Some(key) => {
                self.remove_entry(&key);
                Some(key)
            }
            None => {
                tracing::warn!(
                    size = self.entries.len(),
                    max = self.max_size,
                    "no evictable texture, cache grows past capacity"
                );
                None
            }
        }
    }

    /// Evict `id` if nothing references it.
    pub fn evict(&mut self, id: &str) -> bool {
        match self.entries.get(id) {
            Some(e) if e.ref_count == 0 => {
                self.remove_entry(id);
                true
            }
            Some(e) => {
                tracing::debug!(id, refs = e.ref_count, "texture still referenced, not evicting");
                false
            }
            None => false,
        }
    }

    pub fn set_max_cache_size(&mut self, max_size: usize) {
        self.max_size = max_size.max(1);
        while self.entries.len() > self.max_size {
            if self.evict_lru().is_none() {
                break;
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            max_size: self.max_size,
            active_textures: self.entries.values().filter(|e| e.ref_count > 0).count(),
            total_ref_count: self.entries.values().map(|e| u64::from(e.ref_count)).sum(),
            evictions: self.evictions,
        }
    }

    /// Destroy every entry regardless of references.
    pub fn cleanup(&mut self) {
        for (_, mut e) in self.entries.drain() {
            e.texture.release_resource();
        }
    }

    fn remove_entry(&mut self, id: &str) {
        if let Some(mut e) = self.entries.remove(id) {
            e.texture.release_resource();
            self.evictions += 1;
            tracing::debug!(id, "texture evicted");
        }
    }
}

impl<T: Releasable> Drop for TextureCache<T> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    #[derive(Debug)]
    struct FakeTexture {
        id: String,
        destroyed: Rc<RefCell<Vec<String>>>,
    }

    impl Releasable for FakeTexture {
        fn release_resource(&mut self) {
            self.destroyed.borrow_mut().push(self.id.clone());
        }
    }

    struct Harness {
        cache: TextureCache<FakeTexture>,
        destroyed: Rc<RefCell<Vec<String>>>,
        img: ImageRgba,
        uploads: usize,
    }

    impl Harness {
        fn new(max: usize) -> Self {
            Self {
                cache: TextureCache::new(max),
                destroyed: Rc::default(),
                img: ImageRgba::solid(2, 2, [255, 0, 0, 255]).unwrap(),
                uploads: 0,
            }
        }

        fn load(&mut self, id: &str) {
            let destroyed = self.destroyed.clone();
            let uploads = &mut self.uploads;
            self.cache
                .load(id, &self.img, |_| {
                    *uploads += 1;
                    Ok(FakeTexture {
                        id: id.to_owned(),
                        destroyed,
                    })
                })
                .unwrap();
        }
    }

    #[test]
    fn hit_bumps_refcount_without_upload() {
        let mut h = Harness::new(4);
        h.load("a");
        h.load("a");
        assert_eq!(h.uploads, 1);
        assert_eq!(h.cache.ref_count("a"), Some(2));
        assert_eq!(h.cache.dimensions("a"), Some((2, 2)));
        let s = h.cache.stats();
        assert_eq!((s.size, s.active_textures, s.total_ref_count), (1, 1, 2));
    }

    #[test]
    fn lru_evicts_oldest_unreferenced_entry() {
        let mut h = Harness::new(2);
        h.load("a");
        h.load("b");
        h.cache.release("a");
        h.cache.release("b");
        h.load("a");
        h.cache.release("a");

        h.load("c");
        assert!(h.cache.has("a"));
        assert!(!h.cache.has("b"));
        assert_eq!(*h.destroyed.borrow(), vec!["b".to_owned()]);
        assert_eq!(h.cache.stats().evictions, 1);
    }

    #[test]
    fn referenced_entries_are_never_evicted() {
        let mut h = Harness::new(1);
        h.load("a");
        h.load("b");
        assert!(h.cache.has("a"));
        assert_eq!(h.cache.stats().size, 2);
        assert!(h.destroyed.borrow().is_empty());

        assert!(!h.cache.evict("a"));
        h.cache.release("a");
        assert!(h.cache.evict("a"));
    }

    #[test]
    fn double_release_saturates_at_zero() {
        let mut h = Harness::new(2);
        h.load("a");
        h.cache.release("a");
        h.cache.release("a");
        h.cache.release("missing");
        assert_eq!(h.cache.ref_count("a"), Some(0));
    }

    #[test]
    fn shrinking_stops_when_nothing_is_evictable() {
        let mut h = Harness::new(8);
        for id in ["a", "b", "c", "d"] {
            h.load(id);
        }
        h.cache.release("a");
        h.cache.release("b");
        h.cache.set_max_cache_size(1);
        assert_eq!(h.cache.stats().size, 2);
        assert_eq!(h.cache.stats().max_size, 1);
        assert!(h.cache.has("c") && h.cache.has("d"));
    }

    #[test]
    fn changed_image_reuploads_in_place() {
        let mut h = Harness::new(2);
        h.load("a");
        h.img = ImageRgba::solid(3, 1, [0, 0, 255, 255]).unwrap();
        h.load("a");
        assert_eq!(h.uploads, 2);
        assert_eq!(h.cache.ref_count("a"), Some(2));
        assert_eq!(h.cache.dimensions("a"), Some((3, 1)));
        assert_eq!(h.destroyed.borrow().len(), 1);
    }

    #[test]
    fn cleanup_destroys_everything() {
        let mut h = Harness::new(4);
        h.load("a");
        h.load("b");
        h.cache.cleanup();
        assert_eq!(h.cache.stats().size, 0);
        assert_eq!(h.destroyed.borrow().len(), 2);
        h.cache.cleanup();
        assert_eq!(h.destroyed.borrow().len(), 2);
    }
}
