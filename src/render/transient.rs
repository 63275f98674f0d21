//! Per-frame resources whose lifetime ends at queue submission.
//!
//! A [`FrameResources`] collects the buffers and texture-cache references a frame records.
//! Only a [`SubmittedFrame`], obtained by consuming the recording after the queue submit,
//! can release them.

use crate::render::texture_cache::Releasable;

#[derive(Debug)]
pub struct FrameResources<B: Releasable> {
    frame: u64,
    buffers: Vec<B>,
    texture_refs: Vec<String>,
}

impl<B: Releasable> FrameResources<B> {
    pub fn begin(frame: u64) -> Self {
        Self {
            frame,
            buffers: Vec::new(),
            texture_refs: Vec::new(),
        }
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Keep `buffer` alive until the frame is submitted and return a reference to it.
    pub fn track(&mut self, buffer: B) -> &B {
        self.buffers.push(buffer);
        let last = self.buffers.len() - 1;
        &self.buffers[last]
    }

    /// Remember a texture-cache reference taken for this frame.
    pub fn track_texture(&mut self, key: impl Into<String>) {
        self.texture_refs.push(key.into());
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn buffers(&self) -> &[B] {
        &self.buffers
    }

    /// Mark the recording as handed to the queue.
    pub fn submitted(self) -> SubmittedFrame<B> {
        SubmittedFrame {
            frame: self.frame,
            buffers: self.buffers,
            texture_refs: self.texture_refs,
        }
    }
}

/// Resources of a frame that has been submitted.
#[derive(Debug)]
#[must_use = "release the submitted frame's resources"]
pub struct SubmittedFrame<B: Releasable> {
    frame: u64,
    buffers: Vec<B>,
    texture_refs: Vec<String>,
}

/// What a release freed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Released {
    pub frame: u64,
    pub buffers: usize,
    pub texture_refs: Vec<String>,
}

impl<B: Releasable> SubmittedFrame<B> {
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Destroy the tracked buffers and hand back the texture keys to release in the cache.
    pub fn release(self) -> Released {
        let mut buffers = self.buffers;
        let count = buffers.len();
        for b in &mut buffers {
            b.release_resource();
        }
        tracing::trace!(frame = self.frame, buffers = count, "released transient buffers");
        Released {
            frame: self.frame,
            buffers: count,
            texture_refs: self.texture_refs,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use super::*;

    struct FakeBuffer(Rc<Cell<usize>>);

    impl Releasable for FakeBuffer {
        fn release_resource(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn buffers_are_released_only_after_submit() {
        let freed = Rc::new(Cell::new(0));
        let mut frame = FrameResources::begin(7);
        frame.track(FakeBuffer(freed.clone()));
        frame.track(FakeBuffer(freed.clone()));
        frame.track_texture("bg");
        assert_eq!(frame.buffer_count(), 2);
        assert_eq!(freed.get(), 0);

        let submitted = frame.submitted();
        assert_eq!(freed.get(), 0);
        let released = submitted.release();
        assert_eq!(freed.get(), 2);
        assert_eq!(
            released,
            Released {
                frame: 7,
                buffers: 2,
                texture_refs: vec!["bg".to_owned()],
            }
        );
    }
}
