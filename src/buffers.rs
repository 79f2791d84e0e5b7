//! Double-buffered satellite coordinates and the blend clock.
//!
//! The store keeps the two most recent coordinate snapshots. The renderer
//! blends between them on the GPU, so the CPU only touches coordinates when
//! a new snapshot arrives. Written by the propagation result handler and
//! read by the frame step, both on the UI thread.

/// Blend progress between `prev` and `next`, driven by caller-supplied
/// seconds (the frame clock).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpolationClock {
    start: f64,
    duration: f64,
}

impl InterpolationClock {
    pub fn new(duration: f64) -> Self {
        Self { start: f64::NEG_INFINITY, duration }
    }

    pub fn restart(&mut self, now: f64) {
        self.start = now;
    }

    /// Jumps straight to the end of the blend.
    pub fn park(&mut self) {
        self.start = f64::NEG_INFINITY;
    }

    /// `clamp((now - start) / duration, 0, 1)`, exactly 1.0 once
    /// `now >= start + duration`.
    pub fn blend(&self, now: f64) -> f32 {
        if self.duration <= 0.0 || now >= self.start + self.duration {
            return 1.0;
        }
        ((now - self.start) / self.duration).clamp(0.0, 1.0) as f32
    }
}

/// The blend the satellite shader performs, in the same `mix` form:
/// exact `a` at `t = 0` and exact `b` at `t = 1`.
pub fn interpolate(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallKind {
    /// Buffers were (re)allocated and both seeded with the new snapshot.
    Reseeded,
    /// `next` slid into `prev` and the blend clock restarted.
    Blended,
}

/// What the renderer reads for one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub prev: &'a [f32],
    pub next: &'a [f32],
    pub blend: f32,
    pub generation: u64,
}

impl FrameView<'_> {
    pub fn point_count(&self) -> usize {
        self.next.len() / 3
    }
}

#[derive(Debug)]
pub struct DoubleBufferStore {
    prev: Vec<f32>,
    next: Vec<f32>,
    allocated: bool,
    clock: InterpolationClock,
    generation: u64,
    reallocations: u64,
}

impl DoubleBufferStore {
    pub fn new(blend_duration: f64) -> Self {
        Self {
            prev: Vec::new(),
            next: Vec::new(),
            allocated: false,
            clock: InterpolationClock::new(blend_duration),
            generation: 0,
            reallocations: 0,
        }
    }

    /// Takes ownership of a freshly computed snapshot.
    ///
    /// A missing or differently sized pair of buffers is reallocated and
    /// both halves get the snapshot, so nothing jumps on screen. Otherwise
    /// the current `next` becomes `prev`, truncating any blend in progress.
    pub fn install(&mut self, buffer: Vec<f32>, now: f64) -> InstallKind {
        self.generation += 1;
        if !self.allocated || self.next.len() != buffer.len() {
            log::debug!("reseeding coordinate buffers: {} -> {} values", self.next.len(), buffer.len());
            self.prev = buffer.clone();
            self.next = buffer;
            self.allocated = true;
            self.reallocations += 1;
            self.clock.park();
            return InstallKind::Reseeded;
        }
        self.prev = std::mem::replace(&mut self.next, buffer);
        self.clock.restart(now);
        InstallKind::Blended
    }

    /// Drops both buffers; the next install reseeds.
    pub fn reset(&mut self) {
        self.prev = Vec::new();
        self.next = Vec::new();
        self.allocated = false;
        self.clock.park();
        self.generation += 1;
    }

    pub fn blend(&self, now: f64) -> f32 {
        self.clock.blend(now)
    }

    pub fn view(&self, now: f64) -> FrameView<'_> {
        FrameView {
            prev: &self.prev,
            next: &self.next,
            blend: self.blend(now),
            generation: self.generation,
        }
    }

    /// CPU-side blended position of one entry, for read-outs.
    pub fn interpolated(&self, index: usize, t: f32) -> Option<[f32; 3]> {
        let prev = self.prev.get(index * 3..index * 3 + 3)?;
        let next = self.next.get(index * 3..index * 3 + 3)?;
        Some([
            interpolate(prev[0], next[0], t),
            interpolate(prev[1], next[1], t),
            interpolate(prev[2], next[2], t),
        ])
    }

    pub fn prev(&self) -> &[f32] {
        &self.prev
    }

    pub fn next(&self) -> &[f32] {
        &self.next
    }

    pub fn is_allocated(&self) -> bool {
        self.allocated
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn reallocations(&self) -> u64 {
        self.reallocations
    }
}
