use pdf_engine::{PageGeometry, PageRef, PdfEngineError, Rotation, Viewport};
use std::collections::{HashMap, VecDeque};

const DEFAULT_CAPACITY: usize = 32;

/// Memoization key. Scale is keyed by its bit pattern so equal inputs hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewportKey {
    pub page: PageRef,
    pub scale_bits: u32,
    pub rotation: Rotation,
}

impl ViewportKey {
    pub fn new(page: PageRef, scale: f32, rotation: Rotation) -> Self {
        Self { page, scale_bits: scale.to_bits(), rotation }
    }

    pub fn scale(&self) -> f32 {
        f32::from_bits(self.scale_bits)
    }
}

/// Resolves page viewports, remembering recent results.
///
/// Resolution is a pure function of page, scale and rotation; the memo only
/// avoids recomputing on unrelated refreshes.
#[derive(Debug)]
pub struct ViewportResolver {
    capacity: usize,
    entries: HashMap<ViewportKey, Viewport>,
    order: VecDeque<ViewportKey>,
    hits: u64,
    misses: u64,
}

impl Default for ViewportResolver {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ViewportResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn resolve(
        &mut self,
        page: PageRef,
        geometry: &PageGeometry,
        scale: f32,
        rotation: Rotation,
    ) -> Result<Viewport, PdfEngineError> {
        let key = ViewportKey::new(page, scale, rotation);
        if let Some(viewport) = self.entries.get(&key).copied() {
            self.hits += 1;
            self.touch(&key);
            return Ok(viewport);
        }

        let viewport = Viewport::new(geometry, scale, rotation)?;
        self.misses += 1;
        self.insert(key, viewport);
        Ok(viewport)
    }

    /// Forget every entry, e.g. when the document changes.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    fn insert(&mut self, key: ViewportKey, viewport: Viewport) {
        self.entries.insert(key, viewport);
        self.order.push_back(key);

        while self.entries.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    fn touch(&mut self, key: &ViewportKey) {
        if let Some(index) = self.order.iter().position(|existing| existing == key) {
            if let Some(found) = self.order.remove(index) {
                self.order.push_back(found);
            }
        }
    }
}
