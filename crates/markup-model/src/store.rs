//! Annotation store
//!
//! The store is a value: every operation returns a new store and leaves the
//! receiver untouched. Snapshots are `Arc`-shared, so handing the current
//! sequence to the compositor never aliases mutable state.

use crate::annotation::Annotation;
use pdf_engine::{Point, Viewport};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("annotation index {index} out of range (len={len})")]
    OutOfRange { index: usize, len: usize },
}

/// Mutation expressed as data, applied with [`AnnotationStore::apply`]
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCommand {
    Append(Annotation),
    UndoLast,
    DeleteAt(usize),
}

/// Ordered annotations for one document.
///
/// Order is z-order (later draws on top) and undo order (last removed first).
#[derive(Debug, Clone, Default)]
pub struct AnnotationStore {
    annotations: Arc<Vec<Annotation>>,
    version: u64,
}

impl PartialEq for AnnotationStore {
    fn eq(&self, other: &Self) -> bool {
        self.annotations == other.annotations
    }
}

impl AnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, annotation: Annotation) -> Self {
        let mut annotations = self.annotations.as_ref().clone();
        annotations.push(annotation);
        self.next(annotations)
    }

    /// Remove the most recent annotation. An empty store stays empty.
    pub fn undo_last(&self) -> Self {
        if self.annotations.is_empty() {
            return self.clone();
        }

        let mut annotations = self.annotations.as_ref().clone();
        annotations.pop();
        self.next(annotations)
    }

    pub fn delete_at(&self, index: usize) -> Result<Self, StoreError> {
        if index >= self.annotations.len() {
            return Err(StoreError::OutOfRange { index, len: self.annotations.len() });
        }

        let mut annotations = self.annotations.as_ref().clone();
        annotations.remove(index);
        Ok(self.next(annotations))
    }

    pub fn apply(&self, command: StoreCommand) -> Result<Self, StoreError> {
        match command {
            StoreCommand::Append(annotation) => Ok(self.append(annotation)),
            StoreCommand::UndoLast => Ok(self.undo_last()),
            StoreCommand::DeleteAt(index) => self.delete_at(index),
        }
    }

    /// Shared, immutable view of the current sequence
    pub fn snapshot(&self) -> Arc<Vec<Annotation>> {
        Arc::clone(&self.annotations)
    }

    /// Bumped by every operation that changed the sequence
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Annotation> {
        self.annotations.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Annotation> {
        self.annotations.iter()
    }

    /// Annotations placed on `page_index`, with their store indices
    pub fn on_page(&self, page_index: u32) -> impl Iterator<Item = (usize, &Annotation)> {
        self.annotations
            .iter()
            .enumerate()
            .filter(move |(_, annotation)| annotation.page_index() == page_index)
    }

    /// Index of the topmost annotation on `page_index` whose region contains
    /// `point` (pixels in `viewport`).
    pub fn hit_test(&self, page_index: u32, point: Point, viewport: &Viewport) -> Option<usize> {
        self.on_page(page_index)
            .filter(|(_, annotation)| annotation.region_in(viewport).contains(point))
            .map(|(index, _)| index)
            .last()
    }

    fn next(&self, annotations: Vec<Annotation>) -> Self {
        Self { annotations: Arc::new(annotations), version: self.version + 1 }
    }
}
