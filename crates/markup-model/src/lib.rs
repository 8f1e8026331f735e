//! Annotation model, annotation store and gesture translation.

mod annotation;
mod gesture;
mod store;

pub use annotation::{Annotation, AnnotationKind};
pub use gesture::{
    normalize, GestureOutcome, GestureState, GestureTranslator, PendingAnnotation, Tool,
};
pub use store::{AnnotationStore, StoreCommand, StoreError};
