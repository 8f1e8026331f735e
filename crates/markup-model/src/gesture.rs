//! Pointer gesture state machine
//!
//! Turns a pointer-down/pointer-up pair into an [`Annotation`]. Comment and
//! signature marks stop in [`GestureState::AwaitingContent`] until the caller
//! supplies (or cancels) their text, so no prompt ever blocks the event loop.

use crate::annotation::{Annotation, AnnotationKind};
use pdf_engine::{NormalizedRect, Point, Rect, Viewport};
use serde::{Deserialize, Serialize};

/// Active tool as selected by the chrome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    #[serde(alias = "cursor")]
    Select,
    Highlight,
    Underline,
    Comment,
    Signature,
}

impl Tool {
    /// Annotation kind produced by this tool, `None` for the select tool
    pub fn annotation_kind(self) -> Option<AnnotationKind> {
        match self {
            Self::Select => None,
            Self::Highlight => Some(AnnotationKind::Highlight),
            Self::Underline => Some(AnnotationKind::Underline),
            Self::Comment => Some(AnnotationKind::Comment),
            Self::Signature => Some(AnnotationKind::Signature),
        }
    }
}

/// Annotation waiting for its text payload
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAnnotation {
    pub kind: AnnotationKind,
    pub page_index: u32,
    /// Normalized page space
    pub region: NormalizedRect,
}

impl PendingAnnotation {
    fn finish(self, content: String) -> Annotation {
        Annotation::new(self.kind, self.page_index, self.region, content)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum GestureState {
    #[default]
    Idle,
    Selecting {
        start: Point,
    },
    AwaitingContent {
        pending: PendingAnnotation,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum GestureOutcome {
    /// The event did not apply to the current state
    Ignored,
    /// A drag started
    Started,
    Created(Annotation),
    /// Region captured; waiting for [`GestureTranslator::supply_content`]
    AwaitingContent(AnnotationKind),
}

/// Drag rectangle with its origin at the top-left corner
pub fn normalize(start: Point, end: Point) -> Rect {
    Rect::from_corners(start, end)
}

#[derive(Debug, Clone, Default)]
pub struct GestureTranslator {
    state: GestureState,
}

impl GestureTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &GestureState {
        &self.state
    }

    pub fn is_awaiting_content(&self) -> bool {
        matches!(self.state, GestureState::AwaitingContent { .. })
    }

    /// Record the drag start. Only annotation tools start a drag, and a
    /// pending text entry must be resolved first.
    pub fn pointer_down(&mut self, tool: Tool, point: Point) -> GestureOutcome {
        if tool.annotation_kind().is_none() || self.is_awaiting_content() {
            return GestureOutcome::Ignored;
        }

        self.state = GestureState::Selecting { start: point };
        GestureOutcome::Started
    }

    /// Finish the drag. `point` is in pixels of `viewport`; the stored region
    /// is normalized against it.
    pub fn pointer_up(
        &mut self,
        tool: Tool,
        point: Point,
        page_index: u32,
        viewport: &Viewport,
    ) -> GestureOutcome {
        let GestureState::Selecting { start } = self.state else {
            return GestureOutcome::Ignored;
        };
        self.state = GestureState::Idle;

        // Switching to the select tool mid-drag abandons the gesture.
        let Some(kind) = tool.annotation_kind() else {
            return GestureOutcome::Ignored;
        };

        let region = viewport.rect_to_normalized(normalize(start, point));
        let pending = PendingAnnotation { kind, page_index, region };

        if kind.takes_content() {
            self.state = GestureState::AwaitingContent { pending };
            return GestureOutcome::AwaitingContent(kind);
        }

        GestureOutcome::Created(pending.finish(String::new()))
    }

    /// Complete a pending comment or signature. `None` stores empty content.
    pub fn supply_content(&mut self, content: Option<String>) -> Option<Annotation> {
        match std::mem::take(&mut self.state) {
            GestureState::AwaitingContent { pending } => {
                Some(pending.finish(content.unwrap_or_default()))
            }
            other => {
                self.state = other;
                None
            }
        }
    }

    /// Dismiss the text entry; the annotation is still created, without text.
    pub fn cancel_content(&mut self) -> Option<Annotation> {
        self.supply_content(None)
    }

    /// Drop any gesture in progress
    pub fn reset(&mut self) {
        self.state = GestureState::Idle;
    }
}
