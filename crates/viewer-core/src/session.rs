//! Viewer session
//!
//! Owns one open document and wires the pieces together: page navigation
//! and zoom feed the viewport resolver, the resolved viewport drives both
//! the rasterizer and the overlay, and pointer events flow through the
//! gesture translator into the annotation store.

use crate::rasterizer::{
    DisplaySurface, PageRasterizer, RenderError, RenderStatus, DEFAULT_FAILURE_THRESHOLD,
};
use crate::resolver::{ViewportKey, ViewportResolver};
use markup_model::{
    AnnotationStore, GestureOutcome, GestureState, GestureTranslator, StoreCommand, StoreError,
    Tool,
};
use overlay::{OverlayCompositor, OverlayError, OverlaySurface, SignatureFont};
use pdf_engine::{
    DocumentHandle, OpenSource, PageRef, PdfEngine, PdfEngineError, Point, RgbaImage, Rotation,
    Viewport,
};
use std::sync::{Arc, RwLock};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no document is open")]
    NoDocument,
    #[error(transparent)]
    Engine(#[from] PdfEngineError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Overlay(#[from] OverlayError),
    #[error("page {page} has not been rendered at the current viewport")]
    NotRendered { page: u32 },
    #[error("engine lock poisoned")]
    EnginePoisoned,
}

/// Initial view settings for a session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub scale: f32,
    pub rotation: Rotation,
    pub failure_threshold: u32,
    pub signature_font: Option<SignatureFont>,
    pub signature_size: f32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            scale: 1.0,
            rotation: Rotation::Deg0,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            signature_font: None,
            signature_size: overlay::DEFAULT_SIGNATURE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenDocument {
    handle: DocumentHandle,
    page_count: u32,
}

/// Inputs the overlay was last drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OverlayStamp {
    store_version: u64,
    viewport: ViewportKey,
}

pub struct ViewerSession<E: PdfEngine + 'static> {
    engine: Arc<RwLock<E>>,
    document: Option<OpenDocument>,
    page_index: u32,
    scale: f32,
    rotation: Rotation,
    tool: Tool,
    store: AnnotationStore,
    gestures: GestureTranslator,
    resolver: ViewportResolver,
    rasterizer: PageRasterizer,
    compositor: OverlayCompositor,
    overlay: Option<OverlaySurface>,
    overlay_stamp: Option<OverlayStamp>,
}

impl<E: PdfEngine + 'static> ViewerSession<E> {
    pub fn new(engine: E, options: SessionOptions) -> Self {
        let engine = Arc::new(RwLock::new(engine));
        let rasterizer = PageRasterizer::new(engine.clone())
            .with_failure_threshold(options.failure_threshold);
        let compositor = OverlayCompositor::new(options.signature_font)
            .with_signature_size(options.signature_size);

        Self {
            engine,
            document: None,
            page_index: 0,
            scale: options.scale,
            rotation: options.rotation,
            tool: Tool::Select,
            store: AnnotationStore::new(),
            gestures: GestureTranslator::new(),
            resolver: ViewportResolver::new(),
            rasterizer,
            compositor,
            overlay: None,
            overlay_stamp: None,
        }
    }

    /// Open a document, replacing the current one and its annotations.
    ///
    /// On failure no document is open and nothing renders until a valid
    /// document is supplied.
    pub fn open(&mut self, source: impl Into<OpenSource>) -> Result<u32, SessionError> {
        self.rasterizer.reset();
        self.store = AnnotationStore::new();
        self.gestures.reset();
        self.resolver.clear();
        self.overlay_stamp = None;
        self.page_index = 0;

        let document = {
            let mut engine = self.engine.write().map_err(|_| SessionError::EnginePoisoned)?;
            if let Some(previous) = self.document.take() {
                if let Err(err) = engine.close(previous.handle) {
                    log::warn!("failed to close document {}: {err}", previous.handle.raw());
                }
            }

            let handle = engine.open(source.into())?;
            let page_count = engine.page_count(handle)?;
            OpenDocument { handle, page_count }
        };

        self.document = Some(document);
        self.refresh()?;
        Ok(document.page_count)
    }

    pub fn is_open(&self) -> bool {
        self.document.is_some()
    }

    pub fn page_count(&self) -> Option<u32> {
        self.document.map(|document| document.page_count)
    }

    /// Zero-based index of the displayed page
    pub fn current_page(&self) -> u32 {
        self.page_index
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    /// Go to `page_index`, clamped to the document. Returns the new index.
    pub fn set_page(&mut self, page_index: u32) -> Result<u32, SessionError> {
        let document = self.document.ok_or(SessionError::NoDocument)?;
        let target = page_index.min(document.page_count.saturating_sub(1));

        if target != self.page_index {
            self.page_index = target;
            self.abandon_drag();
            self.refresh()?;
        }
        Ok(self.page_index)
    }

    pub fn next_page(&mut self) -> Result<u32, SessionError> {
        self.set_page(self.page_index.saturating_add(1))
    }

    pub fn previous_page(&mut self) -> Result<u32, SessionError> {
        self.set_page(self.page_index.saturating_sub(1))
    }

    /// Change the zoom. A scale whose surface would exceed the size limit is
    /// rejected and the previous scale kept.
    pub fn set_scale(&mut self, scale: f32) -> Result<(), SessionError> {
        Viewport::check_scale(scale)?;
        if scale != self.scale {
            if self.document.is_some() {
                self.resolve_viewport(self.page_index, scale)?;
            }
            self.scale = scale;
            self.abandon_drag();
            self.refresh_if_open()?;
        }
        Ok(())
    }

    /// Requested rotation, added to the page's own rotation
    pub fn set_rotation(&mut self, rotation: Rotation) -> Result<(), SessionError> {
        if rotation != self.rotation {
            self.rotation = rotation;
            self.abandon_drag();
            self.refresh_if_open()?;
        }
        Ok(())
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn set_tool(&mut self, tool: Tool) {
        self.tool = tool;
    }

    pub fn current_page_ref(&self) -> Result<PageRef, SessionError> {
        let document = self.document.ok_or(SessionError::NoDocument)?;
        Ok(PageRef { document: document.handle, page_index: self.page_index })
    }

    /// Viewport of the displayed page at the current scale and rotation
    pub fn viewport(&mut self) -> Result<Viewport, SessionError> {
        self.page_viewport(self.page_index)
    }

    /// Viewport of any page at the current scale and rotation
    pub fn page_viewport(&mut self, page_index: u32) -> Result<Viewport, SessionError> {
        self.resolve_viewport(page_index, self.scale)
    }

    fn resolve_viewport(&mut self, page_index: u32, scale: f32) -> Result<Viewport, SessionError> {
        let document = self.document.ok_or(SessionError::NoDocument)?;
        let page = PageRef { document: document.handle, page_index };
        let geometry = {
            let engine = self.engine.read().map_err(|_| SessionError::EnginePoisoned)?;
            engine.page_geometry(page)?
        };
        Ok(self.resolver.resolve(page, &geometry, scale, self.rotation)?)
    }

    pub fn resolver(&self) -> &ViewportResolver {
        &self.resolver
    }

    pub fn gesture_state(&self) -> &GestureState {
        self.gestures.state()
    }

    pub fn pointer_down(&mut self, point: Point) -> GestureOutcome {
        if self.document.is_none() {
            return GestureOutcome::Ignored;
        }
        self.gestures.pointer_down(self.tool, point)
    }

    /// Finish a drag; a created annotation is appended to the store.
    pub fn pointer_up(&mut self, point: Point) -> Result<GestureOutcome, SessionError> {
        if self.document.is_none() {
            return Ok(GestureOutcome::Ignored);
        }

        let viewport = self.viewport()?;
        let outcome = self.gestures.pointer_up(self.tool, point, self.page_index, &viewport);
        if let GestureOutcome::Created(annotation) = &outcome {
            self.store = self.store.append(annotation.clone());
        }
        Ok(outcome)
    }

    /// Supply text for a pending comment or signature. Returns the index of
    /// the created annotation.
    pub fn supply_content(&mut self, content: Option<String>) -> Option<usize> {
        let annotation = self.gestures.supply_content(content)?;
        self.store = self.store.append(annotation);
        Some(self.store.len() - 1)
    }

    pub fn cancel_content(&mut self) -> Option<usize> {
        self.supply_content(None)
    }

    pub fn annotations(&self) -> &AnnotationStore {
        &self.store
    }

    pub fn apply(&mut self, command: StoreCommand) -> Result<(), SessionError> {
        self.store = self.store.apply(command)?;
        Ok(())
    }

    pub fn undo(&mut self) {
        self.store = self.store.undo_last();
    }

    pub fn delete_at(&mut self, index: usize) -> Result<(), SessionError> {
        self.store = self.store.delete_at(index)?;
        Ok(())
    }

    /// Topmost annotation on the displayed page under `point`
    pub fn hit_test(&mut self, point: Point) -> Result<Option<usize>, SessionError> {
        let viewport = self.viewport()?;
        Ok(self.store.hit_test(self.page_index, point, &viewport))
    }

    pub fn poll_render(&mut self) -> RenderStatus {
        self.rasterizer.poll()
    }

    pub fn wait_render(&mut self) -> Result<RenderStatus, SessionError> {
        Ok(self.rasterizer.wait()?)
    }

    pub fn render_status(&self) -> RenderStatus {
        self.rasterizer.status()
    }

    pub fn is_render_failing(&self) -> bool {
        self.rasterizer.is_persistently_failing()
    }

    /// Bitmap on display, which may lag behind the current viewport
    pub fn page_image(&self) -> Option<&DisplaySurface> {
        self.rasterizer.surface()
    }

    /// Overlay for the displayed page, redrawn when annotations or the
    /// viewport changed since the last draw.
    pub fn overlay(&mut self) -> Result<&OverlaySurface, SessionError> {
        self.redraw_overlay()?;
        self.overlay.as_ref().ok_or(SessionError::NoDocument)
    }

    /// Page bitmap with the overlay blended on top
    pub fn composite(&mut self) -> Result<RgbaImage, SessionError> {
        self.rasterizer.poll();
        let viewport = self.viewport()?;
        let key = ViewportKey::new(self.current_page_ref()?, self.scale, self.rotation);
        self.redraw_overlay()?;

        let page = self
            .rasterizer
            .surface()
            .filter(|surface| surface.key.page == key.page && surface.viewport == viewport)
            .ok_or(SessionError::NotRendered { page: self.page_index })?;
        let overlay = self.overlay.as_ref().ok_or(SessionError::NoDocument)?;

        Ok(overlay.composite_over(&page.image)?)
    }

    fn redraw_overlay(&mut self) -> Result<(), SessionError> {
        let viewport = self.viewport()?;
        let stamp = OverlayStamp {
            store_version: self.store.version(),
            viewport: ViewportKey::new(self.current_page_ref()?, self.scale, self.rotation),
        };
        if self.overlay.is_some() && self.overlay_stamp == Some(stamp) {
            return Ok(());
        }

        if self.overlay.is_none() {
            let (width, height) = viewport.pixel_size();
            self.overlay = Some(OverlaySurface::new(width, height)?);
        }
        let Some(surface) = self.overlay.as_mut() else {
            return Err(SessionError::NoDocument);
        };
        self.compositor.draw(surface, &self.store.snapshot(), &viewport, self.page_index)?;
        self.overlay_stamp = Some(stamp);
        Ok(())
    }

    fn refresh(&mut self) -> Result<(), SessionError> {
        let page = self.current_page_ref()?;
        let viewport = self.viewport()?;
        self.rasterizer.request(page, viewport)?;
        Ok(())
    }

    fn refresh_if_open(&mut self) -> Result<(), SessionError> {
        if self.document.is_some() {
            self.refresh()?;
        }
        Ok(())
    }

    /// A drag start captured under the old viewport no longer lines up.
    fn abandon_drag(&mut self) {
        if matches!(self.gestures.state(), GestureState::Selecting { .. }) {
            self.gestures.reset();
        }
    }
}

impl<E: PdfEngine + 'static> Drop for ViewerSession<E> {
    fn drop(&mut self) {
        self.rasterizer.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use markup_model::AnnotationKind;
    use pdf_engine::fixtures::{pdf_bytes, FixturePage};
    use pdf_engine::{LopdfEngine, Rect};

    fn session_with(pages: &[FixturePage]) -> ViewerSession<LopdfEngine> {
        let mut session = ViewerSession::new(LopdfEngine::new(), SessionOptions::default());
        session.open(pdf_bytes(pages)).expect("fixture opens");
        session
    }

    fn drag(
        session: &mut ViewerSession<LopdfEngine>,
        from: (f32, f32),
        to: (f32, f32),
    ) -> GestureOutcome {
        session.pointer_down(Point::new(from.0, from.1));
        session.pointer_up(Point::new(to.0, to.1)).unwrap()
    }

    fn assert_rect(rect: Rect, x: f32, y: f32, width: f32, height: f32) {
        let close = |a: f32, b: f32| (a - b).abs() < 1e-3;
        let matches = close(rect.x, x)
            && close(rect.y, y)
            && close(rect.width, width)
            && close(rect.height, height);
        assert!(matches, "unexpected rect {rect:?}");
    }

    #[test]
    fn highlight_drag_then_undo_clears_overlay() {
        let mut session = session_with(&[FixturePage::new(300, 400)]);
        session.set_tool(Tool::Highlight);

        let outcome = drag(&mut session, (50.0, 80.0), (120.0, 40.0));
        assert!(matches!(outcome, GestureOutcome::Created(_)));
        assert_eq!(session.annotations().len(), 1);

        let viewport = session.viewport().unwrap();
        let annotation = session.annotations().get(0).unwrap().clone();
        assert_eq!(annotation.kind(), AnnotationKind::Highlight);
        assert_eq!(annotation.content(), "");
        assert_rect(annotation.region_in(&viewport), 50.0, 40.0, 70.0, 40.0);

        let overlay = session.overlay().unwrap();
        assert_eq!(overlay.size(), (300, 400));
        assert_eq!(overlay.pixel(80, 60).map(|p| (p[0], p[1], p[2])), Some((255, 255, 0)));

        session.undo();
        assert!(session.annotations().is_empty());
        assert!(session.overlay().unwrap().is_blank());
    }

    #[test]
    fn open_failure_leaves_no_document() {
        let mut session = session_with(&[FixturePage::new(300, 400)]);

        let err = session.open(b"not a pdf".to_vec()).unwrap_err();

        assert!(matches!(err, SessionError::Engine(PdfEngineError::Parse(_))));
        assert!(!session.is_open());
        assert!(matches!(session.set_page(0), Err(SessionError::NoDocument)));
        assert_eq!(session.render_status(), RenderStatus::Idle);
    }

    #[test]
    fn navigation_clamps_to_document() {
        let mut session = session_with(&[
            FixturePage::new(300, 400),
            FixturePage::new(400, 300),
            FixturePage::new(300, 400),
        ]);

        assert_eq!(session.previous_page().unwrap(), 0);
        assert_eq!(session.next_page().unwrap(), 1);
        assert_eq!(session.set_page(10).unwrap(), 2);
        assert_eq!(session.next_page().unwrap(), 2);
    }

    #[test]
    fn render_follows_page_and_scale() {
        let mut session = session_with(&[FixturePage::new(300, 400), FixturePage::new(200, 100)]);

        assert_eq!(session.wait_render().unwrap(), RenderStatus::Ready);
        assert_eq!(session.page_image().unwrap().image.dimensions(), (300, 400));

        session.next_page().unwrap();
        session.set_scale(2.0).unwrap();
        assert_eq!(session.wait_render().unwrap(), RenderStatus::Ready);
        assert_eq!(session.page_image().unwrap().image.dimensions(), (400, 200));
    }

    #[test]
    fn invalid_scale_is_rejected_and_kept() {
        let mut session = session_with(&[FixturePage::new(300, 400)]);

        assert!(matches!(
            session.set_scale(0.0),
            Err(SessionError::Engine(PdfEngineError::InvalidScale(_)))
        ));
        assert_eq!(session.scale(), 1.0);
    }

    #[test]
    fn huge_zoom_is_rejected_before_allocating() {
        let mut session = session_with(&[FixturePage::new(612, 792)]);

        assert!(matches!(
            session.set_scale(10_000.0),
            Err(SessionError::Engine(PdfEngineError::InvalidScale(_)))
        ));
        // Within the zoom range, but the surface would pass the pixel limit.
        assert!(matches!(
            session.set_scale(pdf_engine::MAX_SCALE),
            Err(SessionError::Engine(PdfEngineError::InvalidScale(_)))
        ));
        assert_eq!(session.scale(), 1.0);
        assert_eq!(session.overlay().unwrap().size(), (612, 792));
    }

    #[test]
    fn annotations_follow_zoom_and_rotation() {
        let mut session = session_with(&[FixturePage::new(300, 400)]);
        session.set_tool(Tool::Highlight);
        drag(&mut session, (0.0, 0.0), (30.0, 40.0));

        session.set_scale(2.0).unwrap();
        let zoomed = session.viewport().unwrap();
        let region = session.annotations().get(0).unwrap().region_in(&zoomed);
        assert_rect(region, 0.0, 0.0, 60.0, 80.0);

        session.set_scale(1.0).unwrap();
        session.set_rotation(Rotation::Deg90).unwrap();
        let turned = session.viewport().unwrap();
        let region = session.annotations().get(0).unwrap().region_in(&turned);
        assert_rect(region, 360.0, 0.0, 40.0, 30.0);
        assert_eq!(session.overlay().unwrap().size(), (400, 300));
    }

    #[test]
    fn annotations_are_scoped_to_their_page() {
        let mut session = session_with(&[FixturePage::new(300, 400), FixturePage::new(300, 400)]);
        session.set_tool(Tool::Highlight);
        drag(&mut session, (10.0, 10.0), (60.0, 60.0));

        session.next_page().unwrap();
        assert!(session.overlay().unwrap().is_blank());

        session.previous_page().unwrap();
        assert!(!session.overlay().unwrap().is_blank());
    }

    #[test]
    fn comment_waits_for_text_then_lands_in_store() {
        let mut session = session_with(&[FixturePage::new(300, 400)]);
        session.set_tool(Tool::Comment);

        let outcome = drag(&mut session, (100.0, 100.0), (100.0, 100.0));
        assert_eq!(outcome, GestureOutcome::AwaitingContent(AnnotationKind::Comment));
        assert!(session.annotations().is_empty());

        assert_eq!(session.supply_content(Some("see p.2".to_owned())), Some(0));
        assert_eq!(session.annotations().get(0).unwrap().content(), "see p.2");

        session.set_tool(Tool::Signature);
        drag(&mut session, (10.0, 50.0), (10.0, 50.0));
        assert_eq!(session.cancel_content(), Some(1));
        assert_eq!(session.annotations().get(1).unwrap().content(), "");
    }

    #[test]
    fn delete_out_of_range_is_reported() {
        let mut session = session_with(&[FixturePage::new(300, 400)]);
        session.set_tool(Tool::Underline);
        drag(&mut session, (10.0, 10.0), (60.0, 20.0));

        assert!(matches!(
            session.delete_at(3),
            Err(SessionError::Store(StoreError::OutOfRange { index: 3, len: 1 }))
        ));
        assert_eq!(session.annotations().len(), 1);

        session.delete_at(0).unwrap();
        assert!(session.annotations().is_empty());
    }

    #[test]
    fn select_tool_creates_nothing() {
        let mut session = session_with(&[FixturePage::new(300, 400)]);

        let outcome = drag(&mut session, (10.0, 10.0), (60.0, 60.0));

        assert_eq!(outcome, GestureOutcome::Ignored);
        assert!(session.annotations().is_empty());
    }

    #[test]
    fn hit_test_finds_annotation_under_pointer() {
        let mut session = session_with(&[FixturePage::new(300, 400)]);
        session.set_tool(Tool::Highlight);
        drag(&mut session, (10.0, 10.0), (60.0, 60.0));

        assert_eq!(session.hit_test(Point::new(30.0, 30.0)).unwrap(), Some(0));
        assert_eq!(session.hit_test(Point::new(200.0, 200.0)).unwrap(), None);
    }

    #[test]
    fn composite_blends_overlay_over_page() {
        let mut session = session_with(&[FixturePage::new(300, 400)]);
        session.set_tool(Tool::Highlight);
        drag(&mut session, (50.0, 80.0), (120.0, 40.0));
        session.wait_render().unwrap();

        let image = session.composite().unwrap();

        assert_eq!(image.dimensions(), (300, 400));
        let [r, g, b, a] = image.get_pixel(80, 60).0;
        assert_eq!((r, g, a), (255, 255, 255));
        assert!((170..=185).contains(&b), "blue {b}");
        assert_eq!(image.get_pixel(200, 200).0, [255, 255, 255, 255]);
    }

    #[test]
    fn composite_before_render_is_not_ready() {
        let mut session = session_with(&[FixturePage::new(300, 400)]);
        session.wait_render().unwrap();
        session.set_scale(3.0).unwrap();
        session.rasterizer.cancel();

        assert!(matches!(session.composite(), Err(SessionError::NotRendered { page: 0 })));
    }
}
