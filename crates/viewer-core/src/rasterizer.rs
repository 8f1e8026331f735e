//! Background page rasterization
//!
//! Each request runs on its own worker thread and is represented by a
//! [`RenderTask`]. Dropping a task cancels it, and the rasterizer drops the
//! current task before starting a new one, so a superseded render can never
//! reach the display surface.

use pdf_engine::{
    CancellationToken, PageRef, PageRenderer, PdfEngineError, RgbaImage, Rotation, Viewport,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to spawn render worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("render worker panicked")]
    WorkerPanicked,
}

/// Dependency set of a render: page identity, scale and rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderKey {
    pub page: PageRef,
    pub scale_bits: u32,
    pub rotation: Rotation,
}

impl RenderKey {
    pub fn new(page: PageRef, viewport: &Viewport) -> Self {
        Self { page, scale_bits: viewport.scale.to_bits(), rotation: viewport.rotation }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderStatus {
    #[default]
    Idle,
    Rendering,
    Ready,
    Failed {
        consecutive: u32,
    },
}

type RenderSlot = Arc<Mutex<Option<Result<RgbaImage, PdfEngineError>>>>;

/// One in-flight rasterization. Cancelled when dropped.
pub struct RenderTask {
    key: RenderKey,
    viewport: Viewport,
    cancel: CancellationToken,
    result: RenderSlot,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for RenderTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTask")
            .field("key", &self.key)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl RenderTask {
    fn spawn(
        renderer: Arc<dyn PageRenderer>,
        key: RenderKey,
        viewport: Viewport,
    ) -> Result<Self, RenderError> {
        let cancel = CancellationToken::new();
        let result: RenderSlot = Arc::new(Mutex::new(None));

        let worker_cancel = cancel.clone();
        let worker_result = Arc::clone(&result);
        let thread = std::thread::Builder::new()
            .name(format!("page-render-{}", key.page.page_index))
            .spawn(move || {
                let rendered = renderer.render_page(key.page, &viewport, &worker_cancel);
                if worker_cancel.is_cancelled() {
                    return;
                }
                *worker_result.lock().unwrap_or_else(PoisonError::into_inner) = Some(rendered);
            })
            .map_err(RenderError::Spawn)?;

        Ok(Self { key, viewport, cancel, result, thread: Some(thread) })
    }

    pub fn key(&self) -> RenderKey {
        self.key
    }

    /// The worker has exited, with or without leaving a result behind.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    fn try_take(&self) -> Option<Result<RgbaImage, PdfEngineError>> {
        self.result.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn join(&mut self) -> Result<(), RenderError> {
        match self.thread.take() {
            Some(handle) => handle.join().map_err(|_| RenderError::WorkerPanicked),
            None => Ok(()),
        }
    }
}

impl Drop for RenderTask {
    fn drop(&mut self) {
        if self.thread.is_some() {
            log::debug!("cancelling render of page {}", self.key.page.page_index);
        }
        self.cancel.cancel();
    }
}

/// Bitmap currently assigned to the display
#[derive(Debug, Clone)]
pub struct DisplaySurface {
    pub key: RenderKey,
    pub viewport: Viewport,
    pub image: Arc<RgbaImage>,
}

#[derive(Debug, Clone, Copy, Default)]
struct FailureCounter {
    key: Option<RenderKey>,
    consecutive: u32,
}

impl FailureCounter {
    fn record(&mut self, key: RenderKey) -> u32 {
        if self.key == Some(key) {
            self.consecutive += 1;
        } else {
            self.key = Some(key);
            self.consecutive = 1;
        }
        self.consecutive
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Renders one page at a time into a single display surface
pub struct PageRasterizer {
    renderer: Arc<dyn PageRenderer>,
    current: Option<RenderTask>,
    surface: Option<DisplaySurface>,
    status: RenderStatus,
    failures: FailureCounter,
    failure_threshold: u32,
}

impl std::fmt::Debug for PageRasterizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageRasterizer")
            .field("current", &self.current)
            .field("status", &self.status)
            .field("failure_threshold", &self.failure_threshold)
            .finish()
    }
}

impl PageRasterizer {
    pub fn new(renderer: Arc<dyn PageRenderer>) -> Self {
        Self {
            renderer,
            current: None,
            surface: None,
            status: RenderStatus::Idle,
            failures: FailureCounter::default(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Start rendering `page` at `viewport` unless that exact render is
    /// already in flight or on display. Any other in-flight render is
    /// cancelled first.
    pub fn request(&mut self, page: PageRef, viewport: Viewport) -> Result<(), RenderError> {
        let key = RenderKey::new(page, &viewport);

        if self.current.as_ref().is_some_and(|task| task.key() == key) {
            return Ok(());
        }

        self.current = None;
        if self.surface.as_ref().is_some_and(|surface| surface.key == key) {
            self.failures.reset();
            self.status = RenderStatus::Ready;
            return Ok(());
        }

        log::debug!(
            "rendering page {} at scale {} rotation {}",
            page.page_index,
            viewport.scale,
            viewport.rotation.degrees()
        );
        self.current = Some(RenderTask::spawn(Arc::clone(&self.renderer), key, viewport)?);
        self.status = RenderStatus::Rendering;
        Ok(())
    }

    /// Apply the current task's result if it finished. Never blocks.
    pub fn poll(&mut self) -> RenderStatus {
        if self.current.as_ref().is_some_and(RenderTask::is_finished) {
            if let Some(task) = self.current.take() {
                // A panicked worker is already recorded as a failure.
                let _ = self.settle(task);
            }
        }
        self.status
    }

    /// Block until the current task finishes, then apply its result.
    pub fn wait(&mut self) -> Result<RenderStatus, RenderError> {
        let Some(task) = self.current.take() else {
            return Ok(self.status);
        };
        self.settle(task)?;
        Ok(self.status)
    }

    /// Cancel the in-flight render, if any. The displayed bitmap stays.
    pub fn cancel(&mut self) {
        if self.current.take().is_some() {
            self.status = self.resting_status();
        }
    }

    /// Cancel everything and drop the displayed bitmap.
    pub fn reset(&mut self) {
        self.current = None;
        self.surface = None;
        self.status = RenderStatus::Idle;
        self.failures.reset();
    }

    pub fn status(&self) -> RenderStatus {
        self.status
    }

    pub fn surface(&self) -> Option<&DisplaySurface> {
        self.surface.as_ref()
    }

    pub fn in_flight(&self) -> Option<RenderKey> {
        self.current.as_ref().map(RenderTask::key)
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Consecutive failures of one render key reached the threshold
    pub fn is_persistently_failing(&self) -> bool {
        self.failures.key.is_some() && self.failures.consecutive >= self.failure_threshold
    }

    fn settle(&mut self, mut task: RenderTask) -> Result<(), RenderError> {
        if let Err(err) = task.join() {
            let consecutive = self.failures.record(task.key);
            log::warn!(
                "render worker for page {} panicked ({consecutive} in a row)",
                task.key.page.page_index
            );
            self.status = RenderStatus::Failed { consecutive };
            return Err(err);
        }
        match task.try_take() {
            Some(result) => self.complete(&task, result),
            None => self.status = self.resting_status(),
        }
        Ok(())
    }

    fn resting_status(&self) -> RenderStatus {
        if self.surface.is_some() {
            RenderStatus::Ready
        } else {
            RenderStatus::Idle
        }
    }

    fn complete(&mut self, task: &RenderTask, result: Result<RgbaImage, PdfEngineError>) {
        match result {
            Ok(image) => {
                self.failures.reset();
                self.surface = Some(DisplaySurface {
                    key: task.key,
                    viewport: task.viewport,
                    image: Arc::new(image),
                });
                self.status = RenderStatus::Ready;
            }
            Err(PdfEngineError::Cancelled) => self.status = self.resting_status(),
            Err(err) => {
                let consecutive = self.failures.record(task.key);
                log::warn!(
                    "render of page {} failed ({consecutive} in a row): {err}",
                    task.key.page.page_index
                );
                self.status = RenderStatus::Failed { consecutive };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdf_engine::{DocumentHandle, PageGeometry};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    fn page(index: u32) -> PageRef {
        PageRef { document: DocumentHandle::from_raw(1), page_index: index }
    }

    fn viewport(scale: f32) -> Viewport {
        let geometry = PageGeometry::from_box(0.0, 0.0, 100.0, 50.0, Rotation::Deg0);
        Viewport::new(&geometry, scale, Rotation::Deg0).unwrap()
    }

    /// Fills the page with a colour derived from the page index.
    struct SolidRenderer;

    impl PageRenderer for SolidRenderer {
        fn render_page(
            &self,
            page: PageRef,
            viewport: &Viewport,
            cancel: &CancellationToken,
        ) -> Result<RgbaImage, PdfEngineError> {
            cancel.check()?;
            let (width, height) = viewport.pixel_size();
            let colour = image::Rgba([page.page_index as u8, 0, 0, 255]);
            Ok(RgbaImage::from_pixel(width, height, colour))
        }
    }

    /// Blocks page 0 until released; other pages render immediately.
    struct GatedRenderer {
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl PageRenderer for GatedRenderer {
        fn render_page(
            &self,
            page: PageRef,
            viewport: &Viewport,
            cancel: &CancellationToken,
        ) -> Result<RgbaImage, PdfEngineError> {
            if page.page_index == 0 {
                let _ = self.gate.lock().unwrap().recv_timeout(Duration::from_secs(5));
            }
            SolidRenderer.render_page(page, viewport, cancel)
        }
    }

    struct FailingRenderer {
        calls: AtomicU32,
    }

    impl PageRenderer for FailingRenderer {
        fn render_page(
            &self,
            _page: PageRef,
            _viewport: &Viewport,
            _cancel: &CancellationToken,
        ) -> Result<RgbaImage, PdfEngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(PdfEngineError::Backend("boom".to_owned()))
        }
    }

    /// Fails page 1 only.
    struct PageOneFailsRenderer;

    impl PageRenderer for PageOneFailsRenderer {
        fn render_page(
            &self,
            page: PageRef,
            viewport: &Viewport,
            cancel: &CancellationToken,
        ) -> Result<RgbaImage, PdfEngineError> {
            if page.page_index == 1 {
                return Err(PdfEngineError::Backend("page 1 is broken".to_owned()));
            }
            SolidRenderer.render_page(page, viewport, cancel)
        }
    }

    struct PanickingRenderer;

    impl PageRenderer for PanickingRenderer {
        fn render_page(
            &self,
            _page: PageRef,
            _viewport: &Viewport,
            _cancel: &CancellationToken,
        ) -> Result<RgbaImage, PdfEngineError> {
            panic!("renderer bug");
        }
    }

    fn poll_until_settled(rasterizer: &mut PageRasterizer) -> RenderStatus {
        for _ in 0..200 {
            let status = rasterizer.poll();
            if status != RenderStatus::Rendering {
                return status;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        rasterizer.status()
    }

    #[test]
    fn completed_render_reaches_surface() {
        let mut rasterizer = PageRasterizer::new(Arc::new(SolidRenderer));

        rasterizer.request(page(2), viewport(2.0)).unwrap();
        assert_eq!(rasterizer.status(), RenderStatus::Rendering);

        assert_eq!(rasterizer.wait().unwrap(), RenderStatus::Ready);
        let surface = rasterizer.surface().expect("surface assigned");
        assert_eq!(surface.image.dimensions(), (200, 100));
        assert_eq!(surface.image.get_pixel(0, 0).0, [2, 0, 0, 255]);
    }

    #[test]
    fn superseded_render_never_reaches_surface() {
        let (release, gate) = mpsc::channel();
        let mut rasterizer =
            PageRasterizer::new(Arc::new(GatedRenderer { gate: Mutex::new(gate) }));

        rasterizer.request(page(0), viewport(1.0)).unwrap();
        rasterizer.request(page(1), viewport(1.0)).unwrap();
        release.send(()).unwrap();

        assert_eq!(rasterizer.wait().unwrap(), RenderStatus::Ready);
        // Give the stale worker time to finish; its result must be discarded.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(rasterizer.poll(), RenderStatus::Ready);

        let surface = rasterizer.surface().expect("surface assigned");
        assert_eq!(surface.key.page, page(1));
        assert_eq!(surface.image.get_pixel(0, 0).0, [1, 0, 0, 255]);
    }

    #[test]
    fn identical_request_keeps_current_task() {
        let mut rasterizer = PageRasterizer::new(Arc::new(SolidRenderer));

        rasterizer.request(page(0), viewport(1.0)).unwrap();
        let key = rasterizer.in_flight();
        rasterizer.request(page(0), viewport(1.0)).unwrap();

        assert_eq!(rasterizer.in_flight(), key);
        rasterizer.wait().unwrap();

        rasterizer.request(page(0), viewport(1.0)).unwrap();
        assert_eq!(rasterizer.in_flight(), None);
        assert_eq!(rasterizer.status(), RenderStatus::Ready);
    }

    #[test]
    fn cancelled_render_keeps_previous_bitmap() {
        let (_release, gate) = mpsc::channel();
        let mut rasterizer =
            PageRasterizer::new(Arc::new(GatedRenderer { gate: Mutex::new(gate) }));

        rasterizer.request(page(1), viewport(1.0)).unwrap();
        rasterizer.wait().unwrap();

        rasterizer.request(page(0), viewport(1.0)).unwrap();
        rasterizer.cancel();

        assert_eq!(rasterizer.status(), RenderStatus::Ready);
        assert_eq!(rasterizer.surface().map(|s| s.key.page), Some(page(1)));
    }

    #[test]
    fn failures_are_counted_and_swallowed() {
        let renderer = Arc::new(FailingRenderer { calls: AtomicU32::new(0) });
        let mut rasterizer = PageRasterizer::new(renderer.clone()).with_failure_threshold(2);

        rasterizer.request(page(0), viewport(1.0)).unwrap();
        assert_eq!(rasterizer.wait().unwrap(), RenderStatus::Failed { consecutive: 1 });
        assert!(rasterizer.surface().is_none());
        assert!(!rasterizer.is_persistently_failing());

        rasterizer.request(page(0), viewport(1.0)).unwrap();
        assert_eq!(rasterizer.wait().unwrap(), RenderStatus::Failed { consecutive: 2 });
        assert!(rasterizer.is_persistently_failing());
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 2);

        rasterizer.request(page(1), viewport(1.0)).unwrap();
        assert_eq!(rasterizer.wait().unwrap(), RenderStatus::Failed { consecutive: 1 });
        assert!(!rasterizer.is_persistently_failing());
    }

    #[test]
    fn returning_to_displayed_page_clears_failure() {
        let mut rasterizer =
            PageRasterizer::new(Arc::new(PageOneFailsRenderer)).with_failure_threshold(1);

        rasterizer.request(page(0), viewport(1.0)).unwrap();
        assert_eq!(rasterizer.wait().unwrap(), RenderStatus::Ready);

        rasterizer.request(page(1), viewport(1.0)).unwrap();
        assert_eq!(rasterizer.wait().unwrap(), RenderStatus::Failed { consecutive: 1 });
        assert!(rasterizer.is_persistently_failing());

        rasterizer.request(page(0), viewport(1.0)).unwrap();
        assert_eq!(rasterizer.in_flight(), None);
        assert_eq!(rasterizer.status(), RenderStatus::Ready);
        assert!(!rasterizer.is_persistently_failing());
        assert_eq!(rasterizer.surface().map(|s| s.key.page), Some(page(0)));
    }

    #[test]
    fn returning_to_displayed_page_cancels_other_render() {
        let (_release, gate) = mpsc::channel();
        let mut rasterizer =
            PageRasterizer::new(Arc::new(GatedRenderer { gate: Mutex::new(gate) }));

        rasterizer.request(page(1), viewport(1.0)).unwrap();
        rasterizer.wait().unwrap();
        rasterizer.request(page(0), viewport(1.0)).unwrap();
        rasterizer.request(page(1), viewport(1.0)).unwrap();

        assert_eq!(rasterizer.in_flight(), None);
        assert_eq!(rasterizer.status(), RenderStatus::Ready);
    }

    #[test]
    fn panicked_worker_is_reported_by_poll() {
        let mut rasterizer = PageRasterizer::new(Arc::new(PanickingRenderer));

        rasterizer.request(page(0), viewport(1.0)).unwrap();

        assert_eq!(poll_until_settled(&mut rasterizer), RenderStatus::Failed { consecutive: 1 });
        assert_eq!(rasterizer.in_flight(), None);
        assert!(rasterizer.surface().is_none());
    }

    #[test]
    fn panicked_worker_is_reported_by_wait() {
        let mut rasterizer = PageRasterizer::new(Arc::new(PanickingRenderer));

        rasterizer.request(page(0), viewport(1.0)).unwrap();

        assert!(matches!(rasterizer.wait(), Err(RenderError::WorkerPanicked)));
        assert_eq!(rasterizer.status(), RenderStatus::Failed { consecutive: 1 });
    }

    #[test]
    fn poll_without_task_reports_idle() {
        let mut rasterizer = PageRasterizer::new(Arc::new(SolidRenderer));
        assert_eq!(rasterizer.poll(), RenderStatus::Idle);
        assert!(!rasterizer.is_persistently_failing());
    }
}
