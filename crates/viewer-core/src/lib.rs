//! Viewer core: viewport resolution, background page rendering and the
//! session that ties rendering, gestures and the annotation overlay together.

mod rasterizer;
mod resolver;
mod session;

pub use rasterizer::{
    DisplaySurface, PageRasterizer, RenderError, RenderKey, RenderStatus, RenderTask,
    DEFAULT_FAILURE_THRESHOLD,
};
pub use resolver::{ViewportKey, ViewportResolver};
pub use session::{SessionError, SessionOptions, ViewerSession};
