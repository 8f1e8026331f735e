use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use markup_model::Tool;
use overlay::SignatureFont;
use pdf_engine::{default_engine, LopdfEngine, OpenSource, PdfEngine, Point, Rotation};
use serde::{Deserialize, Serialize};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use storage::{Storage, ViewerConfig};
use viewer_core::{RenderStatus, SessionOptions, ViewerSession};

#[derive(Debug, Parser)]
#[command(name = "pagemark-cli")]
#[command(about = "Pagemark page rendering and annotation CLI")]
pub struct Cli {
    /// Enable debug logging on stderr.
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Read configuration from this file instead of the user config dir.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print machine-readable PDF metadata.
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Render one page to a PNG.
    Render {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long)]
        scale: Option<f32>,
        /// Clockwise degrees, a multiple of 90.
        #[arg(long, allow_hyphen_values = true)]
        rotation: Option<i32>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Replay a gesture script and report the resulting annotations.
    Annotate {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, value_name = "SCRIPT")]
        script: PathBuf,
        /// Also write the annotated page as a PNG.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    page_count: u32,
    pages: Vec<PageInfoOutput>,
    path: String,
}

#[derive(Debug, Serialize)]
struct PageInfoOutput {
    height_pt: f32,
    number: u32,
    rotation: u16,
    width_pt: f32,
}

#[derive(Debug, Serialize)]
struct AnnotateOutput {
    annotations: Vec<AnnotationOutput>,
    page: u32,
    rotation: u16,
    scale: f32,
}

#[derive(Debug, Serialize)]
struct AnnotationOutput {
    content: String,
    index: usize,
    kind: &'static str,
    page: u32,
    region: RegionOutput,
}

#[derive(Debug, Serialize)]
struct RegionOutput {
    height: f32,
    width: f32,
    x: f32,
    y: f32,
}

#[derive(Debug, Deserialize)]
struct GestureScript {
    events: Vec<ScriptEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ScriptEvent {
    Tool(Tool),
    PointerDown(ScriptPoint),
    PointerUp(ScriptPoint),
    Content(String),
    CancelContent,
    Undo,
    DeleteAt(usize),
    /// 1-based
    Page(u32),
    Scale(f32),
    Rotation(i32),
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct ScriptPoint {
    x: f32,
    y: f32,
}

impl From<ScriptPoint> for Point {
    fn from(value: ScriptPoint) -> Self {
        Point::new(value.x, value.y)
    }
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging(cli.verbose);

    match cli.command {
        Commands::Info { file } => run_info(&file),
        Commands::Render { file, page, scale, rotation, output } => {
            let config = load_config(cli.config.as_deref())?;
            run_render(&file, &config, page, scale, rotation, output.as_deref())
        }
        Commands::Annotate { file, script, output } => {
            let config = load_config(cli.config.as_deref())?;
            run_annotate(&file, &config, &script, output.as_deref())
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Warn };
    // A logger may already be installed when embedded; keep it.
    let _ = TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Never);
}

fn load_config(path: Option<&Path>) -> Result<ViewerConfig> {
    if let Some(path) = path {
        return ViewerConfig::load_from_path(path)
            .with_context(|| format!("failed to load config {}", path.display()));
    }

    match Storage::from_default_project() {
        Ok(storage) => storage
            .load_config()
            .with_context(|| format!("failed to load config {}", storage.config_path().display())),
        Err(error) => {
            log::debug!("using default config: {error}");
            Ok(ViewerConfig::default())
        }
    }
}

fn session_options(config: &ViewerConfig, with_font: bool) -> Result<SessionOptions> {
    let signature_font = match (&config.signature_font, with_font) {
        (_, false) => None,
        (Some(path), true) => Some(
            SignatureFont::from_path(path)
                .with_context(|| format!("failed to load signature font {}", path.display()))?,
        ),
        (None, true) => Some(SignatureFont::from_system()),
    };

    Ok(SessionOptions {
        scale: config.default_scale,
        rotation: Rotation::from_degrees(config.default_rotation)?,
        failure_threshold: config.render_failure_threshold,
        signature_font,
        signature_size: config.signature_font_size,
    })
}

fn run_info(file: &Path) -> Result<()> {
    ensure_pdf_exists(file)?;

    let mut engine = default_engine();
    let handle = engine.open(OpenSource::from(file)).context("failed to open PDF")?;

    let page_count = engine.page_count(handle)?;
    let pages = (0..page_count)
        .map(|index| -> Result<PageInfoOutput> {
            let geometry = engine.page_geometry(engine.page(handle, index)?)?;
            Ok(PageInfoOutput {
                height_pt: geometry.height_pt(),
                number: index + 1,
                rotation: geometry.rotation.degrees(),
                width_pt: geometry.width_pt(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let payload = InfoOutput { page_count, pages, path: file.display().to_string() };

    let json = serde_json::to_string_pretty(&payload)?;
    println!("{json}");

    engine.close(handle)?;

    Ok(())
}

fn open_session(file: &Path, options: SessionOptions) -> Result<ViewerSession<LopdfEngine>> {
    ensure_pdf_exists(file)?;

    let mut session = ViewerSession::new(default_engine(), options);
    session.open(OpenSource::from(file)).context("failed to open PDF")?;
    Ok(session)
}

fn run_render(
    file: &Path,
    config: &ViewerConfig,
    page: u32,
    scale: Option<f32>,
    rotation: Option<i32>,
    output: Option<&Path>,
) -> Result<()> {
    if page == 0 {
        anyhow::bail!("--page is 1-based and must be >= 1");
    }

    let mut session = open_session(file, session_options(config, false)?)?;
    let page_count = session.page_count().unwrap_or(0);
    if page > page_count {
        anyhow::bail!("page {page} out of range (page_count={page_count})");
    }

    session.set_page(page - 1)?;
    if let Some(scale) = scale {
        session.set_scale(scale)?;
    }
    if let Some(rotation) = rotation {
        session.set_rotation(Rotation::from_degrees(rotation)?)?;
    }

    let output =
        output.map(ToOwned::to_owned).unwrap_or_else(|| default_page_output(file, page));
    write_page_png(&mut session, &output)?;

    println!("{}", output.display());
    Ok(())
}

fn run_annotate(
    file: &Path,
    config: &ViewerConfig,
    script_path: &Path,
    output: Option<&Path>,
) -> Result<()> {
    let bytes = fs::read(script_path)
        .with_context(|| format!("failed to read script {}", script_path.display()))?;
    let script: GestureScript = serde_json::from_slice(&bytes)
        .with_context(|| format!("invalid gesture script {}", script_path.display()))?;

    let mut session = open_session(file, session_options(config, true)?)?;

    for (number, event) in script.events.into_iter().enumerate() {
        apply_event(&mut session, event)
            .with_context(|| format!("script event {} failed", number + 1))?;
    }

    let annotate = annotate_output(&mut session)?;

    if let Some(output) = output {
        write_page_png(&mut session, output)?;
    }

    let json = serde_json::to_string_pretty(&annotate)?;
    println!("{json}");
    Ok(())
}

fn apply_event(session: &mut ViewerSession<LopdfEngine>, event: ScriptEvent) -> Result<()> {
    log::debug!("script event {event:?}");

    match event {
        ScriptEvent::Tool(tool) => session.set_tool(tool),
        ScriptEvent::PointerDown(point) => {
            session.pointer_down(point.into());
        }
        ScriptEvent::PointerUp(point) => {
            session.pointer_up(point.into())?;
        }
        ScriptEvent::Content(text) => {
            if session.supply_content(Some(text)).is_none() {
                log::warn!("content supplied without a pending comment or signature");
            }
        }
        ScriptEvent::CancelContent => {
            session.cancel_content();
        }
        ScriptEvent::Undo => session.undo(),
        ScriptEvent::DeleteAt(index) => session.delete_at(index)?,
        ScriptEvent::Page(page) => {
            if page == 0 {
                anyhow::bail!("page numbers are 1-based");
            }
            session.set_page(page - 1)?;
        }
        ScriptEvent::Scale(scale) => session.set_scale(scale)?,
        ScriptEvent::Rotation(degrees) => session.set_rotation(Rotation::from_degrees(degrees)?)?,
    }

    Ok(())
}

fn annotate_output(session: &mut ViewerSession<LopdfEngine>) -> Result<AnnotateOutput> {
    let annotations: Vec<_> = session.annotations().iter().cloned().collect();

    let annotations = annotations
        .into_iter()
        .enumerate()
        .map(|(index, annotation)| -> Result<AnnotationOutput> {
            let viewport = session.page_viewport(annotation.page_index())?;
            let region = annotation.region_in(&viewport);
            Ok(AnnotationOutput {
                content: annotation.content().to_owned(),
                index,
                kind: annotation.kind().as_str(),
                page: annotation.page_index() + 1,
                region: RegionOutput {
                    height: region.height,
                    width: region.width,
                    x: region.x,
                    y: region.y,
                },
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(AnnotateOutput {
        annotations,
        page: session.current_page() + 1,
        rotation: session.rotation().degrees(),
        scale: session.scale(),
    })
}

fn write_page_png(session: &mut ViewerSession<LopdfEngine>, output: &Path) -> Result<()> {
    let status = session.wait_render().context("failed to render page")?;
    if let RenderStatus::Failed { consecutive } = status {
        anyhow::bail!("failed to render page ({consecutive} consecutive failures)");
    }

    let image = session.composite().context("failed to render page")?;

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }

    image
        .save(output)
        .with_context(|| format!("failed to write image to {}", output.display()))?;
    Ok(())
}

fn ensure_pdf_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }

    Ok(())
}

fn default_page_output(file: &Path, page: u32) -> PathBuf {
    let stem = file.file_stem().and_then(|name| name.to_str()).unwrap_or("page");

    file.with_file_name(format!("{stem}-page-{page}.png"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_events_use_documented_shape() {
        let script: GestureScript = serde_json::from_str(
            r#"{"events":[
                {"tool":"cursor"},
                {"pointer_down":{"x":50,"y":80}},
                {"pointer_up":{"x":120,"y":40}},
                {"content":"hello"},
                "cancel_content",
                "undo",
                {"delete_at":0},
                {"page":2},
                {"scale":1.5},
                {"rotation":-90}
            ]}"#,
        )
        .unwrap();

        assert_eq!(script.events.len(), 10);
        assert!(matches!(script.events[0], ScriptEvent::Tool(Tool::Select)));
        assert!(matches!(
            script.events[1],
            ScriptEvent::PointerDown(ScriptPoint { x, y }) if x == 50.0 && y == 80.0
        ));
        assert!(matches!(script.events[4], ScriptEvent::CancelContent));
        assert!(matches!(script.events[5], ScriptEvent::Undo));
        assert!(matches!(script.events[9], ScriptEvent::Rotation(-90)));
    }

    #[test]
    fn default_output_sits_next_to_input() {
        let output = default_page_output(Path::new("/docs/report.pdf"), 3);
        assert_eq!(output, PathBuf::from("/docs/report-page-3.png"));
    }

    #[test]
    fn config_is_mapped_to_session_options() {
        let config = ViewerConfig {
            default_scale: 2.0,
            default_rotation: 180,
            render_failure_threshold: 7,
            ..ViewerConfig::default()
        };

        let options = session_options(&config, false).unwrap();

        assert_eq!(options.scale, 2.0);
        assert_eq!(options.rotation, Rotation::Deg180);
        assert_eq!(options.failure_threshold, 7);
        assert!(options.signature_font.is_none());
    }

    #[test]
    fn annotate_always_has_a_signature_font() {
        let options = session_options(&ViewerConfig::default(), true).unwrap();
        assert!(options.signature_font.is_some());
    }
}
