use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use paperview_core::{DocumentViewer, PageState, ViewerConfig};
use paperview_render::PdfRenderFactory;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "paperview",
    version,
    about = "headless viewer for paginated PDF documents"
)]
struct Args {
    /// Path to the PDF document
    file: PathBuf,

    /// 1-based page to navigate to after opening
    #[arg(short = 'p', long = "page")]
    page: Option<u16>,

    /// Initial zoom scale, clamped to the supported range
    #[arg(long, default_value_t = 1.0)]
    scale: f32,

    /// Simulated viewport height in presentation pixels
    #[arg(long = "viewport", default_value_t = 900.0)]
    viewport: f32,

    /// Pre-render margin around the viewport, presentation pixels
    #[arg(long = "prefetch", default_value_t = 500.0)]
    prefetch: f32,

    /// Write every rendered page into this directory as PNG
    #[arg(short = 'o', long = "out")]
    out: Option<PathBuf>,

    /// Print the selectable text layer of each rendered page
    #[arg(long)]
    text: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let project_dirs = ProjectDirs::from("net", "paperview", "paperview")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    // The rendering backend is constructed once here and injected; the
    // viewer itself carries no process-wide configuration.
    let provider = Arc::new(PdfRenderFactory::new()?);
    let config = ViewerConfig {
        prefetch_margin: args.prefetch,
        ..ViewerConfig::default()
    };
    let mut viewer = DocumentViewer::new(provider, config);

    let source = args.file.to_string_lossy().into_owned();
    viewer
        .open(&source)
        .await
        .with_context(|| format!("failed to open {:?}", args.file))?;

    if let Some(info) = viewer.info() {
        let title = info.metadata.title.as_deref().unwrap_or("<untitled>");
        println!("{} ({} pages) {}", title, info.page_count, info.id);
    }

    viewer.set_scale(args.scale);
    viewer.set_viewport_extent(args.viewport);
    if let Some(page) = args.page {
        viewer.go_to_page(page);
    }
    viewer.drain_renders().await;

    if let Some(out) = &args.out {
        fs::create_dir_all(out)
            .with_context(|| format!("failed to create output directory {:?}", out))?;
    }

    for page in 1..=viewer.page_count() {
        let state = viewer.page_state(page);
        if !matches!(state, Some(PageState::Rendered { .. })) {
            continue;
        }

        if let Some(out) = &args.out {
            match viewer.rendered_raster(page) {
                Some(raster) => {
                    let image =
                        image::RgbaImage::from_raw(raster.width, raster.height, raster.pixels)
                            .ok_or_else(|| anyhow!("raster buffer mismatch on page {page}"))?;
                    let target = out.join(format!("page-{page:04}.png"));
                    image
                        .save(&target)
                        .with_context(|| format!("failed to write {:?}", target))?;
                    println!("wrote {}", target.display());
                }
                None => warn!(page, "page lost its raster before export"),
            }
        }

        if args.text {
            for span in viewer.overlay_spans(page) {
                println!(
                    "p{page} ({:.1},{:.1}) h{:.1} {}",
                    span.x, span.y, span.font_height, span.content
                );
            }
        }
    }

    for event in viewer.events().drain() {
        println!("{}", serde_json::to_string(&event)?);
    }

    viewer.close();
    Ok(())
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "paperview.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
