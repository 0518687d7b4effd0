use std::env;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use paperview_core::{
    document_id_for_source, CancelFlag, DocumentInfo, DocumentMetadata, DocumentProvider,
    PageSize, RasterImage, RenderBackend, RenderError, RenderOutcome, TextRun, Transform,
    Viewport,
};
use pdfium_render::prelude::*;
use tracing::{instrument, warn};

const LIBRARY_PATH_VAR: &str = "PAPERVIEW_PDFIUM_LIBRARY_PATH";

pub struct PdfiumRenderFactory {
    pdfium: Arc<Pdfium>,
}

impl PdfiumRenderFactory {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_env() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

#[async_trait]
impl DocumentProvider for PdfiumRenderFactory {
    async fn open(&self, source: &str) -> Result<Arc<dyn RenderBackend>, RenderError> {
        let path = Path::new(source)
            .canonicalize()
            .map_err(|err| RenderError::Load(format!("cannot resolve {source}: {err}")))?;
        let (info, sizes) = inspect_document(&self.pdfium, &path, source)?;
        Ok(Arc::new(PdfiumBackend::new(
            Arc::clone(&self.pdfium),
            path,
            info,
            sizes,
        )))
    }
}

struct PdfiumBackend {
    // Declared before `pdfium` so the cached document drops first; its
    // borrow of the bindings must not outlive them.
    document: Mutex<Option<PdfDocument<'static>>>,
    pdfium: Arc<Pdfium>,
    path: PathBuf,
    info: DocumentInfo,
    sizes: Vec<PageSize>,
}

impl PdfiumBackend {
    fn new(pdfium: Arc<Pdfium>, path: PathBuf, info: DocumentInfo, sizes: Vec<PageSize>) -> Self {
        Self {
            document: Mutex::new(None),
            pdfium,
            path,
            info,
            sizes,
        }
    }

    fn open_document(&self) -> Result<PdfDocument<'static>, RenderError> {
        let document = self
            .pdfium
            .load_pdf_from_file(&self.path, None)
            .map_err(|err| RenderError::Load(format!("cannot open {:?}: {err}", self.path)))?;
        // SAFETY: the document borrows the Pdfium bindings held in
        // self.pdfium. It is stored in self.document, which is declared
        // before self.pdfium and therefore dropped first, so the
        // erased lifetime never outlives the bindings it points into.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        Ok(document)
    }

    fn with_document<R, F>(&self, f: F) -> Result<R, RenderError>
    where
        F: FnOnce(&PdfDocument<'static>) -> Result<R, RenderError>,
    {
        let mut guard = self.document.lock();
        if guard.is_none() {
            *guard = Some(self.open_document()?);
        }
        let document = guard.as_ref().expect("document must be loaded");
        f(document)
    }

    fn rasterize(
        &self,
        document: &PdfDocument<'static>,
        number: u16,
        viewport: &Viewport,
    ) -> Result<RasterImage, RenderError> {
        let page = get_page(document, number)?;
        let config = PdfRenderConfig::new().scale_page_by_factor(viewport.scale.max(0.1));
        let bitmap = page.render_with_config(&config).map_err(|err| {
            RenderError::Raster {
                page: number,
                reason: err.to_string(),
            }
        })?;
        let image = bitmap.as_image().to_rgba8();
        let (width, height) = (image.width(), image.height());
        Ok(RasterImage {
            width,
            height,
            pixels: image.into_raw(),
        })
    }
}

#[async_trait]
impl RenderBackend for PdfiumBackend {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    fn page_sizes(&self) -> &[PageSize] {
        &self.sizes
    }

    #[instrument(skip(self, viewport, cancel), fields(scale = viewport.scale))]
    async fn render_page(
        &self,
        page: u16,
        viewport: &Viewport,
        cancel: &CancelFlag,
    ) -> RenderOutcome {
        if cancel.is_cancelled() {
            return RenderOutcome::Cancelled;
        }

        let result = self.with_document(|document| self.rasterize(document, page, viewport));

        // Pdfium cannot abort a raster mid-flight; a cancellation that
        // arrived while it ran discards the finished bitmap here.
        if cancel.is_cancelled() {
            return RenderOutcome::Cancelled;
        }

        match result {
            Ok(image) => RenderOutcome::Completed(image),
            Err(err) => RenderOutcome::Failed(err),
        }
    }

    #[instrument(skip(self))]
    async fn text_runs(&self, page: u16) -> Result<Vec<TextRun>, RenderError> {
        self.with_document(|document| {
            let pdf_page = get_page(document, page)?;
            let mut runs = Vec::new();
            for object in pdf_page.objects().iter() {
                let Some(text_object) = object.as_text_object() else {
                    continue;
                };
                let content = text_object.text();
                if content.is_empty() {
                    continue;
                }
                let matrix = match text_object.matrix() {
                    Ok(matrix) => matrix,
                    Err(err) => {
                        warn!(
                            page,
                            error = %err,
                            path = %self.path.display(),
                            "skipping text object without a resolvable matrix"
                        );
                        continue;
                    }
                };
                // The object matrix positions the run; glyph extent
                // comes from the font size, so the basis vectors are
                // pre-multiplied by it.
                let size = text_object.unscaled_font_size().value;
                let family = text_object.font().family();
                runs.push(TextRun {
                    content,
                    transform: Transform {
                        a: matrix.a() * size,
                        b: matrix.b() * size,
                        c: matrix.c() * size,
                        d: matrix.d() * size,
                        e: matrix.e(),
                        f: matrix.f(),
                    },
                    font_family: (!family.is_empty()).then_some(family),
                });
            }
            Ok(runs)
        })
    }
}

fn get_page<'a>(
    document: &'a PdfDocument<'static>,
    number: u16,
) -> Result<PdfPage<'a>, RenderError> {
    let index = number.checked_sub(1).ok_or_else(|| RenderError::Raster {
        page: number,
        reason: "page numbers start at 1".to_string(),
    })?;
    document
        .pages()
        .get(index)
        .map_err(|err| RenderError::Raster {
            page: number,
            reason: format!("page out of range: {err}"),
        })
}

fn inspect_document(
    pdfium: &Pdfium,
    path: &Path,
    source: &str,
) -> Result<(DocumentInfo, Vec<PageSize>), RenderError> {
    let document = pdfium
        .load_pdf_from_file(path, None)
        .map_err(|err| RenderError::Load(format!("cannot open {:?}: {err}", path)))?;

    let mut sizes = Vec::with_capacity(document.pages().len() as usize);
    for page in document.pages().iter() {
        sizes.push(PageSize::new(page.width().value, page.height().value));
    }

    let metadata = document.metadata();
    let title = metadata
        .get(PdfDocumentMetadataTagType::Title)
        .map(|tag| tag.value().to_owned());
    let author = metadata
        .get(PdfDocumentMetadataTagType::Author)
        .map(|tag| tag.value().to_owned());
    let keywords = metadata
        .get(PdfDocumentMetadataTagType::Keywords)
        .map(|tag| {
            tag.value()
                .split(',')
                .map(|keyword| keyword.trim().to_owned())
                .collect()
        })
        .unwrap_or_else(Vec::new);

    let info = DocumentInfo {
        id: document_id_for_source(source),
        source: source.to_owned(),
        page_count: sizes.len() as u16,
        metadata: DocumentMetadata {
            title,
            author,
            keywords,
        },
    };
    Ok((info, sizes))
}

fn bind_pdfium_from_env() -> Option<Pdfium> {
    match env::var(LIBRARY_PATH_VAR) {
        Ok(path) if !path.is_empty() => match Pdfium::bind_to_library(&path) {
            Ok(bindings) => Some(Pdfium::new(bindings)),
            Err(err) => {
                warn!("failed to load Pdfium from {LIBRARY_PATH_VAR}={path}: {err}");
                None
            }
        },
        _ => None,
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("{}: {}", cwd_path.display(), err));
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; ensure it is installed ({})",
                errors.join(", ")
            ))
        }
    }
}

pub type PdfRenderFactory = PdfiumRenderFactory;
