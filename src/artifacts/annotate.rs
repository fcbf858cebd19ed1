use std::path::Path;

use image::{ImageFormat, Rgba};
use imageproc::drawing::draw_filled_circle_mut;
use tempfile::Builder;
use tracing::debug;

use crate::error::{ExplorerError, Result};
use crate::trace::trace::ClickPoint;

/// Overlays a click marker on a screenshot.
///
/// Implementations write the annotated image to `dest`; they never touch `source`.
pub trait Annotator: Send + Sync {
    fn annotate(&self, source: &Path, point: ClickPoint, dest: &Path) -> Result<()>;
}

/// Red filled circle centered on the click point.
#[derive(Debug, Clone)]
pub struct MarkerAnnotator {
    pub radius: i32,
    pub color: [u8; 4],
}

impl Default for MarkerAnnotator {
    fn default() -> Self {
        Self {
            radius: 10,
            color: [255, 0, 0, 255],
        }
    }
}

impl Annotator for MarkerAnnotator {
    fn annotate(&self, source: &Path, point: ClickPoint, dest: &Path) -> Result<()> {
        let failed = |reason: String| ExplorerError::Annotation {
            path: source.to_path_buf(),
            reason,
        };

        let mut canvas = image::open(source)
            .map_err(|e| failed(format!("decode: {}", e)))?
            .to_rgba8();

        draw_filled_circle_mut(
            &mut canvas,
            (point.x as i32, point.y as i32),
            self.radius,
            Rgba(self.color),
        );

        canvas
            .save_with_format(dest, ImageFormat::Png)
            .map_err(|e| failed(format!("encode: {}", e)))
    }
}

/// Annotate `artifact` in place.
///
/// The annotator writes into a temp file beside the artifact, which is then renamed
/// over it, so readers only ever see the raw or the fully annotated image.
pub fn annotate_in_place(annotator: &dyn Annotator, artifact: &Path, point: ClickPoint) -> Result<()> {
    let dir = artifact.parent().unwrap_or_else(|| Path::new("."));
    let tmp = Builder::new()
        .prefix(".annotate")
        .suffix(".png")
        .tempfile_in(dir)
        .map_err(|e| ExplorerError::Annotation {
            path: artifact.to_path_buf(),
            reason: format!("temp file: {}", e),
        })?;

    annotator.annotate(artifact, point, tmp.path())?;

    tmp.persist(artifact).map_err(|e| ExplorerError::Annotation {
        path: artifact.to_path_buf(),
        reason: format!("replace: {}", e.error),
    })?;

    debug!(path = %artifact.display(), x = point.x, y = point.y, "annotated screenshot");
    Ok(())
}
