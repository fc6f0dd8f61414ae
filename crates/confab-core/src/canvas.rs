//! Canvas display policy.
//!
//! The canvas is the display channel for rendered artifacts, distinct from
//! chat prose. Which files are canvas-displayable is decided here and only
//! here; storage, executor, and frontend-facing code all consult this table.

use serde::{Deserialize, Serialize};

/// Viewer kind the canvas uses for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanvasViewer {
    Image,
    Pdf,
    Html,
    Markdown,
    Code,
    Csv,
    Json,
    Text,
}

/// File extension (lowercased, no dot) of a filename, if any.
pub fn file_extension(filename: &str) -> Option<String> {
    let name = filename.rsplit('/').next().unwrap_or(filename);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Viewer for a filename, or `None` when the file is not canvas-displayable.
pub fn viewer_for(filename: &str) -> Option<CanvasViewer> {
    let ext = file_extension(filename)?;
    let viewer = match ext.as_str() {
        "png" | "jpg" | "jpeg" | "gif" | "webp" | "svg" | "bmp" => CanvasViewer::Image,
        "pdf" => CanvasViewer::Pdf,
        "html" | "htm" => CanvasViewer::Html,
        "md" | "markdown" => CanvasViewer::Markdown,
        "py" | "rs" | "js" | "ts" | "sh" | "sql" | "yaml" | "yml" | "toml" => CanvasViewer::Code,
        "csv" | "tsv" => CanvasViewer::Csv,
        "json" => CanvasViewer::Json,
        "txt" | "log" => CanvasViewer::Text,
        _ => return None,
    };
    Some(viewer)
}

pub fn is_canvas_displayable(filename: &str) -> bool {
    viewer_for(filename).is_some()
}
