//! Contextual hints attached to successful results.

use crate::download::BatchStats;
use crate::walk::{FileCategory, FileEntry};

use super::format::format_size;

const LARGE_FILE: u64 = 5 * 1024 * 1024 * 1024;
const HUGE_TOTAL: u64 = 20 * 1024 * 1024 * 1024;
const MANY_FILES: usize = 100;
const MANY_LFS_FILES: usize = 10;

/// Model format recognised from its key files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Transformers,
    Diffusers,
    Gguf,
    Onnx,
    TensorFlow,
}

impl ModelKind {
    const ALL: [Self; 5] = [
        Self::Transformers,
        Self::Diffusers,
        Self::Gguf,
        Self::Onnx,
        Self::TensorFlow,
    ];

    fn markers(self) -> &'static [&'static str] {
        match self {
            Self::Transformers => &["pytorch_model.bin", "model.safetensors", "config.json"],
            Self::Diffusers => &["model_index.json", "unet/diffusion_pytorch_model.bin"],
            Self::Gguf => &[".gguf", ".ggml"],
            Self::Onnx => &[".onnx"],
            Self::TensorFlow => &["saved_model.pb", ".h5", ".tflite"],
        }
    }

    /// First kind, in a fixed priority order, with a marker among `files`.
    #[must_use]
    pub fn detect(files: &[FileEntry]) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| {
            kind.markers()
                .iter()
                .any(|marker| files.iter().any(|f| f.path.contains(marker)))
        })
    }

    fn hint(self) -> &'static str {
        match self {
            Self::Transformers => {
                "Detected a Transformers model: load it with AutoModel.from_pretrained and keep config.json and tokenizer files together"
            }
            Self::Diffusers => {
                "Detected a Diffusers pipeline: download every component directory (unet, vae, text_encoder)"
            }
            Self::Gguf => {
                "Detected a GGUF/GGML quantized model: pick one quantization (e.g. Q4_K_M) with an include pattern"
            }
            Self::Onnx => "Detected an ONNX model: load it with ONNX Runtime",
            Self::TensorFlow => "Detected a TensorFlow model: check TF1/TF2 compatibility before loading",
        }
    }
}

/// Hints for a list or explore result.
#[must_use]
pub fn for_listing(files: &[FileEntry], truncated: bool, has_include: bool) -> Vec<String> {
    let mut hints = Vec::new();

    if let Some(kind) = ModelKind::detect(files) {
        hints.push(kind.hint().to_string());
    }

    let large = files
        .iter()
        .filter(|f| f.size.is_some_and(|s| s > LARGE_FILE))
        .count();
    if large > 0 {
        hints.push(format!(
            "{large} file(s) larger than 5 GB: interrupted downloads resume from their .part files"
        ));
    }

    let total: u64 = files.iter().filter_map(|f| f.size).sum();
    if total > HUGE_TOTAL {
        hints.push(format!(
            "Selection totals {}: narrow it with include patterns such as \"*.safetensors\"",
            format_size(total)
        ));
    }

    if !has_include && files.len() > MANY_FILES {
        hints.push("Many files matched: filter with an include pattern, e.g. \"*.safetensors\"".to_string());
    }

    if truncated {
        hints.push(format!(
            "Results were truncated after {} files: raise max_files or narrow path",
            files.len()
        ));
    }

    let lfs = files.iter().filter(|f| f.lfs).count();
    if lfs >= MANY_LFS_FILES {
        hints.push(format!(
            "{lfs} files are stored with Git LFS: make sure there is enough disk space before downloading"
        ));
    }

    let has_models = files.iter().any(|f| FileCategory::of(&f.path) == FileCategory::Models);
    if !has_models && !files.is_empty() && !has_include {
        hints.push(format!(
            "No model weights among the listed files: try the '{}' category or a deeper max_depth",
            FileCategory::Models
        ));
    }

    dedup(hints)
}

/// Hints for a finished download batch.
#[must_use]
pub fn for_download(stats: &BatchStats) -> Vec<String> {
    let mut hints = Vec::new();
    if stats.failed > 0 {
        hints.push(format!(
            "{} file(s) failed: run the same download again to resume them",
            stats.failed
        ));
    }
    if stats.skipped > 0 {
        hints.push(format!(
            "{} file(s) already present were skipped: use force to download them again",
            stats.skipped
        ));
    }
    if stats.interrupted {
        hints.push("Download was interrupted: partial files were kept and will resume".to_string());
    }
    hints
}

fn dedup(hints: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(hints.len());
    for hint in hints {
        if !unique.contains(&hint) {
            unique.push(hint);
        }
    }
    unique
}
