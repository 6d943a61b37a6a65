//! Precomputed reference embeddings.
//!
//! On disk a gallery is a little-endian `u32` row length followed by the
//! row-major `f32` matrix, also little-endian.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("failed to read gallery {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("gallery {path} is malformed: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("gallery rows must all have length {dim}")]
    RaggedRows { dim: usize },
}

/// Reference embedding matrix with per-row norms precomputed.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceGallery {
    dim: usize,
    rows: Vec<f32>,
    norms: Vec<f32>,
}

impl ReferenceGallery {
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self, GalleryError> {
        let dim = rows.first().map(Vec::len).unwrap_or(0);
        if dim == 0 || rows.iter().any(|r| r.len() != dim) {
            return Err(GalleryError::RaggedRows { dim });
        }
        Ok(Self::from_flat(dim, rows.into_iter().flatten().collect()))
    }

    fn from_flat(dim: usize, rows: Vec<f32>) -> Self {
        let norms = rows.chunks_exact(dim).map(norm).collect();
        Self { dim, rows, norms }
    }

    pub fn load(path: &Path) -> Result<Self, GalleryError> {
        let io_err = |source| GalleryError::Io {
            path: path.to_path_buf(),
            source,
        };
        let malformed = |message: String| GalleryError::Malformed {
            path: path.to_path_buf(),
            message,
        };

        let mut file = std::fs::File::open(path).map_err(io_err)?;
        let total = file.metadata().map_err(io_err)?.len() as usize;

        let mut header = [0u8; 4];
        file.read_exact(&mut header).map_err(io_err)?;
        let dim = u32::from_le_bytes(header) as usize;
        if dim == 0 {
            return Err(malformed("row length is zero".into()));
        }

        let body = total - header.len();
        let row_bytes = dim * std::mem::size_of::<f32>();
        if body == 0 || body % row_bytes != 0 {
            return Err(malformed(format!(
                "{body} payload bytes is not a whole number of {dim}-wide rows"
            )));
        }

        let mut rows = vec![0f32; body / std::mem::size_of::<f32>()];
        file.read_exact(bytemuck::cast_slice_mut(&mut rows))
            .map_err(io_err)?;
        for value in &mut rows {
            *value = f32::from_bits(u32::from_le(value.to_bits()));
        }

        Ok(Self::from_flat(dim, rows))
    }

    pub fn save(&self, path: &Path) -> Result<(), GalleryError> {
        let io_err = |source| GalleryError::Io {
            path: path.to_path_buf(),
            source,
        };
        let le: Vec<f32> = self
            .rows
            .iter()
            .map(|v| f32::from_bits(v.to_bits().to_le()))
            .collect();

        let mut file = std::fs::File::create(path).map_err(io_err)?;
        file.write_all(&(self.dim as u32).to_le_bytes())
            .map_err(io_err)?;
        file.write_all(bytemuck::cast_slice(&le)).map_err(io_err)?;
        Ok(())
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.norms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.norms.is_empty()
    }

    /// Highest cosine similarity between `query` and any row, or `None` if
    /// the dimensions disagree.
    pub fn max_similarity(&self, query: &[f32]) -> Option<f32> {
        if query.len() != self.dim || self.is_empty() {
            return None;
        }
        let query_norm = norm(query);
        self.rows
            .chunks_exact(self.dim)
            .zip(&self.norms)
            .map(|(row, row_norm)| cosine(query, query_norm, row, *row_norm))
            .reduce(f32::max)
    }
}

/// Cosine similarity in `[-1, 1]`; zero vectors score `0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    cosine(a, norm(a), b, norm(b))
}

fn cosine(a: &[f32], a_norm: f32, b: &[f32], b_norm: f32) -> f32 {
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    (dot / (a_norm * b_norm)).clamp(-1.0, 1.0)
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}
