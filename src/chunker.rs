//! Troceado de texto en ventanas de tamaño fijo con solapamiento.
//!
//! Las longitudes se miden en caracteres (valores escalares Unicode), nunca
//! en bytes, para no partir un carácter multibyte.

use crate::{
    error::{RagError, Result},
    models::Chunk,
};

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    /// Valida la configuración: `chunk_size > 0` y `overlap < chunk_size`.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::Config("chunk_size debe ser mayor que 0".to_string()));
        }
        if overlap >= chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({overlap}) debe ser menor que chunk_size ({chunk_size})"
            )));
        }
        Ok(Self { chunk_size, overlap })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Parte `text` en chunks consecutivos que se solapan exactamente en
    /// `overlap` caracteres. El último chunk es el primero que alcanza el
    /// final del texto y puede ser más corto.
    pub fn chunk(&self, text: &str, source: &str) -> Vec<Chunk> {
        self.split(text)
            .into_iter()
            .enumerate()
            .map(|(index, piece)| Chunk::new(source, index, piece.to_string()))
            .collect()
    }

    /// Ventanas de texto sin envolver en `Chunk`.
    pub fn split<'a>(&self, text: &'a str) -> Vec<&'a str> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        // Offsets en bytes de cada carácter, más el final del texto.
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(offset, _)| offset)
            .chain(std::iter::once(text.len()))
            .collect();
        let total_chars = boundaries.len() - 1;
        let step = self.chunk_size - self.overlap;

        let mut pieces = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + self.chunk_size).min(total_chars);
            pieces.push(&text[boundaries[start]..boundaries[end]]);
            if end == total_chars {
                break;
            }
            start += step;
        }
        pieces
    }
}
