//! Fixed-size overlapping text chunking
//!
//! Windows are measured in characters (Unicode scalar values), so a chunk
//! never splits a multi-byte character.

use crate::error::{BodhiError, Result};

/// Splits text into windows of `size` characters advancing by `size - overlap`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextChunker {
    size: usize,
    overlap: usize,
}

impl TextChunker {
    /// Create a chunker, rejecting windows that could never advance
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        if size == 0 {
            return Err(BodhiError::Validation(
                "Chunk size must be greater than 0".to_string(),
            ));
        }

        if overlap >= size {
            return Err(BodhiError::Validation(format!(
                "Chunk overlap ({}) must be smaller than chunk size ({})",
                overlap, size
            )));
        }

        Ok(Self { size, overlap })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Distance between the starts of two consecutive windows
    pub fn step(&self) -> usize {
        self.size - self.overlap
    }

    /// Iterate over the chunks of `text` in document order
    ///
    /// Calling this again on the same text yields the same sequence.
    pub fn chunks<'a>(&self, text: &'a str) -> Chunks<'a> {
        let mut boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        boundaries.push(text.len());

        Chunks {
            text,
            boundaries,
            start: 0,
            size: self.size,
            step: self.step(),
            done: text.is_empty(),
        }
    }

    /// Collect all chunks of `text` as owned strings
    pub fn split(&self, text: &str) -> Vec<String> {
        self.chunks(text).map(str::to_string).collect()
    }
}

/// Iterator over the overlapping windows of a text
pub struct Chunks<'a> {
    text: &'a str,
    /// Byte offset of every char start, plus the text length
    boundaries: Vec<usize>,
    start: usize,
    size: usize,
    step: usize,
    done: bool,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let char_count = self.boundaries.len() - 1;
        let end = (self.start + self.size).min(char_count);
        let chunk = &self.text[self.boundaries[self.start]..self.boundaries[end]];

        // The window that reaches the end of the text is the last one; any
        // later window would lie entirely inside it.
        if end == char_count {
            self.done = true;
        } else {
            self.start += self.step;
        }

        Some(chunk)
    }
}

/// Split `text` into chunks of at most `size` characters, with consecutive
/// chunks sharing exactly `overlap` characters.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Result<Vec<String>> {
    Ok(TextChunker::new(size, overlap)?.split(text))
}
