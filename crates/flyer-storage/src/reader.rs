//! Chunked readers for pizza-box text files.
//!
//! A reader loads every line of its file once, at construction, and then
//! serves rows by chunk index: chunk `i` covers lines `[i*cs, (i+1)*cs)`.
//! The last chunk may be short; a chunk past the end of the file is empty.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use flyer_core::kind::{ANALOG_TYPE_TAG, DIGITAL_INPUT_TYPE_TAG, ENCODER_TYPE_TAG};
use flyer_core::{chunk_count, FlyerError, Result};
use tracing::debug;

use crate::rows::{parse_analog_line, parse_digital_input_line, parse_encoder_line, Row};

/// Serves decoded rows of one file, chunk by chunk.
pub trait ChunkReader: Send + Sync {
    /// Type tag this reader decodes.
    fn type_tag(&self) -> &'static str;

    /// File being read.
    fn path(&self) -> &Path;

    /// Rows per chunk.
    fn chunk_size(&self) -> usize;

    /// Lines loaded from the file.
    fn line_count(&self) -> usize;

    /// Number of chunks covering the file.
    fn chunk_count(&self) -> usize {
        chunk_count(self.line_count(), self.chunk_size())
    }

    /// Decode chunk `chunk`.
    ///
    /// `column` selects the value column of multi-column files; single-column
    /// readers accept only `None` or `Some(0)`.
    fn read(&self, chunk: usize, column: Option<usize>) -> Result<Vec<Row>>;
}

/// Count lines in `path` the way the readers split them.
///
/// A trailing line without a newline counts; a trailing newline does not
/// start a new line.
pub fn count_lines(path: &Path) -> std::io::Result<usize> {
    let reader = BufReader::new(File::open(path)?);
    let mut count = 0;
    for segment in reader.split(b'\n') {
        segment?;
        count += 1;
    }
    Ok(count)
}

/// [`count_lines`] on the blocking thread pool.
pub async fn count_lines_async(path: PathBuf) -> Result<usize> {
    tokio::task::spawn_blocking(move || count_lines(&path))
        .await
        .map_err(|e| FlyerError::Join(e.to_string()))?
        .map_err(FlyerError::from)
}

/// All lines of a file plus its chunking.
#[derive(Debug, Clone)]
struct LoadedLines {
    path: PathBuf,
    chunk_size: usize,
    lines: Vec<String>,
}

impl LoadedLines {
    fn load(path: &Path, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(FlyerError::Configuration(format!(
                "chunk_size must be greater than 0 for {}",
                path.display()
            )));
        }
        let reader = BufReader::new(File::open(path)?);
        let lines = reader.lines().collect::<std::io::Result<Vec<String>>>()?;
        debug!(path = %path.display(), lines = lines.len(), chunk_size, "Loaded chunked file");
        Ok(Self {
            path: path.to_path_buf(),
            chunk_size,
            lines,
        })
    }

    /// Lines of `chunk` with their 1-based line numbers.
    fn chunk(&self, chunk: usize) -> impl Iterator<Item = (usize, &str)> {
        let start = chunk.saturating_mul(self.chunk_size).min(self.lines.len());
        let end = start.saturating_add(self.chunk_size).min(self.lines.len());
        self.lines[start..end]
            .iter()
            .enumerate()
            .map(move |(offset, text)| (start + offset + 1, text.as_str()))
    }
}

fn single_column(type_tag: &'static str, column: Option<usize>) -> Result<()> {
    match column {
        None | Some(0) => Ok(()),
        Some(column) => Err(FlyerError::ColumnOutOfRange { type_tag, column }),
    }
}

macro_rules! impl_common {
    () => {
        fn path(&self) -> &Path {
            &self.file.path
        }

        fn chunk_size(&self) -> usize {
            self.file.chunk_size
        }

        fn line_count(&self) -> usize {
            self.file.lines.len()
        }
    };
}

/// Reader for `PIZZABOX_ENC_FILE_TXT` files.
#[derive(Debug, Clone)]
pub struct EncoderReader {
    file: LoadedLines,
}

impl EncoderReader {
    /// Load `path`.
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self> {
        Ok(Self {
            file: LoadedLines::load(path, chunk_size)?,
        })
    }
}

impl ChunkReader for EncoderReader {
    fn type_tag(&self) -> &'static str {
        ENCODER_TYPE_TAG
    }

    impl_common!();

    fn read(&self, chunk: usize, column: Option<usize>) -> Result<Vec<Row>> {
        single_column(ENCODER_TYPE_TAG, column)?;
        self.file
            .chunk(chunk)
            .map(|(line, text)| parse_encoder_line(text, &self.file.path, line).map(Row::Encoder))
            .collect()
    }
}

/// Reader for `PIZZABOX_DI_FILE_TXT` files.
#[derive(Debug, Clone)]
pub struct DigitalInputReader {
    file: LoadedLines,
}

impl DigitalInputReader {
    /// Load `path`.
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self> {
        Ok(Self {
            file: LoadedLines::load(path, chunk_size)?,
        })
    }
}

impl ChunkReader for DigitalInputReader {
    fn type_tag(&self) -> &'static str {
        DIGITAL_INPUT_TYPE_TAG
    }

    impl_common!();

    fn read(&self, chunk: usize, column: Option<usize>) -> Result<Vec<Row>> {
        single_column(DIGITAL_INPUT_TYPE_TAG, column)?;
        self.file
            .chunk(chunk)
            .map(|(line, text)| parse_digital_input_line(text, &self.file.path, line).map(Row::DigitalInput))
            .collect()
    }
}

/// Reader for `PIZZABOX_AN_FILE_TXT` files.
///
/// Values live at field `3 + column`; `None` reads column 0.
#[derive(Debug, Clone)]
pub struct AnalogReader {
    file: LoadedLines,
}

impl AnalogReader {
    /// Load `path`.
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self> {
        Ok(Self {
            file: LoadedLines::load(path, chunk_size)?,
        })
    }

    /// Number of value columns on the first line, if any.
    pub fn column_count(&self) -> Option<usize> {
        self.file.lines.first().map(|first| {
            first
                .split_whitespace()
                .count()
                .saturating_sub(crate::rows::ANALOG_VALUE_OFFSET)
        })
    }
}

impl ChunkReader for AnalogReader {
    fn type_tag(&self) -> &'static str {
        ANALOG_TYPE_TAG
    }

    impl_common!();

    fn read(&self, chunk: usize, column: Option<usize>) -> Result<Vec<Row>> {
        let column = column.unwrap_or(0);
        self.file
            .chunk(chunk)
            .map(|(line, text)| parse_analog_line(text, column, &self.file.path, line).map(Row::Analog))
            .collect()
    }
}
