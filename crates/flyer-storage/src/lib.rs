//! Reading pizza-box files back.
//!
//! Channels only register *references* to the files their hardware writes.
//! This crate turns those references into rows:
//!
//! - [`rows`] - per-kind row layouts and line parsing
//! - [`reader`] - eager, chunk-addressed readers plus line counting
//! - [`handlers`] - the type-tag to reader registry
//! - [`resolver`] - datum id to rows, through a registrar

pub mod handlers;
pub mod reader;
pub mod resolver;
pub mod rows;

pub use handlers::{HandlerRegistry, ReaderFactory};
pub use reader::{
    count_lines, count_lines_async, AnalogReader, ChunkReader, DigitalInputReader, EncoderReader,
};
pub use resolver::DatumResolver;
pub use rows::{AnalogRow, DigitalInputRow, EncoderRow, Row};
