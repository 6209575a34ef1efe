//! Row schemas for pizza-box text files.
//!
//! Every line is a whitespace-separated list of integers whose meaning and
//! numeric base are fixed per file type:
//!
//! | type tag                | fields                                       |
//! |-------------------------|----------------------------------------------|
//! | `PIZZABOX_ENC_FILE_TXT` | `ts_s ts_ns encoder index state` (all dec)   |
//! | `PIZZABOX_DI_FILE_TXT`  | `ts_s ts_ns encoder index di` (all dec)      |
//! | `PIZZABOX_AN_FILE_TXT`  | `ts_s ts_ns index` (dec), then `adc0 adc1 ..` (hex) |
//!
//! Analog files carry one hex value per ADC sharing the file; a reader picks
//! one of them by column.

use std::path::Path;

use flyer_core::{FlyerError, Result};
use serde::{Deserialize, Serialize};

/// Number of leading metadata fields in an analog row.
pub const ANALOG_VALUE_OFFSET: usize = 3;

/// Name and numeric base of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name
    pub name: &'static str,
    /// Radix the field is written in
    pub base: u32,
}

const fn dec(name: &'static str) -> FieldSpec {
    FieldSpec { name, base: 10 }
}

/// Encoder row layout.
pub const ENCODER_FIELDS: [FieldSpec; 5] = [
    dec("ts_s"),
    dec("ts_ns"),
    dec("encoder"),
    dec("index"),
    dec("state"),
];

/// Digital-input row layout.
pub const DIGITAL_INPUT_FIELDS: [FieldSpec; 5] = [
    dec("ts_s"),
    dec("ts_ns"),
    dec("encoder"),
    dec("index"),
    dec("di"),
];

/// Decoded analog row layout; `adc` is taken from the selected column.
pub const ANALOG_FIELDS: [FieldSpec; 4] = [
    dec("ts_s"),
    dec("ts_ns"),
    dec("index"),
    FieldSpec { name: "adc", base: 16 },
];

/// One encoder sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderRow {
    /// Timestamp seconds
    pub ts_s: i64,
    /// Timestamp nanoseconds
    pub ts_ns: i64,
    /// Encoder count
    pub encoder: i64,
    /// Sample index
    pub index: i64,
    /// Encoder state word
    pub state: i64,
}

/// One digital-input sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitalInputRow {
    /// Timestamp seconds
    pub ts_s: i64,
    /// Timestamp nanoseconds
    pub ts_ns: i64,
    /// Encoder count at the transition
    pub encoder: i64,
    /// Sample index
    pub index: i64,
    /// Input level
    pub di: i64,
}

/// One ADC sample for a single column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalogRow {
    /// Timestamp seconds
    pub ts_s: i64,
    /// Timestamp nanoseconds
    pub ts_ns: i64,
    /// Sample index
    pub index: i64,
    /// Raw ADC counts
    pub adc: i64,
}

/// A decoded row of any kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Row {
    /// Encoder row
    Encoder(EncoderRow),
    /// Digital-input row
    DigitalInput(DigitalInputRow),
    /// Analog row
    Analog(AnalogRow),
}

impl Row {
    /// Timestamp as `(seconds, nanoseconds)`.
    pub fn timestamp(&self) -> (i64, i64) {
        match self {
            Row::Encoder(r) => (r.ts_s, r.ts_ns),
            Row::DigitalInput(r) => (r.ts_s, r.ts_ns),
            Row::Analog(r) => (r.ts_s, r.ts_ns),
        }
    }
}

/// Parse one token in `spec.base`, accepting a `0x` prefix for hex fields.
pub fn parse_field(token: &str, spec: FieldSpec, path: &Path, line: usize) -> Result<i64> {
    let digits = if spec.base == 16 {
        token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token)
    } else {
        token
    };
    i64::from_str_radix(digits, spec.base).map_err(|_| FlyerError::Parse {
        path: path.to_path_buf(),
        line,
        field: spec.name,
        value: token.to_string(),
        base: spec.base,
    })
}

/// Split `text` on whitespace and check it has exactly `expected` fields.
fn exact_fields<'a>(text: &'a str, expected: usize, path: &Path, line: usize) -> Result<Vec<&'a str>> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() != expected {
        return Err(FlyerError::FieldCount {
            path: path.to_path_buf(),
            line,
            expected,
            found: tokens.len(),
        });
    }
    Ok(tokens)
}

fn parse_five(text: &str, fields: &[FieldSpec; 5], path: &Path, line: usize) -> Result<[i64; 5]> {
    let tokens = exact_fields(text, fields.len(), path, line)?;
    let mut values = [0i64; 5];
    for (slot, (token, spec)) in values.iter_mut().zip(tokens.iter().zip(fields)) {
        *slot = parse_field(token, *spec, path, line)?;
    }
    Ok(values)
}

/// Parse an encoder line. `line` is 1-based and only used in errors.
pub fn parse_encoder_line(text: &str, path: &Path, line: usize) -> Result<EncoderRow> {
    let [ts_s, ts_ns, encoder, index, state] = parse_five(text, &ENCODER_FIELDS, path, line)?;
    Ok(EncoderRow {
        ts_s,
        ts_ns,
        encoder,
        index,
        state,
    })
}

/// Parse a digital-input line.
pub fn parse_digital_input_line(text: &str, path: &Path, line: usize) -> Result<DigitalInputRow> {
    let [ts_s, ts_ns, encoder, index, di] = parse_five(text, &DIGITAL_INPUT_FIELDS, path, line)?;
    Ok(DigitalInputRow {
        ts_s,
        ts_ns,
        encoder,
        index,
        di,
    })
}

/// Parse an analog line, taking the ADC value from `column`.
pub fn parse_analog_line(text: &str, column: usize, path: &Path, line: usize) -> Result<AnalogRow> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let value_index = ANALOG_VALUE_OFFSET + column;
    if tokens.len() <= value_index {
        return Err(FlyerError::FieldCount {
            path: path.to_path_buf(),
            line,
            expected: value_index + 1,
            found: tokens.len(),
        });
    }
    let [ts_s, ts_ns, index, adc_spec] = ANALOG_FIELDS;
    Ok(AnalogRow {
        ts_s: parse_field(tokens[0], ts_s, path, line)?,
        ts_ns: parse_field(tokens[1], ts_ns, path, line)?,
        index: parse_field(tokens[2], index, path, line)?,
        adc: parse_field(tokens[value_index], adc_spec, path, line)?,
    })
}

/// Format an encoder row as the hardware writes it.
pub fn format_encoder_line(row: &EncoderRow) -> String {
    format!(
        "{} {} {} {} {}",
        row.ts_s, row.ts_ns, row.encoder, row.index, row.state
    )
}

/// Format a digital-input row as the hardware writes it.
pub fn format_digital_input_line(row: &DigitalInputRow) -> String {
    format!("{} {} {} {} {}", row.ts_s, row.ts_ns, row.encoder, row.index, row.di)
}

/// Format an analog line with one hex value per column.
pub fn format_analog_line(ts_s: i64, ts_ns: i64, index: i64, values: &[i64]) -> String {
    let mut line = format!("{} {} {}", ts_s, ts_ns, index);
    for value in values {
        line.push_str(&format!(" {:08x}", value));
    }
    line
}
