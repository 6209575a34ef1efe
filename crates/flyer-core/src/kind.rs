//! Channel kinds and their fixed on-disk metadata.
//!
//! Every kind of pizza-box channel writes one flat text file per arm cycle.
//! The file's type tag, filename prefix, descriptor source and row width are
//! fixed here, at definition time, and are never discovered from the file.

use serde::{Deserialize, Serialize};

/// Type tag registered for encoder files.
pub const ENCODER_TYPE_TAG: &str = "PIZZABOX_ENC_FILE_TXT";
/// Type tag registered for digital-input files.
pub const DIGITAL_INPUT_TYPE_TAG: &str = "PIZZABOX_DI_FILE_TXT";
/// Type tag registered for analog (ADC) files.
pub const ANALOG_TYPE_TAG: &str = "PIZZABOX_AN_FILE_TXT";

/// The kind of data a channel streams to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Encoder positions: `ts_s ts_ns encoder index state`
    Encoder,
    /// Digital-input states: `ts_s ts_ns encoder index di`
    DigitalInput,
    /// ADC readings: `ts_s ts_ns index adc0 [adc1 ...]`, values in hex
    Analog,
}

impl ChannelKind {
    /// Resource type tag used for registration and handler lookup.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Encoder => ENCODER_TYPE_TAG,
            Self::DigitalInput => DIGITAL_INPUT_TYPE_TAG,
            Self::Analog => ANALOG_TYPE_TAG,
        }
    }

    /// Short filename prefix, followed by six hex characters.
    pub fn file_prefix(&self) -> &'static str {
        match self {
            Self::Encoder => "en_",
            Self::DigitalInput => "di_",
            Self::Analog => "an_",
        }
    }

    /// `source` string reported in the describe payload.
    pub fn source(&self) -> &'static str {
        match self {
            Self::Encoder => "pizzabox-enc-file",
            Self::DigitalInput => "pizzabox-di-file",
            Self::Analog => "pizzabox-adc-file",
        }
    }

    /// Number of fields in one decoded row.
    pub fn field_count(&self) -> usize {
        match self {
            Self::Encoder | Self::DigitalInput => 5,
            Self::Analog => 4,
        }
    }

    /// Suffix of the PV that suppresses writes to the file.
    pub fn suppress_suffix(&self) -> &'static str {
        match self {
            Self::Encoder | Self::DigitalInput => "Ignore-Sel",
            Self::Analog => "Ena-Sel",
        }
    }

    /// Look up a kind by its resource type tag.
    pub fn from_type_tag(tag: &str) -> Option<Self> {
        match tag {
            ENCODER_TYPE_TAG => Some(Self::Encoder),
            DIGITAL_INPUT_TYPE_TAG => Some(Self::DigitalInput),
            ANALOG_TYPE_TAG => Some(Self::Analog),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Encoder => "encoder",
            Self::DigitalInput => "digital_input",
            Self::Analog => "analog",
        };
        write!(f, "{}", label)
    }
}
