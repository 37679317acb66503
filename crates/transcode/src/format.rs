//! Target formats and source audio properties.

use serde::{Deserialize, Serialize};

/// Output format of a transcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TargetFormat {
    /// Best-compression FLAC.
    #[serde(rename = "FLAC")]
    Flac,
    /// Constant 320 kbps MP3.
    #[serde(rename = "320")]
    Mp3_320,
    /// LAME VBR preset V0.
    #[serde(rename = "V0")]
    Mp3V0,
    /// LAME VBR preset V2.
    #[serde(rename = "V2")]
    Mp3V2,
}

impl TargetFormat {
    /// Every supported format.
    pub const ALL: [TargetFormat; 4] = [
        TargetFormat::Flac,
        TargetFormat::Mp3_320,
        TargetFormat::Mp3V0,
        TargetFormat::Mp3V2,
    ];

    /// Name used in directory names and on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Flac => "FLAC",
            Self::Mp3_320 => "320",
            Self::Mp3V0 => "V0",
            Self::Mp3V2 => "V2",
        }
    }

    /// File extension of transcoded files, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Flac => "flac",
            Self::Mp3_320 | Self::Mp3V0 | Self::Mp3V2 => "mp3",
        }
    }

    pub fn is_lossless(&self) -> bool {
        matches!(self, Self::Flac)
    }
}

impl std::fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for TargetFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TargetFormat::ALL
            .into_iter()
            .find(|format| format.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown format '{}' (expected one of: FLAC, 320, V0, V2)",
                    s.trim()
                )
            })
    }
}

/// Stream properties of one source FLAC file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioProperties {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    pub bits_per_sample: u8,
    pub channels: u8,
}

impl AudioProperties {
    pub fn new(sample_rate: u32, bits_per_sample: u8, channels: u8) -> Self {
        Self {
            sample_rate,
            bits_per_sample,
            channels,
        }
    }
}
