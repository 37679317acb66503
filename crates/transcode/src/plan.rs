//! Decisions about how one file is transcoded, and the commands that do it.
//!
//! Nothing in here touches the filesystem or spawns processes.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use process_utils::quote_arg;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::format::{AudioProperties, TargetFormat};

/// Highest sample rate that is kept as-is.
pub const MAX_NATIVE_SAMPLE_RATE: u32 = 48_000;
/// Highest bit depth that is kept as-is.
pub const MAX_NATIVE_BIT_DEPTH: u8 = 16;

static PRE_EMPHASIS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bpre[\s_-]*emphas[ie][sz]").unwrap());

/// Whether a file has to be resampled before it can be transcoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resample {
    /// Use the source's sample rate and bit depth.
    Keep,
    /// Convert to 16 bit at the given rate.
    To(u32),
}

/// Whether audio with these properties exceeds 16 bit / 48 kHz.
pub fn needs_resample(props: &AudioProperties) -> bool {
    props.bits_per_sample > MAX_NATIVE_BIT_DEPTH || props.sample_rate > MAX_NATIVE_SAMPLE_RATE
}

/// The standard rate a source rate is resampled to.
///
/// Multiples of 44100 go to 44100 and multiples of 48000 go to 48000; a rate
/// that is a multiple of both is treated as a 44100 family rate.
pub fn resample_rate(sample_rate: u32) -> Option<u32> {
    if sample_rate == 0 {
        None
    } else if sample_rate % 44_100 == 0 {
        Some(44_100)
    } else if sample_rate % 48_000 == 0 {
        Some(48_000)
    } else {
        None
    }
}

/// Decide whether `path` needs resampling and to which rate.
///
/// Multichannel audio is always rejected, whether or not it would need
/// resampling: downmixing is never attempted.
pub fn decide_resample(path: &Path, props: &AudioProperties) -> Result<Resample> {
    if props.channels > 2 {
        return Err(Error::MultichannelUnsupported {
            path: path.to_path_buf(),
            channels: props.channels,
        });
    }
    if !needs_resample(props) {
        return Ok(Resample::Keep);
    }
    resample_rate(props.sample_rate)
        .map(Resample::To)
        .ok_or_else(|| Error::UnknownSampleRate {
            path: path.to_path_buf(),
            sample_rate: props.sample_rate,
        })
}

/// Formats a release may be transcoded to, given its remaster title.
///
/// Releases whose title mentions pre-emphasis are never transcoded.
pub fn allowed_formats(remaster_title: &str) -> Vec<TargetFormat> {
    if PRE_EMPHASIS_REGEX.is_match(remaster_title) {
        Vec::new()
    } else {
        TargetFormat::ALL.to_vec()
    }
}

/// One source file to transcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeJob {
    pub source_path: PathBuf,
    pub dest_path: PathBuf,
    pub format: TargetFormat,
    /// Release-wide resampling decision.
    pub resample: bool,
}

/// Turns a job into the command strings of its process pipeline.
pub trait CommandPlanner: Send + Sync {
    fn plan(&self, job: &TranscodeJob, props: &AudioProperties) -> Result<Vec<String>>;
}

/// Executables used to decode, resample and encode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Toolchain {
    pub flac: String,
    pub lame: String,
    pub sox: String,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            flac: "flac".to_string(),
            lame: "lame".to_string(),
            sox: "sox".to_string(),
        }
    }
}

impl Toolchain {
    /// Render the decoder (or resampler) and encoder commands for one file.
    ///
    /// A resampled FLAC target is produced by a single `sox` stage that
    /// writes the output file directly.
    pub fn build_commands(
        &self,
        src: &Path,
        dst: &Path,
        format: TargetFormat,
        resample: Resample,
    ) -> Vec<String> {
        let src = src.to_string_lossy();
        let dst = dst.to_string_lossy();
        let src = quote_arg(&src);
        let dst = quote_arg(&dst);

        if let (TargetFormat::Flac, Resample::To(rate)) = (format, resample) {
            return vec![format!(
                "{} {} -G -b 16 {} rate -v -L {} dither",
                quote_arg(&self.sox),
                src,
                dst,
                rate
            )];
        }

        let decoder = match resample {
            Resample::Keep => format!("{} -dcs -- {}", quote_arg(&self.flac), src),
            Resample::To(rate) => format!(
                "{} {} -G -b 16 -t wav - rate -v -L {} dither",
                quote_arg(&self.sox),
                src,
                rate
            ),
        };

        let lame = quote_arg(&self.lame);
        let encoder = match format {
            TargetFormat::Flac => format!("{} --best -s -o {} -", quote_arg(&self.flac), dst),
            TargetFormat::Mp3_320 => {
                format!("{} -S -h -b 320 --ignore-tag-errors - {}", lame, dst)
            }
            TargetFormat::Mp3V0 => {
                format!("{} -S -V 0 --vbr-new --ignore-tag-errors - {}", lame, dst)
            }
            TargetFormat::Mp3V2 => {
                format!("{} -S -V 2 --vbr-new --ignore-tag-errors - {}", lame, dst)
            }
        };

        vec![decoder, encoder]
    }
}

impl CommandPlanner for Toolchain {
    fn plan(&self, job: &TranscodeJob, props: &AudioProperties) -> Result<Vec<String>> {
        let resample = if job.resample {
            let rate =
                resample_rate(props.sample_rate).ok_or_else(|| Error::UnknownSampleRate {
                    path: job.source_path.clone(),
                    sample_rate: props.sample_rate,
                })?;
            Resample::To(rate)
        } else {
            Resample::Keep
        };
        Ok(self.build_commands(&job.source_path, &job.dest_path, job.format, resample))
    }
}
