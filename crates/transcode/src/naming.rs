//! Output directory and file naming.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::format::TargetFormat;

/// Characters that may not appear in an output file name.
const ILLEGAL_FILENAME_CHARS: &[char] = &['?', '<', '>', '\\', '*', '|', '"'];

static FLAC_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)flac").unwrap());

/// A `24-96` style bit depth / rate tag in a release name.
static HI_RES_TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b24\s*-\s*(?:44(?:\.1)?|48|88(?:\.2)?|96|176(?:\.4)?|192)\b").unwrap()
});

/// Name of the directory a release is transcoded into.
///
/// Every case-insensitive "FLAC" in the source name is replaced by the
/// format name, or ` (FORMAT)` is appended when there is none. A resampled
/// release gets a `16-44`/`16-48` tag: an existing `24-xx` tag is rewritten,
/// otherwise ` [16-xx]` is appended.
pub fn transcode_dir_name(
    source_name: &str,
    format: TargetFormat,
    resample_rate: Option<u32>,
) -> String {
    let mut name = if FLAC_REGEX.is_match(source_name) {
        FLAC_REGEX.replace_all(source_name, format.name()).into_owned()
    } else {
        format!("{} ({})", source_name, format.name())
    };

    if let Some(rate) = resample_rate {
        let tag = format!("16-{}", rate / 1000);
        if HI_RES_TAG_REGEX.is_match(&name) {
            name = HI_RES_TAG_REGEX.replace_all(&name, tag.as_str()).into_owned();
        } else {
            name = format!("{} [{}]", name, tag);
        }
    }

    name
}

/// Replace every character that is illegal in file names with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if ILLEGAL_FILENAME_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Where the transcoded copy of `source` goes.
///
/// The path relative to `source_root` is kept, the file stem is sanitized and
/// the extension becomes the format's.
pub fn transcoded_path(
    source_root: &Path,
    output_root: &Path,
    source: &Path,
    format: TargetFormat,
) -> PathBuf {
    let relative = source.strip_prefix(source_root).unwrap_or(source);
    let parent = relative.parent().unwrap_or_else(|| Path::new(""));
    let stem = relative
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = format!("{}.{}", sanitize_file_name(&stem), format.extension());
    output_root.join(parent).join(file_name)
}

/// Where an ancillary file is copied to, mirroring its place in the source tree.
pub fn mirrored_path(source_root: &Path, output_root: &Path, source: &Path) -> PathBuf {
    let relative = source.strip_prefix(source_root).unwrap_or(source);
    output_root.join(relative)
}
