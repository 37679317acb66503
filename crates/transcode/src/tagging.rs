//! Stream-info reading and tag copying/validation, backed by `lofty`.
//!
//! The transcoder only sees the [`MetadataBackend`] trait; [`LoftyBackend`]
//! is the implementation used outside of tests.

use std::path::Path;
use std::sync::LazyLock;

use lofty::config::WriteOptions;
use lofty::file::FileType;
use lofty::prelude::*;
use lofty::tag::{ItemValue, Tag, TagItem};
use regex::Regex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::format::AudioProperties;

static TRACK_NUMBER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(/\d+)?$").unwrap());

/// Result of validating the tags of a transcoded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagCheck {
    Valid,
    Invalid(String),
}

/// Audio metadata collaborator.
///
/// All methods block on file I/O; callers run them on the blocking pool.
pub trait MetadataBackend: Send + Sync {
    /// Read sample rate, bit depth and channel count of a FLAC file.
    fn read_properties(&self, path: &Path) -> Result<AudioProperties>;

    /// Copy every recognised tag from `src` onto `dst`.
    fn copy_tags(&self, src: &Path, dst: &Path) -> Result<()>;

    /// Check that artist, album, title and track number are present and sane.
    fn check_tags(&self, path: &Path) -> TagCheck;
}

/// [`MetadataBackend`] built on `lofty`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyBackend;

impl LoftyBackend {
    pub fn new() -> Self {
        Self
    }
}

impl MetadataBackend for LoftyBackend {
    fn read_properties(&self, path: &Path) -> Result<AudioProperties> {
        let tagged = lofty::read_from_path(path).map_err(|e| Error::metadata(path, e.to_string()))?;
        if tagged.file_type() != FileType::Flac {
            return Err(Error::metadata(
                path,
                format!("not a FLAC file ({:?})", tagged.file_type()),
            ));
        }

        let props = tagged.properties();
        let sample_rate = props
            .sample_rate()
            .ok_or_else(|| Error::metadata(path, "missing sample rate"))?;
        let bits_per_sample = props
            .bit_depth()
            .ok_or_else(|| Error::metadata(path, "missing bit depth"))?;
        let channels = props
            .channels()
            .ok_or_else(|| Error::metadata(path, "missing channel count"))?;

        Ok(AudioProperties::new(sample_rate, bits_per_sample, channels))
    }

    fn copy_tags(&self, src: &Path, dst: &Path) -> Result<()> {
        let tag_error = |reason: String| Error::TagCopyFailed {
            path: dst.to_path_buf(),
            reason,
        };

        let source = lofty::read_from_path(src).map_err(|e| tag_error(e.to_string()))?;
        let Some(source_tag) = source.primary_tag().or_else(|| source.first_tag()) else {
            debug!("{} has no tags to copy", src.display());
            return Ok(());
        };

        let destination = lofty::read_from_path(dst).map_err(|e| tag_error(e.to_string()))?;
        let mut tag = Tag::new(destination.primary_tag_type());

        for item in source_tag.items() {
            let Some(text) = item.value().text() else {
                continue;
            };
            for (key, value) in scrub_item(item.key(), text) {
                tag.push(TagItem::new(key, ItemValue::Text(value)));
            }
        }
        for picture in source_tag.pictures() {
            tag.push_picture(picture.clone());
        }

        tag.save_to_path(dst, WriteOptions::default())
            .map_err(|e| tag_error(e.to_string()))
    }

    fn check_tags(&self, path: &Path) -> TagCheck {
        let tagged = match lofty::read_from_path(path) {
            Ok(tagged) => tagged,
            Err(e) => return TagCheck::Invalid(format!("unreadable: {}", e)),
        };
        let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) else {
            return TagCheck::Invalid("no tags".to_string());
        };

        check_tag_values(
            tag.artist().as_deref(),
            tag.album().as_deref(),
            tag.title().as_deref(),
            tag.get_string(&ItemKey::TrackNumber),
        )
    }
}

/// Clean a text value: strip NUL bytes and surrounding whitespace.
pub fn scrub_value(value: &str) -> Option<String> {
    let cleaned = value.replace('\0', "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Whether a track/disc number or total carries no information.
pub fn is_degenerate_count(value: &str) -> bool {
    matches!(value, "0" | "0/0")
}

fn is_count_key(key: &ItemKey) -> bool {
    matches!(
        key,
        ItemKey::TrackNumber | ItemKey::TrackTotal | ItemKey::DiscNumber | ItemKey::DiscTotal
    )
}

/// Scrub one tag item, splitting combined `N/M` number fields.
fn scrub_item(key: &ItemKey, value: &str) -> Vec<(ItemKey, String)> {
    let Some(value) = scrub_value(value) else {
        return Vec::new();
    };
    if !is_count_key(key) {
        return vec![(key.clone(), value)];
    }
    if is_degenerate_count(&value) {
        return Vec::new();
    }

    let total_key = match key {
        ItemKey::TrackNumber => Some(ItemKey::TrackTotal),
        ItemKey::DiscNumber => Some(ItemKey::DiscTotal),
        _ => None,
    };
    match (total_key, value.split_once('/')) {
        (Some(total_key), Some((number, total))) => {
            let mut items = Vec::with_capacity(2);
            if let Some(number) = scrub_value(number).filter(|n| !is_degenerate_count(n)) {
                items.push((key.clone(), number));
            }
            if let Some(total) = scrub_value(total).filter(|t| !is_degenerate_count(t)) {
                items.push((total_key, total));
            }
            items
        }
        _ => vec![(key.clone(), value)],
    }
}

fn check_tag_values(
    artist: Option<&str>,
    album: Option<&str>,
    title: Option<&str>,
    track_number: Option<&str>,
) -> TagCheck {
    let required = [("artist", artist), ("album", album), ("title", title)];
    for (name, value) in required {
        if value.is_none_or(|v| v.trim().is_empty()) {
            return TagCheck::Invalid(format!("missing {} tag", name));
        }
    }
    match track_number.map(str::trim) {
        None | Some("") => TagCheck::Invalid("missing track number tag".to_string()),
        Some(track) if !TRACK_NUMBER_REGEX.is_match(track) => {
            TagCheck::Invalid(format!("malformed track number '{}'", track))
        }
        Some(_) => TagCheck::Valid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scrub_value() {
        assert_eq!(scrub_value("  Artist \0"), Some("Artist".to_string()));
        assert_eq!(scrub_value("\0\0"), None);
        assert_eq!(scrub_value("   "), None);
    }

    #[test]
    fn test_degenerate_counts_dropped() {
        assert!(scrub_item(&ItemKey::TrackNumber, "0").is_empty());
        assert!(scrub_item(&ItemKey::DiscTotal, " 0/0 ").is_empty());
        assert_eq!(
            scrub_item(&ItemKey::TrackTitle, "0"),
            vec![(ItemKey::TrackTitle, "0".to_string())]
        );
    }

    #[test]
    fn test_combined_track_field_split() {
        assert_eq!(
            scrub_item(&ItemKey::TrackNumber, "3/12"),
            vec![
                (ItemKey::TrackNumber, "3".to_string()),
                (ItemKey::TrackTotal, "12".to_string()),
            ]
        );
        assert_eq!(
            scrub_item(&ItemKey::DiscNumber, "1/0"),
            vec![(ItemKey::DiscNumber, "1".to_string())]
        );
        assert_eq!(
            scrub_item(&ItemKey::TrackNumber, "7"),
            vec![(ItemKey::TrackNumber, "7".to_string())]
        );
    }

    #[test]
    fn test_check_requires_all_fields() {
        assert_eq!(
            check_tag_values(Some("A"), Some("B"), Some("C"), Some("1")),
            TagCheck::Valid
        );
        assert_eq!(
            check_tag_values(Some("A"), Some("B"), Some("C"), Some("01/10")),
            TagCheck::Valid
        );
        assert_eq!(
            check_tag_values(None, Some("B"), Some("C"), Some("1")),
            TagCheck::Invalid("missing artist tag".to_string())
        );
        assert_eq!(
            check_tag_values(Some("A"), Some(" "), Some("C"), Some("1")),
            TagCheck::Invalid("missing album tag".to_string())
        );
        assert_eq!(
            check_tag_values(Some("A"), Some("B"), Some("C"), None),
            TagCheck::Invalid("missing track number tag".to_string())
        );
    }

    #[test]
    fn test_check_rejects_malformed_track_number() {
        let check = check_tag_values(Some("A"), Some("B"), Some("C"), Some("A1"));
        assert_eq!(check, TagCheck::Invalid("malformed track number 'A1'".to_string()));
    }

    #[test]
    fn test_read_properties_rejects_non_audio() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("fake.flac");
        std::fs::write(&path, b"definitely not flac").unwrap();
        let err = LoftyBackend::new().read_properties(&path).unwrap_err();
        assert!(matches!(err, Error::Metadata { .. }));
    }
}
