//! Release discovery: which files get transcoded, copied or ignored.

use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use crate::error::{Error, Result};

/// Extension of source audio files.
pub const AUDIO_EXTENSION: &str = "flac";

/// Extensions of non-audio files copied alongside the transcoded audio.
pub const ANCILLARY_EXTENSIONS: &[&str] = &[
    "cue", "gif", "jpeg", "jpg", "log", "md5", "nfo", "pdf", "png", "sfv", "txt",
];

/// Files of one release, in walk order (sorted by name per directory).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseFiles {
    pub root: PathBuf,
    pub audio: Vec<PathBuf>,
    pub ancillary: Vec<PathBuf>,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| extensions.contains(&ext.as_str()))
}

/// Walk `root` and sort its files into audio and ancillary files.
///
/// Hidden files and directories are skipped, as is anything whose extension
/// is neither FLAC nor on the ancillary allow-list.
pub fn discover(root: &Path) -> Result<ReleaseFiles> {
    let mut files = ReleaseFiles {
        root: root.to_path_buf(),
        ..Default::default()
    };

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e));

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            Error::io_path("walking", &path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        if has_extension(&path, &[AUDIO_EXTENSION]) {
            files.audio.push(path);
        } else if has_extension(&path, ANCILLARY_EXTENSIONS) {
            files.ancillary.push(path);
        }
    }

    Ok(files)
}
