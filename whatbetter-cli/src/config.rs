use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use whatbetter_transcode::config::DEFAULT_UNWIND_TIMEOUT_SECS;
use whatbetter_transcode::{TargetFormat, Toolchain, TranscodeConfig};

/// Settings read from `config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where transcoded releases are created; next to the source when unset.
    pub output_dir: Option<PathBuf>,
    pub max_threads: Option<usize>,
    /// Formats used when `transcode` gets no `-f`.
    pub formats: Vec<TargetFormat>,
    pub job_timeout_secs: Option<u64>,
    pub unwind_timeout_secs: u64,
    pub tools: Toolchain,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            max_threads: None,
            formats: vec![TargetFormat::Mp3V0, TargetFormat::Mp3_320],
            job_timeout_secs: None,
            unwind_timeout_secs: DEFAULT_UNWIND_TIMEOUT_SECS,
            tools: Toolchain::default(),
        }
    }
}

impl AppConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("whatbetter").join("config.toml"))
    }

    /// Load the configuration.
    ///
    /// A missing default file means defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.is_file() => path,
                _ => return Ok(Self::default()),
            },
        };

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn show(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Apply command-line overrides on top of the file values.
    pub fn with_overrides(
        mut self,
        output_dir: Option<PathBuf>,
        threads: Option<usize>,
        job_timeout_secs: Option<u64>,
    ) -> Self {
        if output_dir.is_some() {
            self.output_dir = output_dir;
        }
        if threads.is_some() {
            self.max_threads = threads;
        }
        if job_timeout_secs.is_some() {
            self.job_timeout_secs = job_timeout_secs;
        }
        self
    }

    pub fn transcode_config(&self) -> TranscodeConfig {
        TranscodeConfig {
            output_dir: self.output_dir.clone(),
            max_workers: self.max_threads,
            job_timeout_secs: self.job_timeout_secs,
            unwind_timeout_secs: self.unwind_timeout_secs,
            tools: self.tools.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(AppConfig::from_toml("").unwrap(), AppConfig::default());
    }

    #[test]
    fn test_parse_full_file() {
        let config = AppConfig::from_toml(
            r#"
            output_dir = "/srv/transcodes"
            max_threads = 6
            formats = ["V0", "FLAC"]
            job_timeout_secs = 900

            [tools]
            lame = "/opt/lame/bin/lame"
            "#,
        )
        .unwrap();

        assert_eq!(config.output_dir, Some(PathBuf::from("/srv/transcodes")));
        assert_eq!(config.max_threads, Some(6));
        assert_eq!(config.formats, vec![TargetFormat::Mp3V0, TargetFormat::Flac]);
        assert_eq!(config.tools.lame, "/opt/lame/bin/lame");
        assert_eq!(config.tools.flac, "flac");
        assert_eq!(config.unwind_timeout_secs, DEFAULT_UNWIND_TIMEOUT_SECS);

        let transcode = config.transcode_config();
        assert_eq!(transcode.max_workers, Some(6));
        assert_eq!(transcode.job_timeout_secs, Some(900));
    }

    #[test]
    fn test_unknown_format_in_file() {
        assert!(AppConfig::from_toml(r#"formats = ["ogg"]"#).is_err());
    }

    #[test]
    fn test_overrides_win() {
        let config = AppConfig {
            max_threads: Some(2),
            ..Default::default()
        }
        .with_overrides(Some(PathBuf::from("/tmp/out")), None, Some(30));

        assert_eq!(config.output_dir, Some(PathBuf::from("/tmp/out")));
        assert_eq!(config.max_threads, Some(2));
        assert_eq!(config.job_timeout_secs, Some(30));
    }

    #[test]
    fn test_show_round_trips() {
        let config = AppConfig {
            max_threads: Some(3),
            ..Default::default()
        };
        let shown = config.show().unwrap();
        assert!(shown.contains("[tools]"));
        assert!(shown.contains("\"V0\""));
        assert_eq!(AppConfig::from_toml(&shown).unwrap(), config);
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_threads = 1\n").unwrap();
        assert_eq!(AppConfig::load(Some(&path)).unwrap().max_threads, Some(1));

        assert!(AppConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
