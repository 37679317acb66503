use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use whatbetter_transcode::{
    ReleaseReport, ReleaseTranscoder, TargetFormat, TranscodeOutcome, allowed_formats,
};

use crate::config::AppConfig;

/// Options of one `transcode` invocation.
#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub source: PathBuf,
    pub formats: Vec<TargetFormat>,
    pub remaster_title: Option<String>,
}

pub struct CommandExecutor {
    config: AppConfig,
}

impl CommandExecutor {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Transcode one release into every requested format, in order.
    ///
    /// The first failing format stops the batch.
    pub async fn transcode(
        &self,
        request: TranscodeRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<TranscodeOutcome>> {
        let formats = planned_formats(
            &request.formats,
            &self.config.formats,
            request.remaster_title.as_deref().unwrap_or_default(),
        );
        if formats.is_empty() {
            bail!(
                "No format may be transcoded for {}",
                request.source.display()
            );
        }

        let transcoder = ReleaseTranscoder::new(self.config.transcode_config());
        let mut outcomes = Vec::with_capacity(formats.len());
        for format in formats {
            let outcome = transcoder
                .run(&request.source, format, cancel)
                .await
                .with_context(|| {
                    format!(
                        "Failed to transcode {} to {}",
                        request.source.display(),
                        format
                    )
                })?;
            match &outcome {
                TranscodeOutcome::Transcoded(path) => println!("{}", path.display()),
                TranscodeOutcome::AlreadyInFormat(path) => {
                    info!("{} is already {}", path.display(), format)
                }
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    pub async fn inspect(&self, source: &Path, json: bool) -> Result<()> {
        let transcoder = ReleaseTranscoder::new(self.config.transcode_config());
        let report = transcoder
            .inspect(source)
            .await
            .with_context(|| format!("Failed to inspect {}", source.display()))?;
        let inspection = Inspection::new(&report);

        if json {
            println!("{}", serde_json::to_string_pretty(&inspection)?);
        } else {
            print!("{}", inspection.render());
        }
        Ok(())
    }
}

/// Requested formats (or the configured defaults), deduplicated, minus the
/// ones the remaster title rules out.
fn planned_formats(
    requested: &[TargetFormat],
    defaults: &[TargetFormat],
    remaster_title: &str,
) -> Vec<TargetFormat> {
    let requested = if requested.is_empty() {
        defaults
    } else {
        requested
    };
    let allowed = allowed_formats(remaster_title);

    let mut formats = Vec::with_capacity(requested.len());
    for format in requested {
        if formats.contains(format) {
            continue;
        }
        if !allowed.contains(format) {
            warn!("Skipping {}: not allowed for this release", format);
            continue;
        }
        formats.push(*format);
    }
    formats
}

#[derive(Debug, Serialize)]
struct FormatPlan {
    format: TargetFormat,
    output_dir: Option<String>,
    noop: bool,
}

#[derive(Debug, Serialize)]
struct Inspection<'a> {
    #[serde(flatten)]
    report: &'a ReleaseReport,
    plans: Vec<FormatPlan>,
}

impl<'a> Inspection<'a> {
    fn new(report: &'a ReleaseReport) -> Self {
        let plans = TargetFormat::ALL
            .into_iter()
            .map(|format| {
                let noop = report.profile.is_noop(format);
                FormatPlan {
                    format,
                    output_dir: if noop {
                        None
                    } else {
                        report.output_dir_name(format)
                    },
                    noop,
                }
            })
            .collect();
        Self { report, plans }
    }

    fn render(&self) -> String {
        let report = self.report;
        let profile = &report.profile;
        let mut out = String::new();

        out.push_str(&format!("Release:   {}\n", report.source.display()));
        out.push_str(&format!("Audio:     {} files\n", report.audio_files.len()));
        out.push_str(&format!(
            "Ancillary: {} files\n",
            report.ancillary_files.len()
        ));
        let resample = match (profile.needs_resample, profile.target_sample_rate) {
            (false, _) => "no".to_string(),
            (true, Some(rate)) => format!("yes, to 16 bit / {} Hz", rate),
            (true, None) => "yes, but the sample rate is not supported".to_string(),
        };
        out.push_str(&format!("Resample:  {}\n", resample));

        if profile.has_multichannel {
            out.push_str("Multichannel audio found; this release cannot be transcoded\n");
            return out;
        }

        out.push('\n');
        for plan in &self.plans {
            match &plan.output_dir {
                Some(name) => out.push_str(&format!("  {:<4} -> {}\n", plan.format, name)),
                None => out.push_str(&format!(
                    "  {:<4} -> already {}, nothing to do\n",
                    plan.format, plan.format
                )),
            }
        }
        out
    }
}
