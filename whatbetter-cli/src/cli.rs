use clap::{Parser, Subcommand};
use std::path::PathBuf;
use whatbetter_transcode::TargetFormat;

#[derive(Parser, Debug)]
#[command(
    name = "whatbetter",
    author,
    version,
    about = "Transcode FLAC releases to MP3 and 16-bit FLAC",
    long_about = None
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (default: <config dir>/whatbetter/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Transcode a release into one or more formats
    Transcode {
        /// Release directory containing FLAC files
        source: PathBuf,

        /// Target format (FLAC, 320, V0, V2); repeat for several
        #[arg(short, long = "format", value_parser = parse_format)]
        formats: Vec<TargetFormat>,

        /// Directory the transcoded release is created in
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Maximum number of files transcoded at once
        #[arg(short = 'j', long)]
        threads: Option<usize>,

        /// Give up on a single file after this many seconds
        #[arg(long)]
        job_timeout: Option<u64>,

        /// Remaster title of the release; pre-emphasis releases are not transcoded
        #[arg(long)]
        remaster_title: Option<String>,
    },

    /// Show what a transcode would do without writing anything
    Inspect {
        /// Release directory containing FLAC files
        source: PathBuf,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
}

fn parse_format(s: &str) -> Result<TargetFormat, String> {
    s.parse()
}
