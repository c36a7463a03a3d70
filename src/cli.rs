use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log what would be uploaded instead of uploading it
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Watch the configured channels and relay new videos
    Monitor {
        /// Run a single check and exit
        #[arg(long)]
        once: bool,

        /// Seconds between checks (overrides the config file)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Run the full pipeline for one video id
    Process {
        /// Video identifier
        #[arg(short, long)]
        item: String,
    },

    /// Fix, merge and translate an SRT file into bilingual SRT and ASS
    Translate {
        /// Source SRT file
        #[arg(short, long)]
        input: PathBuf,

        /// Directory for the generated files (defaults to the input's folder)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Remove overlaps so consecutive subtitles are a frame apart
    FixTimeline {
        /// Source SRT file
        #[arg(short, long)]
        input: PathBuf,

        /// Frame rate used for the minimum gap
        #[arg(long)]
        fps: Option<f64>,

        /// Output SRT file (defaults to <stem>_fix.srt)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Merge short subtitle fragments into display units
    Merge {
        /// Source SRT file
        #[arg(short, long)]
        input: PathBuf,

        /// Output SRT file (defaults to <stem>_merged.srt)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Render a bilingual SRT file as styled ASS
    Render {
        /// Bilingual SRT file (source line, then target line)
        #[arg(short, long)]
        input: PathBuf,

        /// Output ASS file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Burn subtitles into a video file
    Embed {
        /// Input video file
        #[arg(short, long)]
        video: PathBuf,

        /// Subtitle file
        #[arg(short, long)]
        subtitles: PathBuf,

        /// Output video file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Pair a source SRT with its translation, render ASS and burn it in
    EmbedBilingual {
        /// Input video file
        #[arg(short, long)]
        video: PathBuf,

        /// Source-language SRT file
        #[arg(short, long)]
        source: PathBuf,

        /// Translated SRT file with matching indices
        #[arg(short, long)]
        target: PathBuf,

        /// Output video file (defaults to <video stem>_bilingual.mp4)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Inspect or edit the processed-video history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Write the default configuration to a file
    InitConfig {
        /// Destination path
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum HistoryAction {
    /// List processed video ids
    List,

    /// Forget a video id so it is processed again
    Remove {
        /// Video identifier
        id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_monitor() {
        let args = Args::parse_from(["subrelay", "-v", "monitor", "--once", "--interval", "60"]);
        assert!(args.verbose);
        match args.command {
            Commands::Monitor { once, interval } => {
                assert!(once);
                assert_eq!(interval, Some(60));
            }
            _ => panic!("expected monitor"),
        }
    }

    #[test]
    fn test_parse_fix_timeline() {
        let args = Args::parse_from(["subrelay", "fix-timeline", "-i", "a.srt", "--fps", "30"]);
        match args.command {
            Commands::FixTimeline { input, fps, output } => {
                assert_eq!(input, PathBuf::from("a.srt"));
                assert_eq!(fps, Some(30.0));
                assert!(output.is_none());
            }
            _ => panic!("expected fix-timeline"),
        }
    }

    #[test]
    fn test_parse_history_remove() {
        let args = Args::parse_from(["subrelay", "history", "remove", "abc"]);
        assert!(matches!(
            args.command,
            Commands::History { action: HistoryAction::Remove { id } } if id == "abc"
        ));
    }

    #[test]
    fn test_parse_dry_run_after_subcommand() {
        let args = Args::parse_from(["subrelay", "process", "-i", "abc", "--dry-run"]);
        assert!(args.dry_run);
        assert!(!Args::parse_from(["subrelay", "process", "-i", "abc"]).dry_run);
    }

    #[test]
    fn test_parse_embed_bilingual() {
        let args = Args::parse_from([
            "subrelay", "embed-bilingual", "-v", "in.mp4", "-s", "en.srt", "-t", "zh.srt",
        ]);
        match args.command {
            Commands::EmbedBilingual { video, source, target, output } => {
                assert_eq!(video, PathBuf::from("in.mp4"));
                assert_eq!(source, PathBuf::from("en.srt"));
                assert_eq!(target, PathBuf::from("zh.srt"));
                assert!(output.is_none());
            }
            _ => panic!("expected embed-bilingual"),
        }
    }
}
