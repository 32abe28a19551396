//! CLI argument definitions and parsing structures

use anky_utils::types::ArtifactId;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// anky - artifact generation for completed writing sessions
#[derive(Parser, Debug)]
#[command(name = "anky")]
#[command(about = "Turn completed writing sessions into reflected, illustrated, published artifacts")]
#[command(long_about = r#"
anky runs the artifact pipeline for writing sessions that qualify: a reflection
from a text model, a generated image stored in the media library, and a post on
the writer's linked Farcaster account. Every step is persisted, so runs cut
short by a shutdown or crash resume where they stopped.

EXAMPLES:
  # Hand a session-ended event to the pipeline and wait for the artifact
  anky submit session-end.json --wait

  # Read the event from stdin
  cat session-end.json | anky submit - --wait --json

  # Show an artifact and its status history
  anky status 6f1c2d0e-5b7a-4c1e-9a63-0d3f2b8e4a11

  # Resume every interrupted run
  anky resume

CONFIGURATION:
  Configuration is loaded with precedence: CLI flags > environment > config file > defaults
  The config file is discovered by searching upward from CWD for .anky/config.toml,
  or named by --config or ANKY_CONFIG. API keys are read from the environment
  variables the config file names.

PIPELINE:
  created → starting_processing → reflection_completed → going_to_generate_image
    → generating_image → image_generated → uploading_image → image_uploaded
    → casting_to_farcaster → completed   (or failed)
"#)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory of the artifact store (overrides [store] dir)
    #[arg(long, global = true)]
    pub store_dir: Option<PathBuf>,

    /// Maximum number of concurrent pipeline runs
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Write logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply a session-ended event and start the pipeline if it qualifies
    ///
    /// Without --wait the command returns after the acknowledgement; a run
    /// still in progress is stopped at its last saved step and continues
    /// with `anky resume`.
    Submit {
        /// Path to the event JSON, or `-` to read stdin
        event: PathBuf,

        /// Wait until the run finishes and print the artifact
        #[arg(long)]
        wait: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show an artifact's status
    Status {
        /// Artifact identifier
        artifact_id: ArtifactId,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resume interrupted runs and wait for them
    Resume {
        /// Resume only this artifact
        #[arg(long)]
        artifact: Option<ArtifactId>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    /// Name used in error output.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Submit { .. } => "submit",
            Self::Status { .. } => "status",
            Self::Resume { .. } => "resume",
        }
    }
}
