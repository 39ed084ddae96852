//! Command-line interface for stacksplit.
//!
//! One subcommand, `prepare`, runs the whole pipeline for a deployment:
//! load the compiled template, partition it, rewrite references, upload
//! the partition documents, and compose the parent template back into the
//! package directory.
//!
//! # Usage
//!
//! ```bash
//! # Split and upload to the deployment bucket
//! stacksplit prepare --artifact-dir serverless/svc/dev/1712340000 \
//!     --region us-east-1 --bucket my-deploy-bucket
//!
//! # Resolve the bucket from the package directory's state file
//! stacksplit prepare --artifact-dir serverless/svc/dev/1712340000
//!
//! # Inspect the bundle without touching the bucket
//! stacksplit prepare --artifact-dir local/run --bucket b --local-store ./out
//! ```
//!
//! Stage, region, artifact directory, and bucket can also come from
//! `STACKSPLIT_*` environment variables.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::constants::ROOT_TEMPLATE_FILE;
use crate::splitter::{DeployContext, SplitRun};
use crate::template::io::load_template;
use crate::upload::{
    ArtifactStore, EncryptionOptions, HttpBucketStore, LocalDirStore, resolve_deployment_bucket,
};

/// Top-level CLI definition.
#[derive(Parser)]
#[command(
    name = "stacksplit",
    version,
    about = "Split a compiled CloudFormation template into nested stacks"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging (equivalent to RUST_LOG=debug).
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Partition the compiled template and prepare the nested-stack bundle.
    Prepare(PrepareArgs),
}

/// Arguments for `stacksplit prepare`.
#[derive(Args)]
pub struct PrepareArgs {
    /// Compiled template to split. Defaults to the compiled template in
    /// the package directory.
    #[arg(long)]
    template: Option<PathBuf>,

    /// Deployment stage.
    #[arg(long, env = "STACKSPLIT_STAGE", default_value = "dev")]
    stage: String,

    /// Deployment region.
    #[arg(long, env = "STACKSPLIT_REGION", default_value = "us-east-1")]
    region: String,

    /// Local package directory holding compiled artifacts.
    #[arg(long, default_value = ".serverless")]
    package_dir: PathBuf,

    /// Artifact path inside the deployment bucket for this deployment.
    #[arg(long, env = "STACKSPLIT_ARTIFACT_DIR")]
    artifact_dir: String,

    /// Deployment bucket name. When omitted, resolved from the package
    /// directory's deployment state file.
    #[arg(long, env = "STACKSPLIT_BUCKET")]
    bucket: Option<String>,

    /// JSON file with deployment-bucket server-side-encryption options.
    #[arg(long)]
    encryption_config: Option<PathBuf>,

    /// Write uploads into a local directory instead of the bucket.
    #[arg(long)]
    local_store: Option<PathBuf>,

    /// Do not upload packaged function archives.
    #[arg(long)]
    skip_archives: bool,
}

impl Cli {
    /// Execute the parsed command.
    pub async fn execute(self) -> Result<()> {
        init_tracing(self.verbose, self.quiet);
        match self.command {
            Commands::Prepare(args) => prepare(args).await,
        }
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn prepare(args: PrepareArgs) -> Result<()> {
    let encryption = match &args.encryption_config {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read encryption config: {}", path.display()))?;
            let options: EncryptionOptions = serde_json::from_str(&content)
                .with_context(|| format!("invalid encryption config: {}", path.display()))?;
            Some(options)
        }
        None => None,
    };

    // The store needs the bucket before the run starts, so resolution
    // happens here; the run then sees it as an explicit value.
    let bucket = resolve_deployment_bucket(args.bucket.as_deref(), &args.package_dir)?;

    let store: Arc<dyn ArtifactStore> = match &args.local_store {
        Some(root) => Arc::new(LocalDirStore::new(root)),
        None => Arc::new(HttpBucketStore::new(&args.region, &bucket, encryption)),
    };

    let template_path = args
        .template
        .unwrap_or_else(|| args.package_dir.join(ROOT_TEMPLATE_FILE));
    let template = load_template(&template_path)?;

    let context = DeployContext {
        stage: args.stage,
        region: args.region,
        package_dir: args.package_dir,
        artifact_dir: args.artifact_dir,
        bucket: Some(bucket),
    };
    let run = SplitRun::new(context, store);
    run.run(template).await?;
    if !args.skip_archives {
        run.upload_archives().await?;
    }

    println!("{}", "Nested stack bundle prepared.".green());
    Ok(())
}
