use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use skyfetch::{
    BurstPipeline, CancelToken, ConfigStore, Credentials, FeatureId, HttpBurstClient,
    HttpImageryClient, ImageryPipeline, QueryOptions, RunParams, TracingProgress,
    VectorLayer,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "skyfetch", about = "Fetch imagery and create bursts for vector layer features")]
struct Cli {
    /// Config file path (defaults to ~/.skyfetch/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct LayerArgs {
    /// GeoJSON FeatureCollection to process
    layer: PathBuf,

    /// Feature ids to process (defaults to every feature)
    #[arg(long, value_delimiter = ',')]
    ids: Vec<u64>,

    /// Write the updated layer here instead of overwriting the input
    #[arg(long)]
    out: Option<PathBuf>,

    /// Provider API base URL
    #[arg(long, default_value = "https://imagery-api.skyfetch.dev")]
    base_url: String,

    /// Provider username (overrides the stored config)
    #[arg(long, requires = "api_key")]
    username: Option<String>,

    /// Provider API key (overrides the stored config)
    #[arg(long, requires = "username")]
    api_key: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Query imagery frames for each selected feature
    Fetch {
        #[command(flatten)]
        layer: LayerArgs,

        /// Directory frames are downloaded into (overrides the stored config)
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Include the full capture history instead of only the most
        /// recent capture per location
        #[arg(long)]
        all_frames: bool,

        /// Inclusive start of the date range
        #[arg(long)]
        start_day: Option<NaiveDate>,

        /// Inclusive end of the date range
        #[arg(long)]
        end_day: Option<NaiveDate>,

        /// Re-download frames even when already on disk
        #[arg(long)]
        no_cache: bool,
    },
    /// Create bursts for each selected feature
    Bursts {
        #[command(flatten)]
        layer: LayerArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let store = match &cli.config {
        Some(path) => ConfigStore::at(path.clone()),
        None => ConfigStore::new(),
    };
    let cancel = cancel_on_ctrl_c();

    match cli.command {
        Command::Fetch {
            layer: layer_args,
            output_dir,
            all_frames,
            start_day,
            end_day,
            no_cache,
        } => {
            let (mut layer, out_path) = load_layer(&layer_args)?;
            let client = Arc::new(HttpImageryClient::new(layer_args.base_url.clone()));
            let pipeline = ImageryPipeline::new(client, store).with_options(QueryOptions {
                latest_only: !all_frames,
                start_day,
                end_day,
                use_cache: !no_cache,
            });

            let report = pipeline
                .run(
                    &mut layer,
                    RunParams {
                        credentials: credentials(&layer_args),
                        output_dir,
                    },
                    &TracingProgress,
                    &cancel,
                )
                .await
                .context("Imagery run failed")?;

            layer
                .write_geojson_file(&out_path)
                .with_context(|| format!("Failed to write {}", out_path.display()))?;
            info!(
                processed = report.processed,
                skipped = report.skipped,
                failed = report.failed,
                cancelled = report.cancelled,
                "Imagery run finished"
            );
        }
        Command::Bursts { layer: layer_args } => {
            let (mut layer, out_path) = load_layer(&layer_args)?;
            let client = Arc::new(HttpBurstClient::new(layer_args.base_url.clone()));
            let pipeline = BurstPipeline::new(client, store);

            let report = pipeline
                .run(
                    &mut layer,
                    RunParams {
                        credentials: credentials(&layer_args),
                        output_dir: None,
                    },
                    &TracingProgress,
                    &cancel,
                )
                .await
                .context("Burst run failed")?;

            layer
                .write_geojson_file(&out_path)
                .with_context(|| format!("Failed to write {}", out_path.display()))?;
            println!("{}", report.message());
        }
    }

    Ok(())
}

/// Load the layer file and apply the requested selection.
fn load_layer(args: &LayerArgs) -> Result<(VectorLayer, PathBuf)> {
    let mut layer = VectorLayer::read_geojson_file(&args.layer)
        .with_context(|| format!("Failed to read {}", args.layer.display()))?;

    if args.ids.is_empty() {
        layer.select_all();
    } else {
        let ids: Vec<FeatureId> = args.ids.iter().copied().map(FeatureId).collect();
        layer
            .select(&ids)
            .context("Selection includes unknown feature ids")?;
    }

    let out_path = args.out.clone().unwrap_or_else(|| args.layer.clone());
    Ok((layer, out_path))
}

fn credentials(args: &LayerArgs) -> Option<Credentials> {
    match (&args.username, &args.api_key) {
        (Some(username), Some(api_key)) => Some(Credentials {
            username: username.clone(),
            api_key: api_key.clone(),
        }),
        _ => None,
    }
}

/// Initialize tracing/logging
fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();
}

/// Wire Ctrl+C to cooperative cancellation.
fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let handle = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Cancellation requested, finishing the current feature");
            handle.cancel();
        }
    });
    cancel
}
