use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{error, info};

use track_merge::config::{FileConfig, DEFAULT_CONFIG_FILE, DEFAULT_DATASET_FILE, DEFAULT_EXPORT_FILE};
use track_merge::oauth::wait_for_authorization_code_sync;
use track_merge::{
    AppConfig, DatasetStore, FetchMode, MergePipeline, OptionExt, Result, StravaClient,
    StravaSource,
};

#[derive(Parser)]
#[command(name = "track-merge")]
#[command(about = "Merge Strava activities into a cleaned GeoJSON track dataset")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authorize with Strava and merge new activities into the dataset
    Sync {
        /// Config file (default: ./track-merge.toml if present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// GeoJSON dataset to update
        #[arg(long)]
        dataset: Option<PathBuf>,

        /// Activity export to rebuild
        #[arg(long)]
        export: Option<PathBuf>,

        /// Days re-fetched before the newest stored activity
        #[arg(long)]
        lookback_days: Option<u32>,

        /// Walk the activity listing lazily instead of fetching fixed batches
        #[arg(long)]
        streaming: bool,
    },

    /// Rebuild the activity export from the dataset file only
    Export {
        /// Config file (default: ./track-merge.toml if present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// GeoJSON dataset to read
        #[arg(long)]
        dataset: Option<PathBuf>,

        /// Activity export to write
        #[arg(long)]
        export: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info,reqwest=warn,hyper=warn,hyper_util=warn"),
    )
    .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Sync {
            config,
            dataset,
            export,
            lookback_days,
            streaming,
        } => sync(config, dataset, export, lookback_days, streaming),
        Commands::Export {
            config,
            dataset,
            export,
        } => rebuild_export(config, dataset, export),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn sync(
    config_path: Option<PathBuf>,
    dataset: Option<PathBuf>,
    export: Option<PathBuf>,
    lookback_days: Option<u32>,
    streaming: bool,
) -> Result<()> {
    let mut config = AppConfig::load(config_path.as_deref())?;
    if let Some(path) = dataset {
        config.dataset_path = path;
    }
    if let Some(path) = export {
        config.export_path = path;
    }
    if let Some(days) = lookback_days {
        config.pipeline.recent_lookback_days = days;
    }
    if streaming {
        config.pipeline.fetch_mode = FetchMode::Streaming;
    }

    let client = StravaClient::new(config.credentials.clone(), config.redirect_uri())?;
    let url = client.authorization_url(&config.scopes)?;
    info!("Open this URL to authorize the application: {}", url);
    println!("\n{}\n", url);

    let code = wait_for_authorization_code_sync(config.oauth_port)?
        .ok_or_authorization("Authorization failed to return a code")?;

    let mut source = StravaSource::new(client, config.stream_resolution.clone())?;
    source.authorize(&code)?;

    let store = DatasetStore::new(config.dataset_path, config.export_path);
    MergePipeline::new(store, config.pipeline).run(&mut source)?;

    info!("Finished updating the dataset with all fetched activities");
    Ok(())
}

fn rebuild_export(
    config_path: Option<PathBuf>,
    dataset: Option<PathBuf>,
    export: Option<PathBuf>,
) -> Result<()> {
    let file = match config_path {
        Some(path) => FileConfig::read(&path, true)?,
        None => FileConfig::read(Path::new(DEFAULT_CONFIG_FILE), false)?,
    };

    let store = DatasetStore::new(
        dataset
            .or(file.dataset_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATASET_FILE)),
        export
            .or(file.export_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_EXPORT_FILE)),
    );

    let collection = store.load();
    store.save_export(&collection)?;
    Ok(())
}
