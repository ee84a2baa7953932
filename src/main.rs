use std::{process::ExitCode, sync::Arc, time::Duration};

use clap::Parser;
use log::{debug, error, info, warn};

use noteflow::{
    App, AudioUploader, Cli, Config, FeatureGate, FileNoteStore, HttpRemoteConfig,
    HttpSummarizer, HttpUploader, MemoryNoteStore, NoteService, NoteStore, Offline,
    RemoteConfigSource, Result, Summarizer, ThemePreferences,
};

pub fn initialize_logger(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_secs()
        .format_module_path(true)
        .init();

    debug!("Logger initialized");
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    initialize_logger(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = cli.config.unwrap_or_else(Config::default_config_path);
    let mut config = Config::load(Some(&config_path))?;
    if let Some(data_dir) = cli.data_dir {
        config = config.with_data_dir(data_dir);
    }
    debug!("Using data directory {}", config.data_dir.display());

    // The gate decides before anything else is shown
    let source: Arc<dyn RemoteConfigSource> = match &config.remote_config_url {
        Some(url) => Arc::new(HttpRemoteConfig::new(url)),
        None => Arc::new(Offline),
    };
    let gate = FeatureGate::start(
        source,
        Duration::from_secs(config.remote_fetch_timeout_secs),
    );
    let state = gate.wait_ready().await?;
    if !state.enabled {
        println!("{}", state.message);
        return Ok(ExitCode::FAILURE);
    }
    if !gate.is_version_supported(config.app_version) {
        warn!(
            "Version {} is below the minimum supported version {}",
            config.app_version, state.min_supported_version
        );
    }

    let file_store = if cli.ephemeral {
        info!("Running with an in-memory note store");
        None
    } else {
        Some(Arc::new(FileNoteStore::open(&config.notes_dir)?))
    };
    let store: Arc<dyn NoteStore> = match &file_store {
        Some(file_store) => file_store.clone(),
        None => Arc::new(MemoryNoteStore::new()),
    };

    let uploader: Arc<dyn AudioUploader> = match &config.upload_url {
        Some(url) => Arc::new(HttpUploader::new(url)),
        None => Arc::new(Offline),
    };
    let summarizer: Arc<dyn Summarizer> = match &config.summarize_url {
        Some(url) => Arc::new(HttpSummarizer::new(url)),
        None => Arc::new(Offline),
    };

    let service = NoteService::new(
        store,
        uploader,
        summarizer,
        Duration::from_secs(config.undo_window_secs),
    );
    let theme = ThemePreferences::open(&config.settings_file);

    let mut app = App::new(service, gate, theme, config, config_path, cli.verbose);
    if let Some(file_store) = file_store {
        app = app.with_file_store(file_store);
    }

    app.run(cli.command).await?;
    Ok(ExitCode::SUCCESS)
}
