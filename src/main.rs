use std::{
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
    sync::Arc,
};

use anyhow::{Context, Result, anyhow, bail};
use clap::{CommandFactory, Parser, Subcommand, ValueHint};
use cloudfrog::{
    DownloadFlow, DownloadState, FileSaver, LinkStatus, SelectedFile, ShareClient, ShareError,
    UploadFlow,
    clipboard::Osc52Clipboard,
    config::{self, Config, ConfigFile, DEFAULT_API_URL},
    download::short_code_from_path,
    notify::Notifier,
};
use iocraft::prelude::*;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use crate::ui::{
    ConfigHeader, DownloadStatus, ErrorMessage, FileSummary, FollowDownload, InputPrompt,
    LinkCard, ProgressBar, SuccessMessage, TerminalNotifier,
};

mod ui;

#[derive(Parser)]
#[command(name = "cloudfrog")]
#[command(version)]
#[command(about = "Share files through expiring CloudFrog links")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file and print its share link
    Upload {
        #[arg(value_hint = ValueHint::FilePath)]
        file: PathBuf,
        /// Copy the link to the clipboard through the terminal
        #[arg(short, long)]
        copy: bool,
    },
    /// Download a file from a share link or short code
    Download {
        /// Full share link, `/download/<code>` path, or bare short code
        link: String,
        /// Directory to save the file into
        #[arg(short, long, value_hint = ValueHint::DirPath)]
        output: Option<PathBuf>,
    },
    /// Check whether a share link can still be downloaded
    Status { link: String },
    /// Remove expired files on the server right away (admin only)
    Cleanup,
    /// Configure cloudfrog interactively
    Config,
    /// Store the admin token in the OS keyring
    SetAdminToken { token: String },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "cloudfrog=warn".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn main() -> Result<ExitCode> {
    init_tracing();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    let _rt_guard = rt.enter();
    clap_complete::CompleteEnv::with_factory(Cli::command).complete();
    let cli = Cli::parse();

    rt.block_on(async {
        match cli.command {
            Commands::Config => interactive_config().map(|()| ExitCode::SUCCESS),
            Commands::SetAdminToken { token } => {
                config::set_admin_token_keyring(token)?;
                element!(SuccessMessage(message: "Admin token stored in OS keyring".to_string()))
                    .print();
                Ok(ExitCode::SUCCESS)
            }
            requires_server => {
                let config = config::read_config()?;
                let client = ShareClient::new(config.api_url.clone(), config.timeout)
                    .map_err(|e| describe(&e))?;

                match requires_server {
                    Commands::Upload { file, copy } => upload_file(client, file, copy).await,
                    Commands::Download { link, output } => {
                        download_file(client, &config, &link, output).await
                    }
                    Commands::Status { link } => link_status(&client, &link).await,
                    Commands::Cleanup => cleanup(&client, &config).await,
                    Commands::Config | Commands::SetAdminToken { .. } => {
                        unreachable!("handled before reading config")
                    }
                }
            }
        }
    })
}

/// The user-facing message plus whatever the server or transport added.
fn describe(err: &ShareError) -> anyhow::Error {
    match err.details() {
        Some(details) => anyhow!("{} ({})", err, details),
        None => anyhow!("{}", err),
    }
}

fn resolve_short_code(link: &str) -> Result<&str> {
    short_code_from_path(link)
        .ok_or_else(|| anyhow!("'{}' is neither a share link nor a short code", link))
}

async fn upload_file(client: ShareClient, path: PathBuf, copy: bool) -> Result<ExitCode> {
    let notifier = TerminalNotifier;

    // A path that does not exist is the same as nothing selected.
    let file = match SelectedFile::open(&path).await {
        Ok(file) => Some(file),
        Err(ShareError::Io(e)) if e.kind() == io::ErrorKind::NotFound => None,
        Err(ShareError::Validation(e)) => {
            notifier.error(&e.to_string());
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Unable to read {}", path.display()));
        }
    };

    if let Some(file) = &file {
        element!(FileSummary(name: file.name.clone(), size: file.size)).print();
    }

    let flow = UploadFlow::new(client, notifier);
    let mut progress_bar = element!(ProgressBar(
        title: "Uploading...".to_string(),
        state: Some(flow.subscribe())
    ));

    let result = tokio::select! {
        biased;
        result = flow.submit(file.as_ref()) => result,
        result = progress_bar.render_loop() => {
            result?;
            bail!("Progress display exited before the upload settled");
        }
    };

    // The flow has already told the user what went wrong.
    let Ok(response) = result else {
        return Ok(ExitCode::FAILURE);
    };

    let copied = if copy {
        flow.copy_link(&mut Osc52Clipboard::stdout())?.is_some()
    } else {
        false
    };

    element!(LinkCard(
        url: response.download_url,
        expires_at: response.expires_at,
        copied: copied
    ))
    .print();

    Ok(ExitCode::SUCCESS)
}

async fn download_file(
    client: ShareClient,
    config: &Config,
    link: &str,
    output: Option<PathBuf>,
) -> Result<ExitCode> {
    let short_code = resolve_short_code(link)?;
    let url = client.download_url(short_code);

    let dest_dir = output.unwrap_or_else(|| config.download_dir.clone());
    let saver = Arc::new(FileSaver::new(dest_dir, config.timeout).map_err(|e| describe(&e))?);
    let flow = DownloadFlow::new(Arc::new(client), saver.clone());

    let handle = flow.start(short_code);
    let mut view = element!(FollowDownload(state: Some(handle.subscribe())));

    let result = tokio::select! {
        biased;
        result = handle.wait() => result,
        result = view.render_loop() => {
            result?;
            bail!("Download display exited before the download settled");
        }
    };

    let state = match result {
        Ok(state) => state,
        Err(e) => {
            element!(ErrorMessage(message: describe(&e).to_string())).print();
            return Ok(ExitCode::FAILURE);
        }
    };

    element!(DownloadStatus(
        state: Some(state),
        url: url,
        saved_to: saver.saved_path().map(|path| path.display().to_string())
    ))
    .print();

    Ok(if state == DownloadState::Success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn link_status(client: &ShareClient, link: &str) -> Result<ExitCode> {
    let short_code = resolve_short_code(link)?;
    let url = client.download_url(short_code);
    let status = client.probe(short_code).await.map_err(|e| describe(&e))?;

    match status {
        LinkStatus::Available => {
            element!(SuccessMessage(message: format!("{} is available", url))).print();
            Ok(ExitCode::SUCCESS)
        }
        LinkStatus::NotFound => {
            element!(ErrorMessage(message: format!("{} does not exist", url))).print();
            Ok(ExitCode::FAILURE)
        }
        LinkStatus::Expired => {
            element!(ErrorMessage(message: format!("{} has expired", url))).print();
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn cleanup(client: &ShareClient, config: &Config) -> Result<ExitCode> {
    let token = config.admin_token()?;
    let report = client.cleanup(&token).await.map_err(|e| describe(&e))?;

    element!(SuccessMessage(
        message: format!("{}: {} expired file(s) removed", report.message, report.deleted)
    ))
    .print();

    Ok(ExitCode::SUCCESS)
}

fn read_input(prompt: &str, default: Option<&str>, description: Option<&str>) -> Result<String> {
    element! {
        InputPrompt(
            prompt: prompt.to_string(),
            default: default.map(|s| s.to_string()),
            description: description.map(|s| s.to_string())
        )
    }
    .print();

    print!("> ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim().to_string();

    match default {
        Some(default) if input.is_empty() => Ok(default.to_string()),
        _ => Ok(input),
    }
}

fn interactive_config() -> Result<()> {
    element!(ConfigHeader()).print();

    let api_url = loop {
        let api_url = read_input(
            "API URL",
            Some(DEFAULT_API_URL),
            Some("The base URL of the CloudFrog server"),
        )?;

        match Url::parse(&api_url) {
            Ok(url) => break url,
            Err(e) => {
                element!(ErrorMessage(message: format!("Invalid URL: {}", e))).print();
                println!();
            }
        }
    };

    let timeout = loop {
        let timeout = read_input(
            "Request timeout",
            Some("60s"),
            Some("How long an upload may take before it is abandoned"),
        )?;

        match humantime::parse_duration(&timeout) {
            Ok(_) => break timeout,
            Err(e) => {
                element!(ErrorMessage(message: format!("Invalid duration: {}", e))).print();
                println!();
            }
        }
    };

    let download_dir = read_input(
        "Download directory",
        None,
        Some("Optional: where `cloudfrog download` saves files (defaults to your Downloads folder)"),
    )?;
    let download_dir = (!download_dir.is_empty()).then(|| PathBuf::from(download_dir));

    let path = config::write_config(ConfigFile {
        api_url: Some(api_url),
        timeout: Some(timeout),
        download_dir,
    })?;

    element!(SuccessMessage(message: format!("Configuration written to {}", path.display())))
        .print();

    Ok(())
}
