mod card;
mod cli;
mod config;
mod datalog;
mod discovery;
mod download;
mod edf;
mod error;
mod prober;
mod session;

use crate::card::Card;
use crate::discovery::{DayCutoff, DiscoveryCoordinator, DiscoveryManifest, ROOT_FILES, SETTINGS_FILES};
use crate::download::Downloader;
use crate::prober::ExistenceProber;

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Exit status after an interrupt, as a shell would report SIGINT.
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .init();

    log::info!("ezshare-cpap v{} starting...", env!("CARGO_PKG_VERSION"));

    let cfg = args.apply(config::Config::load(args.config.as_deref()));

    // First Ctrl-C stops discovery between probes and lets the download stage
    // run with whatever was confirmed. A second one aborts outright.
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_flag = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted: finishing with files found so far (Ctrl-C again to abort)");
            cancel_flag.store(true, Ordering::Relaxed);
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Aborted");
            std::process::exit(EXIT_INTERRUPTED as i32);
        }
    });

    // All card traffic is blocking and strictly sequential.
    tokio::task::spawn_blocking(move || run(&cfg, cancel))
        .await
        .unwrap_or_else(|e| {
            log::error!("Sync task panicked: {e}");
            ExitCode::FAILURE
        })
}

fn run(cfg: &config::Config, cancel: Arc<AtomicBool>) -> ExitCode {
    let output_dir = cfg.output_path();
    if let Err(e) = std::fs::create_dir_all(&output_dir) {
        log::error!("Cannot create output dir {}: {e}", output_dir.display());
        return ExitCode::FAILURE;
    }
    log::info!("Output dir: {}", output_dir.display());

    let card = Card::new(&cfg.card_ip, Duration::from_secs(cfg.timeout_s));
    log::info!("Connecting to card at {}...", card.base_url());
    let Some(version) = card.ping() else {
        log::error!(
            "Cannot reach card at {}. Is the card accessible on this network?",
            cfg.card_ip
        );
        return ExitCode::FAILURE;
    };
    log::info!("Card detected! Firmware version: {version}");
    if version != card::CONFIRMED_FIRMWARE {
        log::warn!(
            "Confirmed to work with firmware {}; detected {version}, behavior may differ",
            card::CONFIRMED_FIRMWARE
        );
    }

    let mut downloader = Downloader::new(&card, &output_dir);
    downloader.download_paths("root files", &ROOT_FILES);

    if cfg.str_only {
        log::info!("--str-only mode: skipping DATALOG and SETTINGS. Done.");
        return ExitCode::SUCCESS;
    }

    downloader.download_paths("SETTINGS", &SETTINGS_FILES);

    let str_path = downloader.local_path("STR.edf");
    let bytes = match std::fs::read(&str_path) {
        Ok(b) => b,
        Err(e) => {
            log::error!("STR.edf not available ({e}). Cannot enumerate DATALOG files.");
            return ExitCode::FAILURE;
        }
    };

    log::info!("Parsing STR.edf for session timestamps...");
    let (manifest, mut status) = match session::extract_sessions(&bytes) {
        Ok(sessions) => {
            log::info!("Found {} therapy session(s)", sessions.len());
            let cutoff = DayCutoff::from_days(cfg.days, chrono::Local::now().date_naive());
            let mut prober = ExistenceProber::new(&card, cfg.probe.retries, cancel);
            let manifest = DiscoveryCoordinator::new(&mut prober, cfg.probe).run(&sessions, cutoff);
            (manifest, ExitCode::SUCCESS)
        }
        Err(e) => {
            log::error!("Failed to parse STR.edf: {e}");
            (DiscoveryManifest::well_known_only(), ExitCode::FAILURE)
        }
    };

    if manifest.report.cancelled {
        status = ExitCode::from(EXIT_INTERRUPTED);
    }

    let report = downloader.download(&manifest);
    if report.failed > 0 {
        log::warn!("{} file(s) failed to download; re-run to retry", report.failed);
    }
    log::info!("Done.");
    status
}
