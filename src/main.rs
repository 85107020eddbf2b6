use std::io;
use std::process::ExitCode;
use std::time::Instant;

use reqwest::Client;
use tokio::io::BufReader;
use tokio::signal;
use tokio::sync::watch;

use crate::apis::inference::InferenceClient;
use crate::session::{Exit, Session};
use crate::utilities::config::Config;
use crate::utilities::confirmation::{GenerationFlow, Phase};
use crate::utilities::credential::Credential;
use crate::utilities::generator::{Generator, Quota};
use crate::utilities::logchamp;
use crate::utilities::storage::FileStore;

mod apis;
mod models;
mod session;
mod utilities;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    if let Err(err) = logchamp::init(".log") {
        eprintln!("failed to set up logging: {err}");
        return ExitCode::FAILURE;
    }

    if let Err(err) = dotenvy::dotenv() {
        log::debug!("no .env loaded: {err}");
    }

    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            log::error!("{err}");
            return ExitCode::FAILURE;
        }
    };
    log::info!("starting {} edition: {config:?}", config.edition);

    let http_client = match Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
    {
        Ok(http_client) => http_client,
        Err(err) => {
            log::error!("failed to build HTTP client: {err}");
            return ExitCode::FAILURE;
        }
    };

    let quota = match config.rate_limit {
        Some(limiter) => match FileStore::load(&config.rate_limit_file) {
            Ok(store) => Some(Quota::load(limiter, Box::new(store))),
            Err(err) => {
                log::error!("failed to load {}: {err}", config.rate_limit_file.display());
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    let credential = match config.api_token {
        Some(token) => Credential::configured(token),
        None => Credential::interactive(),
    };

    let (phase_tx, phase_rx) = watch::channel(Phase::Idle);
    let mut started = None;
    let flow = GenerationFlow::with_observer(Box::new(move |phase| {
        match phase {
            Phase::Submitting => started = Some(Instant::now()),
            Phase::Idle => {
                if let Some(start) = started.take() {
                    log::info!("request finished in {:.2}s", start.elapsed().as_secs_f32());
                }
            }
            Phase::AwaitingConfirmation => (),
        }
        phase_tx.send_replace(phase);
    }));

    let client = InferenceClient::new(http_client, config.inference_host, config.edition.catalog());
    let generator = Generator::new(client, quota, flow);
    let mut session = Session::new(
        generator,
        credential,
        config.decline_url,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    );

    let exit = until_interrupted(session.run(), signal::ctrl_c(), phase_rx).await;

    match exit {
        Ok(exit) => {
            log::info!("session ended: {exit:?}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("terminal I/O failed: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Runs `session` until it ends or `interrupt` fires. A request in flight is
/// allowed to finish before quitting.
async fn until_interrupted(
    session: impl Future<Output = io::Result<Exit>>,
    interrupt: impl Future<Output = io::Result<()>>,
    mut phase: watch::Receiver<Phase>,
) -> io::Result<Exit> {
    tokio::pin!(session);

    tokio::select! {
        exit = &mut session => return exit,
        result = interrupt => {
            if let Err(err) = result {
                log::error!("failed to listen for Ctrl+C: {err}");
                return session.await;
            }
        }
    }

    log::warn!("Ctrl+C received");
    if *phase.borrow() == Phase::Submitting {
        log::info!("waiting for the request in flight");
    }

    tokio::select! {
        exit = &mut session => exit,
        _ = phase.wait_for(|current| *current != Phase::Submitting) => Ok(Exit::Quit),
    }
}
