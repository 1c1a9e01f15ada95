use chrono::{Local, TimeDelta};
use env_logger::Env;
use log::{error, info, warn};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use watchducker::WatchduckerError;
use watchducker::checker::Checker;
use watchducker::cli::{Config, configure_cli};
use watchducker::display::{
    print_batch_summary, print_container_list, print_outcomes, progress_observer,
};
use watchducker::docker::DockerEngine;
use watchducker::notifications::{Notifiers, UPDATE_TITLE, update_summary};
use watchducker::operator::Operator;
use watchducker::schedule::RunMode;
use watchducker::self_update::SelfUpdater;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    #[cfg(target_os = "linux")]
    set_group_id();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(WatchduckerError::Cancelled) => {
            info!("shutting down");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), WatchduckerError> {
    let config = Arc::new(configure_cli()?);
    let notifiers = Notifiers::from_config(&config.notify)?;

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        info!("received interrupt, cancelling");
        handler_token.cancel();
    })
    .map_err(|e| WatchduckerError::Config(format!("cannot install signal handler: {e}")))?;

    let engine = DockerEngine::connect(cancel.clone()).await?;

    if config.send_test_message {
        info!("sending test message");
        if notifiers.send_test_message() > 0 {
            warn!("test message could not be delivered to every channel");
        }
    }

    if let RunMode::Cron(schedule) = &config.run_mode {
        info!("checking on cron schedule `{}`", schedule.expression());
    }
    let mut pending = config.run_mode.runs_at_startup();
    loop {
        if pending {
            if let Err(e) = run_once(&engine, &config, &notifiers).await {
                match e {
                    WatchduckerError::Cancelled => return Err(e),
                    e if !config.watch() => return Err(e),
                    e => error!("{e}"),
                }
            }
        }
        pending = true;
        let Some(delay) = config.run_mode.next_delay(Local::now()) else {
            break;
        };
        let next = Local::now() + TimeDelta::from_std(delay).unwrap_or(TimeDelta::zero());
        info!("next check at {}", next.format("%Y-%m-%d %H:%M:%S"));
        tokio::select! {
            _ = cancel.cancelled() => return Err(WatchduckerError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
    Ok(())
}

/// One discover, check and update pass.
async fn run_once(
    engine: &DockerEngine,
    config: &Arc<Config>,
    notifiers: &Notifiers,
) -> Result<(), WatchduckerError> {
    let checker =
        Checker::new(engine.clone(), Arc::clone(config)).with_observer(progress_observer());
    let containers = checker.discover().await?;
    print_container_list(&containers);

    let (result, check_error) = checker.check(containers).await;
    if let Some(e) = &check_error {
        error!("image check incomplete: {e}");
    }
    print_batch_summary(&result);

    if result.summary.updated == 0 {
        return Ok(());
    }
    if config.no_restart {
        info!("{} images updated, not restarting containers", result.summary.updated);
        return Ok(());
    }

    let operator = Operator::new(engine.clone(), config.self_image_heuristic);
    let (outcomes, update_error) = operator.update_by_batch_result(&result).await;
    print_outcomes(&outcomes);
    if let Some(e) = &update_error {
        error!("{e}");
    }

    if config.clean_up {
        if let Err(e) = operator.clean_dangling_images().await {
            warn!("{e}");
        }
    }

    if !notifiers.is_empty() {
        notifiers.send(UPDATE_TITLE, &update_summary(&result, &outcomes));
    }

    if config.self_update {
        let updater = SelfUpdater::new(engine.clone(), config.self_image_heuristic);
        match updater.update_if_needed(&result).await {
            Ok(Some(new_id)) => info!("replaced own container with {new_id}"),
            Ok(None) => {}
            Err(e) => error!("{e}"),
        }
    }

    match update_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(target_os = "linux")]
fn set_group_id() {
    let Ok(gid) = std::env::var("DOCKER_GID") else {
        return;
    };
    let docker_gid = match gid.parse::<u32>() {
        Ok(gid) => gid,
        Err(e) => {
            error!("invalid DOCKER_GID `{gid}`: {e}");
            return;
        }
    };
    info!("setting GID to {docker_gid}");
    // requires CAP_SETGID
    unsafe {
        if libc::setgid(docker_gid) != 0 {
            error!("failed to set GID to {docker_gid}");
        }
    }
}
