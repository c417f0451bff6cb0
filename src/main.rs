use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::metadata::LevelFilter;
use tracing::*;
use tracing_subscriber::{filter::Targets, layer::SubscriberExt, util::SubscriberInitExt, Layer};

use telemetry_hub::config::HubConfig;
use telemetry_hub::{hub, server, Task};

#[derive(Debug, Parser)]
struct MainArgs {
    /// The path to the config file for the telemetry hub
    #[clap(long, short)]
    config: PathBuf,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    // setup colorful backtraces
    color_backtrace::install();

    let mut targets = tracing_subscriber::filter::Targets::new();

    if let Ok(directives) = std::env::var("RUST_LOG") {
        for directive in directives.split(',') {
            if let Some((target, level)) = directive.split_once('=') {
                targets = targets.with_target(
                    target,
                    level.parse::<LevelFilter>().context("invalid log level")?,
                );
            } else {
                targets = targets.with_default(
                    directive
                        .parse::<LevelFilter>()
                        .context("invalid log level")?,
                );
            }
        }
    }

    let (writer, _guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::hourly("logs", "telemetry-hub"));

    tracing_subscriber::registry()
        // writer that outputs to console
        .with(tracing_subscriber::fmt::layer().with_filter(targets))
        // writer that outputs to files
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(
                    Targets::new().with_targets(vec![("telemetry_hub", LevelFilter::DEBUG)]),
                ),
        )
        .init();

    let main_args = MainArgs::parse();

    debug!("reading config from {:?}", &main_args.config);
    let config = HubConfig::read_from_path(main_args.config).context("failed to read config file")?;

    run_tasks(config).await
}

async fn run_tasks(config: HubConfig) -> anyhow::Result<()> {
    let cancellation_token = CancellationToken::new();

    ctrlc::set_handler({
        let cancellation_token = cancellation_token.clone();
        move || {
            info!("received interrupt, shutting down");
            cancellation_token.cancel();
        }
    })
    .expect("could not set ctrl+c handler");

    let mut tasks = Vec::<Box<dyn Task>>::new();

    let hub_handle = match config.link {
        Some(c) => {
            debug!("initializing dispatcher task");
            let (dispatcher_task, handle) = hub::create_tasks(c)
                .await
                .context("failed to initialize telemetry dispatcher")?;
            tasks.push(Box::new(dispatcher_task));
            Some(handle)
        }
        None => {
            warn!("no link configured, queries will report the telemetry subsystem unavailable");
            None
        }
    };

    debug!("initializing server task");
    tasks.push(Box::new(server::create_task(
        config.server,
        config.imagery,
        hub_handle,
    )));

    let mut join_set = JoinSet::new();

    for task in tasks {
        debug!("starting {} task", task.name());
        join_set.spawn(task.run(cancellation_token.clone()));
    }

    while let Some(res) = join_set.join_next().await {
        // if task panicked, then will be Some(Err)
        // if task terminated w/ error, then will be Some(Ok(Err))
        // need to propagate errors in both cases

        match res {
            Err(err) => {
                cancellation_token.cancel();
                return Err(err).context("task failed");
            }
            Ok(Err(err)) => {
                cancellation_token.cancel();
                return Err(err).context("task terminated with error");
            }
            _ => {
                info!("exited task");
            }
        }
    }

    Ok(())
}
