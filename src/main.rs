use clap::Parser;
use color_eyre::Result;
use hydro_relay::{cli, config::Config, logging, server};
use tracing::{debug, error, info, warn, Level};

/// Resolves once a hang up arrives.
/// Never resolves if listening for it failed.
#[cfg(unix)]
async fn wait_for_hangup(listener: std::io::Result<tokio::signal::unix::Signal>) {
    match listener {
        Ok(mut hangups) => {
            hangups.recv().await;
        }
        Err(e) => {
            warn!(%e, "Not listening for hang ups");
            futures::future::pending().await
        }
    }
}

#[cfg(unix)]
async fn hangup() {
    use tokio::signal::unix::{signal, SignalKind};

    wait_for_hangup(signal(SignalKind::hangup())).await
}

#[cfg(not(unix))]
async fn hangup() {
    futures::future::pending().await
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = cli::Cli::parse();

    if let Some(command) = cli.command.clone() {
        cli::handle_command(command)?;

        return Ok(());
    }

    logging::init(
        cli.log_level,
        cli.log_dir.clone().map(|dir| (Level::DEBUG, dir)),
    )
    .await;

    let mut config = if let Some(config_path) = &cli.config {
        debug!(?config_path, "Config from path");
        Config::new_from_path(config_path)?
    } else {
        debug!("Default config");
        Config::default()
    };
    cli.apply(&mut config);

    let port = config.port;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting")
        }
        _ = hangup() => {
            info!("Told to hang up, quitting")
        }
        result = server::run_on_port(config, port) => {
            result?;
            error!("Server returned");
            return Err(color_eyre::eyre::eyre!("Server stopped unexpectedly"));
        }
    }

    Ok(())
}
