use clap::Parser;
use color_eyre::Result;
use hydro_relay::client::ClientHandle;
use tracing::{error, info, Level};

/// Prints readings from a running relay.
#[derive(Parser, Debug)]
struct Args {
    /// Relay address.
    #[arg(short, long, default_value = "localhost")]
    address: String,

    /// Relay port.
    #[arg(short, long, default_value_t = hydro_relay::server::DEFAULT_PORT)]
    port: u16,

    /// Stop after this many readings.
    #[arg(short, long)]
    count: Option<usize>,
}

async fn run(args: Args) -> Result<()> {
    let mut client = ClientHandle::new(&args.address, args.port).await?;
    client.ping().await?;
    info!(address = %args.address, port = args.port, "Relay is up");

    let mut seen = 0;
    while args.count.map_or(true, |count| seen < count) {
        let reading = client.next_reading().await?;
        println!("{reading}");
        seen += 1;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    hydro_relay::logging::init(Level::INFO, None).await;

    let args = Args::parse();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting")
        }
        result = run(args) => {
            if let Err(e) = &result {
                error!(%e, "Watching stopped");
            }
            result?;
        }
    }

    Ok(())
}
