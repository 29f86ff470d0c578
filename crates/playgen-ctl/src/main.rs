mod cli;
mod connection;

use clap::Parser;
use cli::Args;
use connection::DaemonConnection;
use playgen_proto::config::Config;
use playgen_proto::platform::daemon_address;
use playgen_proto::protocol::{Broadcast, Message, Response, PROTOCOL_VERSION};
use tracing::{debug, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let port = match args.port {
        Some(port) => port,
        None => Config::load()?.daemon.tcp_port,
    };
    let address = daemon_address(port);
    debug!("connecting to {}", address);

    let mut conn = DaemonConnection::connect(&address)
        .await
        .map_err(|e| anyhow::anyhow!("cannot reach playgen-daemon at {}: {}", address, e))?;

    let Some(command) = args.action.into_command() else {
        return watch(&mut conn).await;
    };

    let response = conn
        .request(command, |broadcast| match broadcast {
            Broadcast::Hello { protocol_version, .. } if *protocol_version != PROTOCOL_VERSION => {
                warn!(
                    "daemon speaks protocol {}, this client {}",
                    protocol_version, PROTOCOL_VERSION
                );
            }
            Broadcast::DownloadProgress { progress } => {
                eprintln!("{:>5.1}%  {}", progress.percent, progress.title);
            }
            _ => {}
        })
        .await?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    if let Response::Error { message } = response {
        anyhow::bail!(message);
    }
    Ok(())
}

async fn watch(conn: &mut DaemonConnection) -> anyhow::Result<()> {
    while let Some(msg) = conn.receive_message().await? {
        if let Message::Broadcast(broadcast) = msg {
            println!("{}", serde_json::to_string(&broadcast)?);
        }
    }
    Ok(())
}
