use std::{
    net::{Ipv4Addr, SocketAddr},
    process::ExitCode,
};

use clap::Parser;
use log::{error, info};
use socks_relay::{server::DEFAULT_PORT, Server, ServerConfig, SocksConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Port to accept SOCKS5 clients on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0")]
    listen: Ipv4Addr,

    /// Answer failed requests with a SOCKS5 error reply instead of closing
    #[arg(long)]
    strict: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = ServerConfig {
        listen: SocketAddr::from((cli.listen, cli.port)),
        socks: SocksConfig {
            reply_on_failure: cli.strict,
        },
    };
    let server = match Server::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    match server.local_addr() {
        Ok(addr) => info!("socks5 relay listening on {}", addr),
        Err(e) => info!("socks5 relay listening on {} ({})", config.listen, e),
    }
    server.run().await;
    ExitCode::SUCCESS
}
