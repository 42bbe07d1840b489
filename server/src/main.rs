use clap::Parser;
use server::network::Server;
use tokio::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Tick rate (simulation steps per second)
    #[clap(short, long, default_value = "30")]
    tick_rate: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let addr = format!("{}:{}", args.host, args.port);
    let tick = Duration::from_secs_f64(1.0 / args.tick_rate.max(1) as f64);

    let mut server = Server::new(&addr, tick).await?;
    server.run().await
}
