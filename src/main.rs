use clap::Parser;
use fieldscribe_lib::{config, run_controller, ControllerOptions};
use std::path::PathBuf;

/// Long-lived controller: owns the browser session and serves the loopback
/// control protocol for the `fieldscribe-ctl` client.
#[derive(Parser, Debug)]
#[command(name = "fieldscribe", version, about = "Form field controller")]
struct Args {
    /// Control protocol port (overrides config; 0 picks a free port)
    #[arg(long)]
    port: Option<u16>,

    /// Attach to an already-running browser at this remote-debugging
    /// address (e.g. 127.0.0.1:9222) instead of launching one
    #[arg(long)]
    attach: Option<String>,

    /// Launch the managed browser headless
    #[arg(long)]
    headless: bool,

    /// Browser profile directory for the managed session
    #[arg(long)]
    user_data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config = match config::load_or_init().await {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("Config load failed ({}), using defaults", e);
            config::AppConfig::default()
        }
    };

    run_controller(
        config,
        ControllerOptions {
            port: args.port,
            attach: args.attach,
            headless: args.headless,
            user_data_dir: args.user_data_dir,
        },
    )
    .await?;

    Ok(())
}
