use std::sync::Arc;

use anyhow::Result;
use clap::{ArgAction, Parser};
use tracing::{info, warn};

use rtsp_proxy::config::Config;
use rtsp_proxy::forward::Hub;
use rtsp_proxy::stream::Stream;
use rtsp_proxy::{log, shutdown};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Verbose mode [default: config level, -v "info", -vv "debug", -vvv "trace"]
    #[arg(short = 'v', action = ArgAction::Count, default_value_t = 0)]
    verbose: u8,
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = Config::parse(args.config)?;

    let level = match args.verbose {
        0 => cfg.log.level.clone(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    log::set(format!("rtsp_proxy={level},rtsp={level}"));

    if cfg.streams.is_empty() {
        warn!("no streams configured");
    }

    let hub = Arc::new(Hub::new());
    let mut handles = Vec::with_capacity(cfg.streams.len());
    for (path, conf) in &cfg.streams {
        let stream = Stream::new(path.clone(), conf, &cfg.rtsp, hub.clone())?;
        handles.push(stream.spawn());
    }
    info!("proxy started, {} streams", handles.len());

    let signal = shutdown::wait().await;
    info!("received {signal}, shutting down");
    for handle in handles {
        handle.close().await;
    }
    Ok(())
}
