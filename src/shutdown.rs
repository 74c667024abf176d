/// Waits for a signal requesting a graceful shutdown.
#[cfg(unix)]
pub async fn wait() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut interrupt = signal(SignalKind::interrupt()).expect("install SIGINT handler");

    tokio::select! {
        _ = terminate.recv() => "SIGTERM",
        _ = interrupt.recv() => "SIGINT",
    }
}

#[cfg(not(unix))]
pub async fn wait() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "CTRL_C"
}
