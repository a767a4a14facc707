//! Hands track links to the desktop browser when remote playback can't be
//! controlled.

use feed_proto::platform;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::BroadcastMessage;

/// Only plain web links are passed to the platform opener.
fn launchable(msg: &BroadcastMessage) -> Option<&str> {
    match msg {
        BroadcastMessage::OpenExternal(url)
            if url.starts_with("https://") || url.starts_with("http://") =>
        {
            Some(url)
        }
        _ => None,
    }
}

pub async fn open_external(url: &str) -> std::io::Result<()> {
    let (program, args) = platform::browser_command();
    let status = tokio::process::Command::new(program)
        .args(args)
        .arg(url)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await?;
    if !status.success() {
        warn!("{} exited with {} for {}", program, status, url);
    }
    Ok(())
}

/// Open every `OpenExternal` link announced on the broadcast channel.
pub fn start(mut rx: broadcast::Receiver<BroadcastMessage>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let msg = match rx.recv().await {
                Ok(msg) => msg,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("launcher lagged by {} messages", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if let Some(url) = launchable(&msg) {
                info!("Opening {} in browser", url);
                if let Err(e) = open_external(url).await {
                    warn!("Failed to open browser for {}: {}", url, e);
                }
            } else if let BroadcastMessage::OpenExternal(url) = &msg {
                warn!("Refusing to open non-web link {:?}", url);
            }
        }
    })
}
