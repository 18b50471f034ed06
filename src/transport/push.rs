//! Push notifications from the server's notifier.
//!
//! The notifier keeps one TCP connection per client. After the client
//! identifies itself with its session key (one line), every byte the
//! notifier writes means "new actions are available". Bytes carry no
//! payload; bursts collapse into a single pending signal.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Keep a notifier connection alive, forwarding one signal per received
/// byte into `signals`. Disconnects are retried after `reconnect`. Returns
/// once the receiving side of `signals` is dropped.
pub async fn listen(
    addr: String,
    session_key: String,
    signals: mpsc::Sender<()>,
    reconnect: Duration,
) {
    loop {
        match connect(&addr, &session_key).await {
            Ok(stream) => {
                info!("connected to notifier at {}", addr);
                // A fresh connection may have missed pushes while we were away.
                if !signal(&signals) {
                    return;
                }
                if let Err(e) = relay(stream, &signals).await {
                    warn!("notifier connection to {} lost: {}", addr, e);
                } else if signals.is_closed() {
                    return;
                } else {
                    warn!("notifier at {} closed the connection", addr);
                }
            }
            Err(e) => warn!("cannot reach notifier at {}: {}", addr, e),
        }

        tokio::select! {
            _ = tokio::time::sleep(reconnect) => {}
            _ = signals.closed() => return,
        }
    }
}

async fn connect(addr: &str, session_key: &str) -> std::io::Result<TcpStream> {
    let mut stream = TcpStream::connect(addr).await?;
    stream
        .write_all(format!("{}\n", session_key).as_bytes())
        .await?;
    stream.flush().await?;
    Ok(stream)
}

/// Read until EOF or until nobody is listening. `Ok` means a clean close.
async fn relay(mut stream: TcpStream, signals: &mpsc::Sender<()>) -> std::io::Result<()> {
    let mut buf = [0u8; 64];
    loop {
        let n = tokio::select! {
            n = stream.read(&mut buf) => n?,
            _ = signals.closed() => return Ok(()),
        };
        if n == 0 {
            return Ok(());
        }
        debug!("notifier pushed {} signal(s)", n);
        if !signal(signals) {
            return Ok(());
        }
    }
}

/// Coalescing send: a full channel already holds a pending signal.
fn signal(signals: &mpsc::Sender<()>) -> bool {
    !matches!(
        signals.try_send(()),
        Err(mpsc::error::TrySendError::Closed(()))
    )
}
