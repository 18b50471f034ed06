//! Fan-in of a changing set of signal sources into one output channel.
//!
//! Every in-flight task owns two one-shot signals (done and error). The
//! orchestrator cannot wait on thousands of receivers individually, so each
//! signal is registered here and the multiplexer forwards whichever fires.
//! Sources live in a `FuturesUnordered`, so adding or retiring one never
//! scans the rest.

use futures::stream::{BoxStream, FuturesUnordered, StreamExt, StreamFuture};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// A signal source: any stream of values.
pub type Source<T> = BoxStream<'static, T>;

/// Handle for adding sources to a running multiplexer.
///
/// The wait loop keeps running while any registrar is alive or any source is
/// still pending.
pub struct FanInRegistrar<T> {
    tx: mpsc::UnboundedSender<Source<T>>,
}

impl<T> Clone for FanInRegistrar<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send + 'static> FanInRegistrar<T> {
    /// Add a source. Returns false if the multiplexer has shut down.
    pub fn register(&self, source: Source<T>) -> bool {
        self.tx.send(source).is_ok()
    }

    pub fn register_oneshot(&self, rx: oneshot::Receiver<T>) -> bool {
        self.register(oneshot_source(rx))
    }
}

/// Adapt a one-shot receiver. A sender dropped without sending yields an
/// empty stream, so the source is retired without producing anything.
pub fn oneshot_source<T: Send + 'static>(rx: oneshot::Receiver<T>) -> Source<T> {
    async_stream::stream! {
        if let Ok(value) = rx.await {
            yield value;
        }
    }
    .boxed()
}

/// Start a multiplexer on its own task.
///
/// With `remove_on_fire` a source is dropped after its first value,
/// otherwise it stays registered until it closes. `idle_tick` only paces the
/// liveness check of the output channel while nothing is firing.
pub fn multiplex<T: Send + 'static>(
    capacity: usize,
    remove_on_fire: bool,
    idle_tick: Duration,
) -> (FanInRegistrar<T>, mpsc::Receiver<T>) {
    let (reg_tx, reg_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(wait_loop(reg_rx, out_tx, remove_on_fire, idle_tick));
    (FanInRegistrar { tx: reg_tx }, out_rx)
}

async fn wait_loop<T: Send + 'static>(
    mut registrations: mpsc::UnboundedReceiver<Source<T>>,
    out: mpsc::Sender<T>,
    remove_on_fire: bool,
    idle_tick: Duration,
) {
    let mut pending: FuturesUnordered<StreamFuture<Source<T>>> = FuturesUnordered::new();
    let mut registrations_open = true;
    let mut ticker = tokio::time::interval(idle_tick.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            source = registrations.recv(), if registrations_open => match source {
                Some(source) => pending.push(source.into_future()),
                None => registrations_open = false,
            },
            Some((value, rest)) = pending.next(), if !pending.is_empty() => {
                if let Some(value) = value {
                    if !forward(&out, value) {
                        debug!("fan-in output closed, stopping");
                        return;
                    }
                    if !remove_on_fire {
                        pending.push(rest.into_future());
                    }
                }
            }
            _ = ticker.tick() => {
                if out.is_closed() {
                    debug!("fan-in output closed, stopping");
                    return;
                }
                trace!(pending = pending.len(), "fan-in idle");
            }
        }

        if !registrations_open && pending.is_empty() {
            return;
        }
    }
}

/// Deliver without blocking the wait loop: a full channel gets a spawned
/// hand-off per value.
fn forward<T: Send + 'static>(out: &mpsc::Sender<T>, value: T) -> bool {
    match out.try_send(value) {
        Ok(()) => true,
        Err(TrySendError::Full(value)) => {
            let out = out.clone();
            tokio::spawn(async move {
                let _ = out.send(value).await;
            });
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tokio::time::timeout;
    use tokio_stream::wrappers::ReceiverStream;

    const TICK: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn test_every_fired_source_delivered_once() {
        let (registrar, mut out) = multiplex::<usize>(4, true, TICK);
        let mut senders = Vec::new();
        for _ in 0..100 {
            let (tx, rx) = oneshot::channel();
            assert!(registrar.register_oneshot(rx));
            senders.push(tx);
        }
        for (i, tx) in senders.into_iter().enumerate() {
            tx.send(i).unwrap();
        }
        drop(registrar);

        let mut seen = HashSet::new();
        while let Some(v) = timeout(Duration::from_secs(5), out.recv()).await.unwrap() {
            assert!(seen.insert(v), "value {} delivered twice", v);
        }
        assert_eq!(seen.len(), 100);
    }

    #[tokio::test]
    async fn test_zero_idle_tick_still_delivers() {
        let (registrar, mut out) = multiplex::<u32>(4, true, Duration::ZERO);
        let (tx, rx) = oneshot::channel();
        registrar.register_oneshot(rx);
        tx.send(7).unwrap();

        let v = timeout(Duration::from_secs(1), out.recv()).await.unwrap();
        assert_eq!(v, Some(7));
    }

    #[tokio::test]
    async fn test_unfired_source_produces_nothing() {
        let (registrar, mut out) = multiplex::<u32>(4, true, TICK);
        let (_quiet_tx, quiet_rx) = oneshot::channel::<u32>();
        let (dropped_tx, dropped_rx) = oneshot::channel::<u32>();
        registrar.register_oneshot(quiet_rx);
        registrar.register_oneshot(dropped_rx);
        drop(dropped_tx);

        assert!(timeout(Duration::from_millis(100), out.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_closed_sources_are_retired() {
        let (registrar, mut out) = multiplex::<u32>(4, true, TICK);
        let (tx, rx) = oneshot::channel::<u32>();
        registrar.register_oneshot(rx);
        drop(tx);
        drop(registrar);

        let next = timeout(Duration::from_secs(1), out.recv()).await.unwrap();
        assert_eq!(next, None);
    }

    #[tokio::test]
    async fn test_sources_added_while_waiting() {
        let (registrar, mut out) = multiplex::<&'static str>(4, true, TICK);
        let (_idle_tx, idle_rx) = oneshot::channel();
        registrar.register_oneshot(idle_rx);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let (tx, rx) = oneshot::channel();
        registrar.register_oneshot(rx);
        tx.send("late").unwrap();

        let v = timeout(Duration::from_secs(1), out.recv()).await.unwrap();
        assert_eq!(v, Some("late"));
    }

    #[tokio::test]
    async fn test_persistent_sources_deliver_every_value() {
        let (registrar, mut out) = multiplex::<u32>(1, false, TICK);
        let (tx, rx) = mpsc::channel(8);
        registrar.register(ReceiverStream::new(rx).boxed());
        drop(registrar);
        for i in 0..5 {
            tx.send(i).await.unwrap();
        }
        drop(tx);

        let mut values = Vec::new();
        while let Some(v) = timeout(Duration::from_secs(1), out.recv()).await.unwrap() {
            values.push(v);
        }
        values.sort();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
    }
}
