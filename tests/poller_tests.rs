mod support;

use boxsync::model::{FileAction, FileRecord, PullResponse};
use boxsync::poller::RemotePoller;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use support::{MockTransport, RecordingSink};
use tokio::sync::mpsc;
use tokio::time::timeout;

fn action(id: i64, is_create: bool, path: &str, hash: &str) -> FileAction {
    FileAction {
        id,
        client_id: 7,
        is_create,
        file: FileRecord::at_path(path).with_hash(hash),
        ..FileAction::default()
    }
}

#[tokio::test]
async fn test_pull_compacts_and_advances_cursor() {
    let transport = Arc::new(MockTransport::new());
    transport.queue_pull(PullResponse {
        last_id: 14,
        file_actions: vec![
            action(11, true, "tmp.txt", "h1"),
            action(12, true, "keep.txt", "h2"),
            action(13, false, "tmp.txt", "h1"),
            action(14, true, "other.txt", "h3"),
        ],
    });
    let sink = RecordingSink::default();
    let mut poller = RemotePoller::new(transport.clone(), 10, Duration::from_secs(60));

    let dispatched = poller.pull_once(&sink).await.unwrap();

    assert_eq!(dispatched, 2);
    assert_eq!(sink.paths(), vec!["keep.txt", "other.txt"]);
    assert!(sink.events.lock().unwrap().iter().all(|e| !e.is_local));
    assert_eq!(*sink.cursors.lock().unwrap(), vec![14]);
    assert_eq!(poller.last_action_id(), 14);
    assert_eq!(*transport.pulled_from.lock().unwrap(), vec![10]);
}

#[tokio::test]
async fn test_failed_pull_keeps_cursor() {
    let transport = Arc::new(MockTransport::new());
    transport.fail_pulls.store(true, Ordering::SeqCst);
    let sink = RecordingSink::default();
    let mut poller = RemotePoller::new(transport.clone(), 5, Duration::from_secs(60));

    assert!(poller.pull_once(&sink).await.is_err());
    assert_eq!(poller.last_action_id(), 5);
    assert!(sink.cursors.lock().unwrap().is_empty());

    transport.fail_pulls.store(false, Ordering::SeqCst);
    poller.pull_once(&sink).await.unwrap();
    assert_eq!(*transport.pulled_from.lock().unwrap(), vec![5]);
}

#[tokio::test]
async fn test_empty_pull_leaves_cursor() {
    let transport = Arc::new(MockTransport::new());
    let sink = RecordingSink::default();
    let mut poller = RemotePoller::new(transport, 3, Duration::from_secs(60));

    assert_eq!(poller.pull_once(&sink).await.unwrap(), 0);
    assert!(sink.cursors.lock().unwrap().is_empty());
    assert_eq!(poller.last_action_id(), 3);
}

#[tokio::test]
async fn test_cursor_taken_from_action_ids() {
    let transport = Arc::new(MockTransport::new());
    transport.queue_pull(PullResponse {
        last_id: 0,
        file_actions: vec![action(21, true, "a.txt", "h"), action(22, true, "b.txt", "h")],
    });
    let sink = RecordingSink::default();
    let mut poller = RemotePoller::new(transport, 20, Duration::from_secs(60));

    poller.pull_once(&sink).await.unwrap();
    assert_eq!(poller.last_action_id(), 22);
    assert_eq!(*sink.cursors.lock().unwrap(), vec![22]);
}

#[tokio::test]
async fn test_push_signal_triggers_pull() {
    let transport = Arc::new(MockTransport::new());
    let sink = Arc::new(RecordingSink::default());
    let (signals, signal_rx) = mpsc::channel(1);
    let poller = RemotePoller::new(transport.clone(), 0, Duration::from_secs(3600));
    let running = tokio::spawn(poller.run(signal_rx, sink.clone()));

    // The startup pull happens without any signal.
    wait_for_pulls(&transport, 1).await;

    transport.queue_pull(PullResponse {
        last_id: 1,
        file_actions: vec![action(1, true, "pushed.txt", "h")],
    });
    signals.send(()).await.unwrap();
    wait_for_pulls(&transport, 2).await;

    timeout(Duration::from_secs(5), async {
        while sink.cursors.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(sink.paths(), vec!["pushed.txt"]);

    running.abort();
}

async fn wait_for_pulls(transport: &MockTransport, count: usize) {
    timeout(Duration::from_secs(5), async {
        while transport.pulled_from.lock().unwrap().len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("pull did not happen");
}
