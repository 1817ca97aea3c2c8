use bytes::Bytes;
use drop_core::channel::memory;
use drop_core::config::{SendLimits, TransferConfig};
use drop_core::transfer::{ControlMessage, TransferReceiver, TransferSender};
use drop_core::{AppEvent, ChannelMessage, FileMetadata, OutgoingFile, TransferError, TransferState};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn patterned(len: usize) -> Bytes {
    Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
}

fn drain(rx: &mut mpsc::Receiver<AppEvent>) -> Vec<AppEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn progress_of(events: &[AppEvent], sending: bool) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            AppEvent::TransferProgress { progress, is_sending, .. } if *is_sending == sending => {
                Some(*progress)
            }
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_files_round_trip_byte_exact() {
    let (mut a, mut b) = memory::pair(64);
    let (send_tx, mut send_rx) = mpsc::channel(1024);
    let (recv_tx, mut recv_rx) = mpsc::channel(1024);

    let photo = OutgoingFile::from_bytes("photo.png", "image/png", patterned(3_000_000));
    let note = OutgoingFile::from_bytes("note.txt", "text/plain", Bytes::from_static(b"hello"));
    let files = vec![photo.clone(), note.clone()];

    let receiving = tokio::spawn(async move {
        let mut receiver = TransferReceiver::new(recv_tx);
        let count = receiver.run(&mut b).await;
        (count, receiver.take_received())
    });

    let mut sender = TransferSender::new(TransferConfig::default(), SendLimits::default(), send_tx);
    sender
        .send_files(&mut a, &files, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(sender.state(), TransferState::Acknowledged);

    let (count, received) = receiving.await.unwrap();
    assert_eq!(count.unwrap(), 2);
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].metadata, FileMetadata::new("photo.png", 3_000_000, "image/png"));
    assert_eq!(received[0].data, photo.data);
    assert_eq!(received[1].metadata, note.metadata);
    assert_eq!(received[1].data, note.data);

    let sent_events = drain(&mut send_rx);
    let progress = progress_of(&sent_events, true);
    assert_eq!(progress.first(), Some(&0));
    assert_eq!(progress.last(), Some(&100));
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert!(sent_events.iter().any(|e| matches!(e, AppEvent::TransferCompleted { files: 2 })));

    // Receiver progress is per file and restarts at 0 for the next one
    let recv_events = drain(&mut recv_rx);
    let progress = progress_of(&recv_events, false);
    let restart = progress.iter().skip(1).position(|p| *p == 0).map(|i| i + 1).unwrap();
    assert_eq!(progress[restart - 1], 100);
    assert_eq!(progress.last(), Some(&100));
    let received_names: Vec<_> = recv_events
        .iter()
        .filter_map(|e| match e {
            AppEvent::FileReceived(f) => Some(f.metadata.name.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(received_names, vec!["photo.png", "note.txt"]);
}

#[tokio::test]
async fn test_small_watermarks_and_ack_per_file() {
    let (mut a, mut b) = memory::pair(2);
    let (send_tx, _send_rx) = mpsc::channel(4096);
    let (recv_tx, _recv_rx) = mpsc::channel(4096);

    let config = TransferConfig {
        chunk_size: 1024,
        high_water_mark: 4096,
        low_water_mark: 1024,
        backpressure_timeout_secs: Some(5),
        wait_for_ack_per_file: true,
    };
    let files: Vec<_> = (0..3)
        .map(|i| OutgoingFile::from_bytes(format!("f{}.bin", i), "application/octet-stream", patterned(50_000 + i)))
        .collect();

    let receiving = tokio::spawn(async move {
        let mut receiver = TransferReceiver::new(recv_tx);
        receiver.run(&mut b).await.unwrap();
        receiver.take_received()
    });

    let mut sender = TransferSender::new(config, SendLimits::default(), send_tx);
    sender
        .send_files(&mut a, &files, &CancellationToken::new())
        .await
        .unwrap();

    let received = receiving.await.unwrap();
    assert_eq!(received.len(), 3);
    for (sent, got) in files.iter().zip(&received) {
        assert_eq!(sent.data, got.data);
    }
}

#[tokio::test]
async fn test_empty_file_reports_100() {
    let (mut a, mut b) = memory::pair(8);
    let (send_tx, mut send_rx) = mpsc::channel(64);
    let (recv_tx, _recv_rx) = mpsc::channel(64);

    let receiving = tokio::spawn(async move {
        let mut receiver = TransferReceiver::new(recv_tx);
        receiver.run(&mut b).await.unwrap();
        receiver.take_received()
    });

    let files = vec![OutgoingFile::from_bytes("empty.png", "image/png", Bytes::new())];
    let mut sender = TransferSender::new(TransferConfig::default(), SendLimits::default(), send_tx);
    sender.send_files(&mut a, &files, &CancellationToken::new()).await.unwrap();

    let received = receiving.await.unwrap();
    assert_eq!(received[0].metadata.size, 0);
    assert_eq!(progress_of(&drain(&mut send_rx), true), vec![0, 100]);
}

#[tokio::test]
async fn test_receiver_aborts_when_sender_vanishes_mid_file() {
    let (peer, mut b) = memory::pair(64);
    let (recv_tx, mut recv_rx) = mpsc::channel(1024);

    let receiving = tokio::spawn(async move {
        let mut receiver = TransferReceiver::new(recv_tx);
        let result = receiver.run(&mut b).await;
        (result, receiver.received_files().len(), receiver.state())
    });

    // Metadata plus roughly 10% of the chunks, then gone
    let metadata = FileMetadata::new("photo.png", 3_000_000, "image/png");
    let json = serde_json::to_string(&ControlMessage::Metadata(metadata)).unwrap();
    peer.send(ChannelMessage::Text(json)).unwrap();
    for _ in 0..5 {
        peer.send(ChannelMessage::Binary(Bytes::from(vec![0u8; 65536]))).unwrap();
    }

    // Wait until the receiver saw some of it
    tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(event) = recv_rx.recv().await {
            if matches!(event, AppEvent::TransferProgress { progress, .. } if progress > 0) {
                break;
            }
        }
    })
    .await
    .unwrap();
    drop(peer);

    let (result, received, state) = receiving.await.unwrap();
    assert!(matches!(result, Err(TransferError::PeerDisconnected)));
    assert_eq!(received, 0);
    assert_eq!(state, TransferState::Aborted);
}

#[tokio::test]
async fn test_sender_aborts_when_receiver_vanishes() {
    let (mut a, mut b) = memory::pair(4);
    let (send_tx, mut send_rx) = mpsc::channel(1024);

    tokio::spawn(async move {
        // Read the announcement, then leave
        let _ = b.recv().await;
        drop(b);
    });

    let files = vec![OutgoingFile::from_bytes("photo.png", "image/png", patterned(3_000_000))];
    let mut sender = TransferSender::new(TransferConfig::default(), SendLimits::default(), send_tx);
    let result = sender.send_files(&mut a, &files, &CancellationToken::new()).await;

    assert!(matches!(result, Err(TransferError::PeerDisconnected)));
    assert_eq!(sender.state(), TransferState::Aborted);
    assert!(a.is_closed());
    assert!(drain(&mut send_rx).iter().any(|e| matches!(e, AppEvent::TransferFailed(_))));
}

#[tokio::test]
async fn test_cancel_aborts_sender() {
    let (mut a, _b) = memory::pair(1);
    let (send_tx, _send_rx) = mpsc::channel(1024);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let files = vec![OutgoingFile::from_bytes("photo.png", "image/png", patterned(10_000))];
    let mut sender = TransferSender::new(TransferConfig::default(), SendLimits::default(), send_tx);
    let result = sender.send_files(&mut a, &files, &cancel).await;
    assert!(matches!(result, Err(TransferError::PeerDisconnected)));
}

#[tokio::test]
async fn test_limits_reject_before_sending() {
    let (mut a, mut b) = memory::pair(4);
    let (send_tx, _send_rx) = mpsc::channel(16);
    let limits = SendLimits {
        max_files: Some(2),
        max_file_size: Some(2 * 1024 * 1024),
        allowed_mime_prefix: Some("image/".to_string()),
    };

    let files = vec![OutgoingFile::from_bytes("doc.pdf", "application/pdf", patterned(10))];
    let mut sender = TransferSender::new(TransferConfig::default(), limits, send_tx);
    let result = sender.send_files(&mut a, &files, &CancellationToken::new()).await;

    assert!(matches!(result, Err(TransferError::Rejected(_))));
    assert_eq!(sender.state(), TransferState::Idle);
    assert!(tokio::time::timeout(Duration::from_millis(50), b.recv()).await.is_err());
}

#[tokio::test]
async fn test_receiver_overflow_closes_both_ends() {
    let (mut peer, mut b) = memory::pair(8);
    let (recv_tx, mut recv_rx) = mpsc::channel(64);

    let receiving = tokio::spawn(async move {
        let mut receiver = TransferReceiver::new(recv_tx);
        let result = receiver.run(&mut b).await;
        (result, b.is_closed(), receiver.state())
    });

    let metadata = FileMetadata::new("tiny.png", 2, "image/png");
    let json = serde_json::to_string(&ControlMessage::Metadata(metadata)).unwrap();
    peer.send(ChannelMessage::Text(json)).unwrap();
    peer.send(ChannelMessage::Binary(Bytes::from_static(b"abc"))).unwrap();

    let (result, receiver_closed, state) = receiving.await.unwrap();
    assert!(matches!(result, Err(TransferError::Protocol(_))));
    assert!(receiver_closed);
    assert_eq!(state, TransferState::Aborted);

    // The sending side sees the close instead of waiting for an ack
    let next = tokio::time::timeout(Duration::from_secs(1), peer.recv()).await.unwrap();
    assert_eq!(next, None);
    assert!(peer.is_closed());
    assert!(drain(&mut recv_rx).iter().any(|e| matches!(e, AppEvent::TransferFailed(_))));
}

#[tokio::test]
async fn test_cancel_while_waiting_for_acks() {
    let (mut a, mut b) = memory::pair(64);
    let (send_tx, mut send_rx) = mpsc::channel(1024);
    let cancel = CancellationToken::new();

    // Swallow everything without acking, then report the peer gone
    let peer_cancel = cancel.clone();
    let peer = tokio::spawn(async move {
        while let Some(msg) = b.recv().await {
            if let ChannelMessage::Text(text) = &msg {
                if matches!(serde_json::from_str::<ControlMessage>(text), Ok(ControlMessage::Completed)) {
                    break;
                }
            }
        }
        peer_cancel.cancel();
        b
    });

    let files = vec![OutgoingFile::from_bytes("photo.png", "image/png", patterned(200_000))];
    let mut sender = TransferSender::new(TransferConfig::default(), SendLimits::default(), send_tx);
    let result = tokio::time::timeout(Duration::from_secs(2), sender.send_files(&mut a, &files, &cancel))
        .await
        .unwrap();

    assert!(matches!(result, Err(TransferError::PeerDisconnected)));
    assert_eq!(sender.state(), TransferState::Aborted);
    assert!(a.is_closed());
    let events = drain(&mut send_rx);
    assert!(events.iter().any(|e| matches!(e, AppEvent::FileSent { .. })));
    assert!(events.iter().any(|e| matches!(e, AppEvent::TransferFailed(_))));
    drop(peer.await.unwrap());
}

#[tokio::test]
async fn test_closed_channel_fails_before_announcing() {
    let (mut a, b) = memory::pair(4);
    let (send_tx, mut send_rx) = mpsc::channel(16);
    drop(b);
    tokio::time::timeout(Duration::from_secs(1), a.sender().closed()).await.unwrap();

    let files = vec![OutgoingFile::from_bytes("photo.png", "image/png", patterned(10))];
    let mut sender = TransferSender::new(TransferConfig::default(), SendLimits::default(), send_tx);
    let result = sender.send_files(&mut a, &files, &CancellationToken::new()).await;

    assert!(matches!(result, Err(TransferError::PeerDisconnected)));
    assert_eq!(sender.state(), TransferState::Idle);
    assert!(drain(&mut send_rx).is_empty());
}
