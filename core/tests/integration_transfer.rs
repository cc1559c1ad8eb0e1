// Integration test: chunked transfer end to end
//
// Framer and reassembler properties, then both engine actors wired together
// over in-process links, including lossy and corrupting ones.

use gattlink_core::engine::{pipe_to_receiver, pipe_to_sender, spawn_receiver, spawn_sender};
use gattlink_core::{
    ChannelId, Framer, MemoryLink, ReceiverNotice, Reassembler, SenderHandle, SenderNotice,
    TransferConfig, TransferError, TransferReport,
};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

type Wired = (
    SenderHandle,
    mpsc::Receiver<SenderNotice>,
    mpsc::Receiver<ReceiverNotice>,
);

/// Sender and receiver actors joined by two memory links.
///
/// Returns the links as well so tests can inject faults.
fn wired(config: TransferConfig) -> (Wired, MemoryLink, MemoryLink) {
    let (sender_link, sender_wire) = MemoryLink::new();
    let (receiver_link, receiver_wire) = MemoryLink::new();

    let (sender, sent) = spawn_sender(config.clone(), Arc::new(sender_link.clone())).unwrap();
    let (receiver, received) = spawn_receiver(config, Arc::new(receiver_link.clone())).unwrap();
    pipe_to_receiver(sender_wire, receiver);
    pipe_to_sender(receiver_wire, sender.clone());

    ((sender, sent, received), sender_link, receiver_link)
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 256) as u8).collect()
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #[test]
    fn roundtrip_any_delivery_order(
        data in proptest::collection::vec(any::<u8>(), 1..4000),
        unit in 5usize..300,
        seed in any::<u64>(),
    ) {
        let framer = Framer::new(&data, unit).unwrap();
        let mut frames = framer.all_frames();

        // Deterministic shuffle
        let mut state = seed | 1;
        for i in (1..frames.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            frames.swap(i, (state % (i as u64 + 1)) as usize);
        }

        let mut reassembler = Reassembler::new(data.len(), unit).unwrap();
        for frame in &frames {
            reassembler.add_chunk(frame).unwrap();
        }
        prop_assert!(reassembler.is_complete());
        prop_assert_eq!(reassembler.into_data(), data);
    }

    #[test]
    fn last_chunk_sizing(total in 1usize..20_000, unit in 5usize..600) {
        let data = vec![0xA5u8; total];
        let framer = Framer::new(&data, unit).unwrap();
        let effective = unit - 4;

        if total % effective == 0 {
            prop_assert_eq!(framer.chunk_count(), total / effective);
        } else {
            prop_assert_eq!(framer.chunk_count(), total / effective + 1);
        }
        let last = framer.chunk(framer.chunk_count() as u16).unwrap();
        let expected = total - (framer.chunk_count() - 1) * effective;
        prop_assert_eq!(last.payload.len(), expected);
        prop_assert!(!last.payload.is_empty());
    }

    #[test]
    fn report_pagination(missing in 1usize..1000, page in 1usize..120) {
        let all: Vec<u16> = (1..=missing as u16).collect();
        let report = TransferReport::missing_chunks(&all, page);

        prop_assert_eq!(report.missing.len(), missing.min(page));
        prop_assert_eq!(report.total_pages as usize, missing.div_ceil(page));
        prop_assert_eq!(TransferReport::from_bytes(&report.to_bytes()).unwrap(), report);
    }

    #[test]
    fn corruption_isolated_to_one_position(
        data in proptest::collection::vec(any::<u8>(), 200..2000),
        chunk in any::<prop::sample::Index>(),
        byte in any::<prop::sample::Index>(),
        mask in 1u8..=255,
    ) {
        let framer = Framer::new(&data, 64).unwrap();
        let target = chunk.index(framer.chunk_count()) as u16 + 1;
        let mut reassembler = Reassembler::new(data.len(), 64).unwrap();

        for seq in 1..=framer.chunk_count() as u16 {
            let mut frame = framer.frame(seq).unwrap();
            if seq == target {
                // Sequence number, payload or checksum alike
                let at = byte.index(frame.len());
                frame[at] ^= mask;
                prop_assert!(reassembler.add_chunk(&frame).is_err());
            } else {
                reassembler.add_chunk(&frame).unwrap();
            }
        }
        prop_assert_eq!(reassembler.missing_sequence_numbers(), vec![target]);

        reassembler.add_chunk(&framer.frame(target).unwrap()).unwrap();
        prop_assert_eq!(reassembler.into_data(), data);
    }
}

// ============================================================================
// ACTORS OVER MEMORY LINKS
// ============================================================================

fn config() -> TransferConfig {
    TransferConfig::new(100)
        .with_report_page_size(40)
        .with_pacing(Duration::ZERO)
}

#[tokio::test]
async fn test_clean_transfer() {
    let data = payload(5000);
    let (pair, sender_link, _) = wired(config());
    let (sender, mut sent, mut received) = pair;

    sender.send(data.clone()).await.unwrap();

    match timeout(Duration::from_secs(5), sent.recv()).await.unwrap() {
        Some(SenderNotice::Finished(Ok(summary))) => {
            assert_eq!(summary.total_bytes, 5000);
            assert_eq!(summary.chunk_count, 53);
            assert_eq!(summary.rounds, 0);
            assert_eq!(summary.retransmitted_chunks, 0);
        }
        other => panic!("unexpected notice {:?}", other),
    }
    assert_eq!(
        timeout(Duration::from_secs(5), received.recv()).await.unwrap(),
        Some(ReceiverNotice::Completed(data))
    );
    // size + 53 chunks + one report request
    assert_eq!(sender_link.write_count(), 55);
}

#[tokio::test]
async fn test_lossy_link_recovers() {
    let data = payload(3000);
    let (pair, sender_link, _) = wired(config());
    let (sender, mut sent, mut received) = pair;
    sender_link.drop_once([1, 5, 6, 32]);
    sender_link.corrupt_once([2, 17]);

    sender.send(data.clone()).await.unwrap();

    match timeout(Duration::from_secs(5), sent.recv()).await.unwrap() {
        Some(SenderNotice::Finished(Ok(summary))) => {
            assert_eq!(summary.rounds, 1);
            assert_eq!(summary.retransmitted_chunks, 6);
        }
        other => panic!("unexpected notice {:?}", other),
    }
    assert_eq!(
        timeout(Duration::from_secs(5), received.recv()).await.unwrap(),
        Some(ReceiverNotice::Completed(data))
    );
}

#[tokio::test]
async fn test_multi_page_loss_takes_several_rounds() {
    // 100 chunks lost, 40 reported per page
    let data = payload(96 * 120);
    let (pair, sender_link, _) = wired(config());
    let (sender, mut sent, mut received) = pair;
    sender_link.drop_once(1..=100);

    sender.send(data.clone()).await.unwrap();

    match timeout(Duration::from_secs(5), sent.recv()).await.unwrap() {
        Some(SenderNotice::Finished(Ok(summary))) => {
            assert_eq!(summary.rounds, 3);
            assert_eq!(summary.retransmitted_chunks, 100);
        }
        other => panic!("unexpected notice {:?}", other),
    }
    assert!(matches!(
        received.recv().await,
        Some(ReceiverNotice::Completed(bytes)) if bytes == data
    ));
}

#[tokio::test]
async fn test_dead_chunk_exhausts_retries() {
    let (pair, sender_link, _) = wired(config().with_max_stalled_rounds(3));
    let (sender, mut sent, mut received) = pair;
    sender_link.drop_always([4]);

    sender.send(payload(1000)).await.unwrap();

    assert_eq!(
        timeout(Duration::from_secs(5), sent.recv()).await.unwrap(),
        Some(SenderNotice::Finished(Err(TransferError::RetriesExhausted {
            rounds: 3
        })))
    );
    // The sender's abort signal reaches the receiver
    assert_eq!(
        timeout(Duration::from_secs(5), received.recv()).await.unwrap(),
        Some(ReceiverNotice::Failed(TransferError::PeerReportedError))
    );
}

#[tokio::test]
async fn test_lost_report_notification_times_out_sender() {
    let config = config().with_report_timeout(Duration::from_millis(50));
    let (pair, _, receiver_link) = wired(config);
    let (sender, mut sent, mut received) = pair;
    receiver_link.fail_writes_on(ChannelId::ReportResponse, "notify failed");

    sender.send(payload(500)).await.unwrap();

    assert!(matches!(
        timeout(Duration::from_secs(5), received.recv()).await.unwrap(),
        Some(ReceiverNotice::Completed(_))
    ));
    assert!(matches!(
        timeout(Duration::from_secs(5), received.recv()).await.unwrap(),
        Some(ReceiverNotice::Failed(TransferError::TransportWriteFailure {
            channel: ChannelId::ReportResponse,
            ..
        }))
    ));
    // Every re-request is lost the same way, so the sender gives up
    assert_eq!(
        timeout(Duration::from_secs(5), sent.recv()).await.unwrap(),
        Some(SenderNotice::Finished(Err(TransferError::ReportTimeout {
            requests: 3
        })))
    );

    // And is not wedged: a new payload is accepted, not rejected
    receiver_link.restore_writes();
    sender.send(payload(200)).await.unwrap();
    assert!(matches!(
        timeout(Duration::from_secs(5), sent.recv()).await.unwrap(),
        Some(SenderNotice::Finished(Ok(_)))
    ));
}

#[tokio::test]
async fn test_paced_stream_holds_queue() {
    let config = config().with_pacing(Duration::from_millis(2));
    let (pair, sender_link, _) = wired(config);
    let (sender, mut sent, _received) = pair;

    sender.send(payload(96 * 10)).await.unwrap();
    // Queued behind the paced stream
    sender.cancel().await.unwrap();

    assert_eq!(
        timeout(Duration::from_secs(5), sent.recv()).await.unwrap(),
        Some(SenderNotice::Finished(Err(TransferError::Cancelled)))
    );
    // size + 10 chunks + report request + abort signal: the stream was never cut short
    assert_eq!(sender_link.write_count(), 13);
}

#[tokio::test]
async fn test_pipes_route_by_channel() {
    let (sender_link, sender_wire) = MemoryLink::new();
    let (receiver_link, receiver_wire) = MemoryLink::new();
    let (sender, mut sent) = spawn_sender(config(), Arc::new(sender_link)).unwrap();
    let (receiver, mut received) = spawn_receiver(config(), Arc::new(receiver_link)).unwrap();
    pipe_to_receiver(sender_wire, receiver);
    pipe_to_sender(receiver_wire, sender.clone());

    sender.send(vec![9u8; 10]).await.unwrap();
    assert!(matches!(
        timeout(Duration::from_secs(5), sent.recv()).await.unwrap(),
        Some(SenderNotice::Finished(Ok(_)))
    ));
    assert_eq!(
        received.recv().await,
        Some(ReceiverNotice::Completed(vec![9u8; 10]))
    );
}
