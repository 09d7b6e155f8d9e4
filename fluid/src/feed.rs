//! Result feed: framed result envelopes from a stream into the tracker.

use std::io;

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use crate::envelope::ResultEnvelope;
use crate::envelope::frame::EnvelopeCodec;
use crate::tracker::{Applied, TaskEvent, TaskTracker};

/// Counters for one feed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    /// Results that moved a record to a terminal state.
    pub delivered: usize,
    /// Results for ids this client never issued.
    pub unknown: usize,
    /// Results for records already terminal.
    pub rejected: usize,
    /// Frames whose body failed to decode.
    pub malformed: usize,
}

/// Apply every result read from `reader` until EOF.
///
/// Malformed frames and unknown ids are counted and skipped; only an I/O
/// error on the transport ends the feed early.
pub async fn run_result_feed<R>(reader: R, tracker: &TaskTracker) -> io::Result<FeedStats>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(reader, EnvelopeCodec::<ResultEnvelope>::new());
    let mut stats = FeedStats::default();

    while let Some(frame) = frames.next().await {
        let result = match frame? {
            Ok(ResultEnvelope::ResultsMsg(result)) => result,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed result frame");
                stats.malformed += 1;
                continue;
            }
        };

        match tracker.apply(TaskEvent::Completed(result)) {
            Applied::Transitioned { .. } => stats.delivered += 1,
            Applied::UnknownId => stats.unknown += 1,
            Applied::Rejected { .. } => stats.rejected += 1,
        }
    }

    tracing::debug!(?stats, "Result feed reached end of stream");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::SinkExt;
    use tokio::io::AsyncWriteExt;
    use tokio_util::bytes::Bytes;
    use tokio_util::codec::FramedWrite;

    use crate::envelope::{TaskKind, TaskResult};
    use crate::tracker::TaskState;

    fn result(id: &str, value: &'static [u8]) -> ResultEnvelope {
        ResultEnvelope::ResultsMsg(TaskResult::new(id, value))
    }

    #[tokio::test]
    async fn feeds_results_into_tracker() {
        let tracker = TaskTracker::new();
        tracker.register("a".to_string(), TaskKind::R).unwrap();
        tracker.register("b".to_string(), TaskKind::Julia).unwrap();

        let (client, server) = tokio::io::duplex(1024);
        let writer = tokio::spawn(async move {
            let mut frames = FramedWrite::new(server, EnvelopeCodec::<ResultEnvelope>::new());
            frames.send(result("a", b"1")).await.unwrap();
            frames.send(result("ghost", b"?")).await.unwrap();
            frames.send(result("b", b"2")).await.unwrap();
            frames.send(result("a", b"again")).await.unwrap();
        });

        let stats = run_result_feed(client, &tracker).await.unwrap();
        writer.await.unwrap();

        assert_eq!(
            stats,
            FeedStats {
                delivered: 2,
                unknown: 1,
                rejected: 1,
                malformed: 0
            }
        );
        assert_eq!(
            tracker.state("a"),
            Some(TaskState::Complete(Bytes::from_static(b"1")))
        );
        assert_eq!(
            tracker.state("b"),
            Some(TaskState::Complete(Bytes::from_static(b"2")))
        );
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped() {
        let tracker = TaskTracker::new();
        tracker.register("a".to_string(), TaskKind::R).unwrap();

        let (client, mut server) = tokio::io::duplex(1024);
        // Length 1, union index 1.
        server.write_all(&[0, 0, 0, 1, 0x02]).await.unwrap();
        let mut frames = FramedWrite::new(server, EnvelopeCodec::<ResultEnvelope>::new());
        frames.send(result("a", b"ok")).await.unwrap();
        drop(frames);

        let stats = run_result_feed(client, &tracker).await.unwrap();
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.delivered, 1);
    }

    #[tokio::test]
    async fn stream_ending_mid_frame_is_an_error() {
        let tracker = TaskTracker::new();
        let (client, mut server) = tokio::io::duplex(64);
        server.write_all(&[0, 0, 0, 9, 0x00]).await.unwrap();
        drop(server);

        assert!(run_result_feed(client, &tracker).await.is_err());
    }
}
