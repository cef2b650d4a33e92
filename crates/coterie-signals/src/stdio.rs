use coterie_types::Signal;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::SignalResult;

/// Serializes one `Signal` as a single JSON line (newline-terminated) and
/// writes it to a child worker's piped stdin.
pub async fn write_signal<W: AsyncWrite + Unpin>(writer: &mut W, signal: &Signal) -> SignalResult<()> {
    let mut line = serde_json::to_string(signal)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Drains a child worker's piped stdout line by line, forwarding each
/// successfully parsed `Signal` to `sink`. Mirrors the teacher's
/// always-drain-stdio discipline (an unread pipe can deadlock the child
/// once its OS buffer fills) but parses JSON instead of treating every line
/// as an opaque log line. A line that isn't valid JSON is logged and
/// skipped rather than ending the stream, since one corrupted line from a
/// flaky worker shouldn't sever its entire signal channel.
pub async fn drain_signal_lines<R>(reader: R, sink: tokio::sync::mpsc::Sender<Signal>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Signal>(&line) {
                    Ok(signal) => {
                        if sink.send(signal).await.is_err() {
                            tracing::warn!("signal sink closed, stopping stdio drain");
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(line, error = %err, "skipping malformed signal line");
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "error reading worker stdout, stopping drain");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coterie_types::SignalType;

    #[tokio::test]
    async fn write_then_drain_round_trips_a_signal() {
        let signal = Signal::heartbeat("worker-1", "supervisor", 42, "working");
        let mut buffer: Vec<u8> = Vec::new();
        write_signal(&mut buffer, &signal).await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        drain_signal_lines(buffer.as_slice(), tx).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.signal_type, SignalType::Heartbeat);
        assert_eq!(received.sender, "worker-1");
    }

    #[tokio::test]
    async fn malformed_line_is_skipped_not_fatal() {
        let input = b"not json\n{\"signal_type\":\"shutdown\",\"sender\":\"a\",\"target\":\"b\",\"timestamp\":\"2024-01-01T00:00:00Z\",\"payload\":null}\n";
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        drain_signal_lines(&input[..], tx).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.signal_type, SignalType::Shutdown);
    }
}
