//! Stream tap: decode lines from a reader and copy them to a writer.
//!
//! The decoder runs on its own task; this side consumes its events, writes
//! decoded lines, and cancels the decoder on shutdown or idle timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use linewire_core::config::DecoderConfig;
use linewire_core::{ChannelSink, DecoderEvent, DecoderOutcome, LineDecoder, StreamLineSource};

/// Tap configuration.
#[derive(Debug, Clone, Default)]
pub struct TapConfig {
    /// Decoder limits and escape handling.
    pub decoder: DecoderConfig,
    /// Cancel the decoder when no line arrives for this long.
    pub idle_timeout: Option<Duration>,
}

/// Errors from running the tap.
#[derive(Debug, thiserror::Error)]
pub enum TapError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write decoded line: {0}")]
    Output(#[from] std::io::Error),

    #[error("Decoder task failed: {0}")]
    Task(String),
}

/// Connect to `addr` and tap the TCP stream.
pub async fn tap_tcp<W>(
    addr: &str,
    out: W,
    config: &TapConfig,
    shutdown: CancellationToken,
) -> Result<DecoderOutcome, TapError>
where
    W: AsyncWrite + Unpin,
{
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| TapError::Connect {
            addr: addr.to_string(),
            source,
        })?;
    info!(addr, "Connected");
    tap(stream, out, config, shutdown).await
}

/// Decode every line from `reader` and write it, LF-terminated, to `out`.
///
/// Returns when the decoder stops: the peer closed the stream, the
/// transport failed, `shutdown` fired, or the idle timeout elapsed.
pub async fn tap<R, W>(
    reader: R,
    mut out: W,
    config: &TapConfig,
    shutdown: CancellationToken,
) -> Result<DecoderOutcome, TapError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let source = StreamLineSource::from_config(reader, &config.decoder);
    let mut decoder = LineDecoder::with_config(source, &config.decoder);
    let (sink, mut events) = ChannelSink::channel();
    decoder.subscribe(sink);
    let decoder = Arc::new(decoder);

    let mut runner = tokio::spawn({
        let decoder = Arc::clone(&decoder);
        async move { decoder.run().await }
    });

    let idle_limit = config.idle_timeout;
    let idle = tokio::time::sleep(idle_limit.unwrap_or_default());
    tokio::pin!(idle);

    let outcome = loop {
        tokio::select! {
            biased;
            Some(event) = events.recv() => {
                if matches!(event, DecoderEvent::Activity)
                    && let Some(limit) = idle_limit
                {
                    idle.as_mut().reset(Instant::now() + limit);
                }
                write_event(&mut out, event).await?;
            }
            res = &mut runner => {
                let outcome = res.map_err(|e| TapError::Task(e.to_string()))?;
                while let Ok(event) = events.try_recv() {
                    write_event(&mut out, event).await?;
                }
                break outcome;
            }
            () = shutdown.cancelled(), if !decoder.is_cancelled() => {
                info!("Shutdown requested, cancelling decoder");
                decoder.cancel();
            }
            () = &mut idle, if idle_limit.is_some() && !decoder.is_cancelled() => {
                warn!(timeout = ?idle_limit, "No line received before idle timeout");
                decoder.cancel();
            }
        }
    };

    out.flush().await?;
    decoder.dispose();
    Ok(outcome)
}

async fn write_event<W>(out: &mut W, event: DecoderEvent) -> Result<(), TapError>
where
    W: AsyncWrite + Unpin,
{
    match event {
        DecoderEvent::Activity => {}
        DecoderEvent::Line(line) => {
            out.write_all(&line).await?;
            out.write_all(b"\n").await?;
        }
        DecoderEvent::Disconnected(reason) => {
            debug!(%reason, "Stream disconnected");
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use linewire_core::DisconnectReason;

    #[tokio::test]
    async fn copies_decoded_lines_until_eof() {
        let input: &[u8] = b"EHLO a\r\nBODY one\\ntwo\r\n";
        let mut out = Vec::new();

        let outcome = tap(input, &mut out, &TapConfig::default(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, DecoderOutcome::Disconnected(DisconnectReason::Expected));
        assert_eq!(out, b"EHLO a\nBODY one\ntwo\n");
    }

    #[tokio::test]
    async fn raw_mode_keeps_escapes() {
        let input: &[u8] = b"a\\nb\n";
        let mut out = Vec::new();
        let config = TapConfig {
            decoder: DecoderConfig {
                process_escapes: false,
                ..DecoderConfig::default()
            },
            idle_timeout: None,
        };

        tap(input, &mut out, &config, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, b"a\\nb\n");
    }

    #[tokio::test]
    async fn idle_timeout_cancels_silent_stream() {
        let (_peer, reader) = tokio::io::duplex(64);
        let mut out = Vec::new();
        let config = TapConfig {
            idle_timeout: Some(Duration::from_millis(30)),
            ..TapConfig::default()
        };

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            tap(reader, &mut out, &config, CancellationToken::new()),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(outcome, DecoderOutcome::Cancelled);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn shutdown_token_stops_tap() {
        let (_peer, reader) = tokio::io::duplex(64);
        let mut out = Vec::new();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            tap(reader, &mut out, &TapConfig::default(), shutdown),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(outcome, DecoderOutcome::Cancelled);
    }

    #[tokio::test]
    async fn unreachable_peer_is_connect_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = tap_tcp(
            &addr,
            Vec::new(),
            &TapConfig::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TapError::Connect { .. }));
    }

    #[tokio::test]
    async fn tcp_peer_lines_are_tapped() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"220 ready\r\n250 ok\r\n").await.unwrap();
        });

        let mut out = Vec::new();
        let outcome = tap_tcp(&addr, &mut out, &TapConfig::default(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, DecoderOutcome::Disconnected(DisconnectReason::Expected));
        assert_eq!(out, b"220 ready\n250 ok\n");
    }
}
