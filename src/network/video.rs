use std::{net::SocketAddr, time::Duration};

use bytes::Bytes;
use futures::SinkExt;
use shared::framing;
use tokio::{
    io::AsyncReadExt,
    net::{TcpListener, TcpStream},
    sync::broadcast::{self, error::RecvError},
};
use tokio_util::{codec::FramedWrite, sync::CancellationToken, task::TaskTracker};

use super::{Error, Result};

/// Accepts video clients until `shutdown` is cancelled. Every client
/// receives the frames published on `frames` from the moment it connects.
pub async fn serve(
    listener: TcpListener,
    frames: broadcast::Sender<Bytes>,
    send_timeout: Duration,
    shutdown: CancellationToken,
) -> Result<()> {
    log::info!("Video server listening on {}", listener.local_addr()?);
    let clients = TaskTracker::new();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let frames = frames.subscribe();
                    let shutdown = shutdown.clone();
                    clients.spawn(async move {
                        log::info!("Video client {} connected", addr);
                        match stream_frames(stream, addr, frames, send_timeout, shutdown).await {
                            Ok(_) => log::info!("Video client {} disconnected", addr),
                            Err(error) => log::warn!("Video client {} dropped: {}", addr, error),
                        }
                    });
                },
                Err(error) => {
                    log::error!("Error accepting incoming connection: {}", error);
                }
            }
        }
    }
    clients.close();
    clients.wait().await;
    Ok(())
}

async fn stream_frames(
    stream: TcpStream,
    addr: SocketAddr,
    mut frames: broadcast::Receiver<Bytes>,
    send_timeout: Duration,
    shutdown: CancellationToken,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let (mut reader, writer) = stream.into_split();
    let mut sink = FramedWrite::new(writer, framing::video_codec());
    /* clients never send anything, reading only detects a hang up */
    let mut discard = [0u8; 64];
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            read = reader.read(&mut discard) => match read? {
                0 => break,
                _ => continue,
            },
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    log::trace!("Sending {} bytes to {}", frame.len(), addr);
                    tokio::time::timeout(send_timeout, sink.send(frame)).await
                        .map_err(|_| Error::SendTimeout(send_timeout))??;
                },
                Err(RecvError::Lagged(skipped)) => {
                    log::debug!("Video client {} skipped {} frames", addr, skipped);
                },
                Err(RecvError::Closed) => break,
            }
        }
    }
    Ok(())
}
