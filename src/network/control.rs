use std::{net::SocketAddr, time::Duration};

use futures::{SinkExt, StreamExt};
use shared::{control::{Command, Response, Status}, framing};
use tokio::net::{TcpListener, TcpStream, tcp::{OwnedReadHalf, OwnedWriteHalf}};
use tokio_serde::{SymmetricallyFramed, formats::SymmetricalJson};
use tokio_util::{
    codec::{FramedRead, FramedWrite, LengthDelimitedCodec},
    sync::CancellationToken,
    task::TaskTracker,
};

use super::{Error, Result};
use crate::vehicle;

type Commands = SymmetricallyFramed<
    FramedRead<OwnedReadHalf, LengthDelimitedCodec>,
    Command,
    SymmetricalJson<Command>>;

type Responses = SymmetricallyFramed<
    FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>,
    Response,
    SymmetricalJson<Response>>;

/// Accepts control connections until `shutdown` is cancelled, then waits for
/// the open connections to finish
pub async fn serve(
    listener: TcpListener,
    vehicle: vehicle::Handle,
    idle_timeout: Option<Duration>,
    shutdown: CancellationToken,
) -> Result<()> {
    log::info!("Control server listening on {}", listener.local_addr()?);
    let connections = TaskTracker::new();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let vehicle = vehicle.clone();
                    let shutdown = shutdown.clone();
                    connections.spawn(async move {
                        log::info!("Control client {} connected", addr);
                        match handle(stream, addr, vehicle, idle_timeout, shutdown).await {
                            Ok(_) => log::info!("Control client {} disconnected", addr),
                            Err(error) => log::warn!("Control client {} disconnected: {}", addr, error),
                        }
                    });
                },
                Err(error) => {
                    log::error!("Error accepting incoming connection: {}", error);
                }
            }
        }
    }
    connections.close();
    connections.wait().await;
    Ok(())
}

async fn handle(
    stream: TcpStream,
    addr: SocketAddr,
    vehicle: vehicle::Handle,
    idle_timeout: Option<Duration>,
    shutdown: CancellationToken,
) -> Result<()> {
    let (read, write) = stream.into_split();
    let mut commands: Commands = SymmetricallyFramed::new(
        FramedRead::new(read, framing::control_codec()),
        SymmetricalJson::<Command>::default(),
    );
    let mut responses: Responses = SymmetricallyFramed::new(
        FramedWrite::new(write, framing::control_codec()),
        SymmetricalJson::<Response>::default(),
    );
    loop {
        let next_command = async {
            match idle_timeout {
                Some(idle_timeout) => tokio::time::timeout(idle_timeout, commands.next()).await
                    .map_err(|_| Error::IdleTimeout(idle_timeout)),
                None => Ok(commands.next().await),
            }
        };
        let command = tokio::select! {
            _ = shutdown.cancelled() => break,
            command = next_command => command?,
        };
        let response = match command {
            Some(Ok(command)) => {
                log::debug!("{} -> {:?}", addr, command);
                vehicle.execute(command).await?
            },
            /* bad JSON is answered, anything else ends the connection */
            Some(Err(error)) if is_malformed(&error) => {
                log::warn!("Malformed command from {}: {}", addr, error);
                vehicle.state().await?
                    .response(Status::Error, format!("malformed command: {}", error))
            },
            Some(Err(error)) => return Err(error.into()),
            None => break,
        };
        log::debug!("{} <- {:?}", addr, response);
        responses.send(response).await?;
    }
    Ok(())
}

fn is_malformed(error: &std::io::Error) -> bool {
    error.get_ref().map_or(false, |inner| inner.is::<serde_json::Error>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use bytes::Bytes;
    use tokio::{io::AsyncWriteExt, sync::{broadcast, mpsc}};
    use tokio_util::codec::Framed;
    use crate::{
        camera::{Camera, Settings, pattern::PatternSource},
        drive::{Driver, TurnPolicy, simulated::SimulatedBoard},
        vehicle,
    };

    struct Server {
        addr: SocketAddr,
        shutdown: CancellationToken,
        task: tokio::task::JoinHandle<Result<()>>,
    }

    async fn start(idle_timeout: Option<Duration>) -> Server {
        let driver = Driver::new(Box::new(SimulatedBoard::default()), TurnPolicy::Pivot);
        let camera = Arc::new(Camera::new(Box::new(PatternSource::new(64, 48)), Settings::default()));
        let (frames, _) = broadcast::channel(2);
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        tokio::spawn(vehicle::new(request_rx, driver, camera, frames, vehicle::Settings::default()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(serve(listener, vehicle::Handle::new(request_tx), idle_timeout, shutdown.clone()));
        Server { addr, shutdown, task }
    }

    async fn connect(addr: SocketAddr) -> Framed<TcpStream, LengthDelimitedCodec> {
        Framed::new(TcpStream::connect(addr).await.unwrap(), framing::control_codec())
    }

    async fn request(client: &mut Framed<TcpStream, LengthDelimitedCodec>, json: &'static str) -> Response {
        client.send(Bytes::from_static(json.as_bytes())).await.unwrap();
        let reply = client.next().await.unwrap().unwrap();
        serde_json::from_slice(&reply).unwrap()
    }

    #[tokio::test]
    async fn speed_is_clamped() {
        let server = start(None).await;
        let mut client = connect(server.addr).await;
        let response = request(&mut client, r#"{"action":"speed","value":150}"#).await;
        assert!(response.is_ok());
        assert_eq!(response.current_speed, 100);
    }

    #[tokio::test]
    async fn malformed_json_keeps_connection() {
        let server = start(None).await;
        let mut client = connect(server.addr).await;
        let response = request(&mut client, r#"{"action": "forw"#).await;
        assert_eq!(response.status, Status::Error);
        assert_eq!(response.current_speed, 50);
        let response = request(&mut client, r#"{"action":"jump"}"#).await;
        assert_eq!(response.status, Status::Error);
        let response = request(&mut client, r#"{"command":"ping"}"#).await;
        assert_eq!((response.status, response.message.as_str()), (Status::Ok, "pong"));
    }

    #[tokio::test]
    async fn clients_share_state() {
        let server = start(None).await;
        let mut first = connect(server.addr).await;
        let mut second = connect(server.addr).await;
        request(&mut first, r#"{"action":"servo_h","value":10}"#).await;
        let response = request(&mut second, r#"{"action":"heartbeat"}"#).await;
        assert_eq!(response.current_h_angle, 10);
    }

    #[tokio::test]
    async fn oversized_frames_close_the_connection() {
        let server = start(None).await;
        let mut raw = TcpStream::connect(server.addr).await.unwrap();
        let length = (framing::CONTROL_MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        raw.write_all(&length).await.unwrap();
        let mut client = Framed::new(raw, framing::control_codec());
        assert!(client.next().await.map_or(true, |frame| frame.is_err()));
    }

    #[tokio::test]
    async fn idle_connections_are_closed() {
        let server = start(Some(Duration::from_millis(50))).await;
        let mut client = connect(server.addr).await;
        let response = request(&mut client, r#"{"action":"stop"}"#).await;
        assert_eq!(response.message, "stop");
        let closed = tokio::time::timeout(Duration::from_secs(5), client.next()).await.unwrap();
        assert!(closed.map_or(true, |frame| frame.is_err()));
    }

    #[tokio::test]
    async fn shutdown_closes_connections() {
        let server = start(None).await;
        let mut client = connect(server.addr).await;
        request(&mut client, r#"{"action":"ping"}"#).await;
        server.shutdown.cancel();
        assert!(server.task.await.unwrap().is_ok());
        assert!(client.next().await.map_or(true, |frame| frame.is_err()));
    }
}
