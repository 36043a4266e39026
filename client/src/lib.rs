use std::{future::Future, time::{Duration, Instant}};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use shared::{control::{Action, Command, Response, UnknownAction}, framing};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_serde::formats::Json;
use tokio_util::codec::{Framed, FramedRead, LengthDelimitedCodec};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    ImageError(#[from] image::ImageError),

    #[error("Connection closed by the rover")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, Error>;

type Transport = tokio_serde::Framed<
    Framed<TcpStream, LengthDelimitedCodec>,
    Response,
    Command,
    Json<Response, Command>>;

/// A connection to the command channel, one response per command
pub struct Control {
    transport: Transport,
}

impl Control {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let transport = tokio_serde::Framed::new(
            Framed::new(stream, framing::control_codec()),
            Json::<Response, Command>::default(),
        );
        Ok(Control { transport })
    }

    pub async fn send(&mut self, command: Command) -> Result<Response> {
        self.transport.send(command).await?;
        match self.transport.next().await {
            Some(response) => Ok(response?),
            None => Err(Error::ConnectionClosed),
        }
    }
}

/// A connection to the video channel
pub struct Video {
    frames: FramedRead<TcpStream, LengthDelimitedCodec>,
}

impl Video {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Video { frames: FramedRead::new(stream, framing::video_codec()) })
    }

    /// The next JPEG, `None` once the rover hangs up
    pub async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        match self.frames.next().await {
            Some(frame) => Ok(Some(frame?.freeze())),
            None => Ok(None),
        }
    }
}

/// What `Video::watch` received before it stopped
#[derive(Debug)]
pub struct Watched {
    pub received: usize,
    pub last: Option<Bytes>,
}

impl Video {
    /// Receives and decodes frames, logging the frame rate once per second.
    /// Returns once `limit` frames arrived, the rover hung up or `stop`
    /// completed.
    pub async fn watch(&mut self, limit: Option<usize>, stop: impl Future) -> Result<Watched> {
        tokio::pin!(stop);
        let mut rate = FrameRate::new(Instant::now());
        let mut watched = Watched { received: 0, last: None };
        while limit.map_or(true, |limit| watched.received < limit) {
            let frame = tokio::select! {
                _ = &mut stop => break,
                frame = self.next_frame() => match frame? {
                    Some(frame) => frame,
                    None => {
                        log::info!("Video stream closed");
                        break
                    }
                },
            };
            match decode(&frame) {
                Ok(image) => log::trace!("Frame {}: {}x{}", watched.received, image.width(), image.height()),
                Err(error) => log::warn!("Could not decode frame: {}", error),
            }
            watched.received += 1;
            if let Some(sample) = rate.record(Instant::now(), frame.len()) {
                log::info!("{:.1} FPS, {} bytes per frame", sample.fps, sample.average_len);
            }
            watched.last = Some(frame);
        }
        Ok(watched)
    }
}

pub fn decode(jpeg: &[u8]) -> Result<image::DynamicImage> {
    Ok(image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)?)
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("Empty command")]
    Empty,
    #[error(transparent)]
    UnknownAction(#[from] UnknownAction),
    #[error("\"{0}\" is not a number")]
    InvalidValue(String),
}

/// Parses a line typed in drive mode. Besides `<action> [value]` the keys of
/// the keyboard client are accepted: w, s, a, d, q and 1 to 9 for the speed.
pub fn parse_command(line: &str) -> std::result::Result<Command, ParseError> {
    let mut words = line.split_whitespace();
    let action = words.next().ok_or(ParseError::Empty)?;
    let shorthand = match action {
        "w" => Some(Command::new(Action::Forward)),
        "s" => Some(Command::new(Action::Backward)),
        "a" => Some(Command::new(Action::Left)),
        "d" => Some(Command::new(Action::Right)),
        "q" => Some(Command::new(Action::Stop)),
        digit => digit.parse::<u8>().ok()
            .filter(|digit| (1..=9).contains(digit))
            .map(|digit| Command::with_value(Action::Speed, f64::from(digit) * 11.0)),
    };
    if let Some(command) = shorthand {
        return Ok(command);
    }
    let action: Action = action.parse()?;
    match words.next() {
        Some(value) => value.parse()
            .map(|value| Command::with_value(action, value))
            .map_err(|_| ParseError::InvalidValue(value.to_owned())),
        None => Ok(Command::new(action)),
    }
}

/// Frame rate and average frame size over windows of one second
pub struct FrameRate {
    window: Duration,
    started: Instant,
    frames: usize,
    bytes: usize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    pub fps: f64,
    pub average_len: usize,
}

impl FrameRate {
    pub fn new(started: Instant) -> Self {
        FrameRate { window: Duration::from_secs(1), started, frames: 0, bytes: 0 }
    }

    /// Records a frame, returning a sample once a window has passed
    pub fn record(&mut self, now: Instant, len: usize) -> Option<Sample> {
        self.frames += 1;
        self.bytes += len;
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed < self.window {
            return None;
        }
        let sample = Sample {
            fps: self.frames as f64 / elapsed.as_secs_f64(),
            average_len: self.bytes / self.frames,
        };
        *self = FrameRate { started: now, frames: 0, bytes: 0, ..*self };
        Some(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::control::Status;
    use tokio::{io::AsyncWriteExt, net::TcpListener};

    #[test]
    fn parse_shorthand() {
        assert_eq!(parse_command("w"), Ok(Command::new(Action::Forward)));
        assert_eq!(parse_command(" q "), Ok(Command::new(Action::Stop)));
        assert_eq!(parse_command("9"), Ok(Command::with_value(Action::Speed, 99.0)));
        assert!(matches!(parse_command("0"), Err(ParseError::UnknownAction(_))));
    }

    #[test]
    fn parse_actions() {
        assert_eq!(parse_command("speed 80"), Ok(Command::with_value(Action::Speed, 80.0)));
        assert_eq!(parse_command("servo_v 45.5"), Ok(Command::with_value(Action::ServoVertical, 45.5)));
        assert_eq!(parse_command("start_camera"), Ok(Command::new(Action::StartCamera)));
        assert_eq!(parse_command(""), Err(ParseError::Empty));
        assert_eq!(parse_command("speed fast"), Err(ParseError::InvalidValue("fast".to_owned())));
        assert!(matches!(parse_command("jump"), Err(ParseError::UnknownAction(_))));
    }

    #[test]
    fn frame_rate_windows() {
        let start = Instant::now();
        let mut rate = FrameRate::new(start);
        for frame in 1..10 {
            assert_eq!(rate.record(start + Duration::from_millis(frame * 100), 1000), None);
        }
        let sample = rate.record(start + Duration::from_secs(1), 2000).unwrap();
        assert_eq!(sample.average_len, 1100);
        assert!((sample.fps - 10.0).abs() < 1e-9);
        assert_eq!(rate.record(start + Duration::from_millis(1500), 10), None);
    }

    #[tokio::test]
    async fn send_waits_for_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, framing::control_codec());
            let request = framed.next().await.unwrap().unwrap();
            let command: Command = serde_json::from_slice(&request).unwrap();
            assert_eq!(command, Command::with_value(Action::Speed, 30.0));
            let response = serde_json::json!({
                "status": "ok",
                "message": "speed set to 30",
                "current_speed": 30,
                "current_h_angle": 90,
                "current_v_angle": 90,
            });
            framed.send(Bytes::from(response.to_string())).await.unwrap();
        });
        let mut control = Control::connect(addr).await.unwrap();
        let response = control.send(Command::with_value(Action::Speed, 30.0)).await.unwrap();
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.current_speed, 30);
        server.await.unwrap();
        assert!(matches!(control.send(Command::new(Action::Ping)).await, Err(_)));
    }

    fn small_jpeg() -> Vec<u8> {
        let mut jpeg = Vec::new();
        let image = image::RgbImage::from_pixel(8, 8, image::Rgb([200, 10, 10]));
        image::codecs::jpeg::JpegEncoder::new(&mut jpeg).encode_image(&image).unwrap();
        jpeg
    }

    fn length_prefixed(jpeg: &[u8]) -> Vec<u8> {
        let mut frame = (jpeg.len() as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(jpeg);
        frame
    }

    /// Serves a frame every 10 ms until the client hangs up
    async fn stream_forever() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let frame = length_prefixed(&small_jpeg());
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            while stream.write_all(&frame).await.is_ok() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });
        addr
    }

    #[tokio::test]
    async fn watch_stops_while_frames_keep_arriving() {
        let mut video = Video::connect(stream_forever().await).await.unwrap();
        let stop = tokio::time::sleep(Duration::from_millis(200));
        let watched = tokio::time::timeout(Duration::from_secs(5), video.watch(None, stop)).await
            .unwrap()
            .unwrap();
        assert!(watched.received > 0);
        assert_eq!(watched.last.as_deref(), Some(&small_jpeg()[..]));
    }

    #[tokio::test]
    async fn watch_stops_at_limit() {
        let mut video = Video::connect(stream_forever().await).await.unwrap();
        let watched = video.watch(Some(3), futures::future::pending::<()>()).await.unwrap();
        assert_eq!(watched.received, 3);
    }

    #[tokio::test]
    async fn video_frames_are_reassembled() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let jpeg = small_jpeg();
        let sent = jpeg.clone();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let frame = length_prefixed(&sent);
            /* deliver in small pieces */
            for chunk in frame.chunks(5) {
                stream.write_all(chunk).await.unwrap();
                stream.flush().await.unwrap();
            }
        });
        let mut video = Video::connect(addr).await.unwrap();
        let frame = video.next_frame().await.unwrap().unwrap();
        assert_eq!(frame, jpeg);
        let image = decode(&frame).unwrap();
        assert_eq!((image.width(), image.height()), (8, 8));
        assert!(video.next_frame().await.unwrap().is_none());
    }
}
