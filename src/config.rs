use std::{net::{IpAddr, SocketAddr}, str::FromStr, time::Duration};

use structopt::StructOpt;

use crate::{camera, drive, vehicle};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Support for {0} was not compiled in, rebuild with the feature \"{1}\"")]
    NotCompiled(&'static str, &'static str),

    #[error("Unknown {0} \"{1}\"")]
    Unknown(&'static str, String),

    #[error("Motor PWM frequency {0} Hz must be positive")]
    InvalidFrequency(f64),

    #[error(transparent)]
    DriveError(#[from] drive::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoardKind {
    Simulated,
    Rpi,
}

impl FromStr for BoardKind {
    type Err = Error;

    fn from_str(board: &str) -> Result<Self> {
        match board {
            "simulated" => Ok(BoardKind::Simulated),
            "rpi" => Ok(BoardKind::Rpi),
            _ => Err(Error::Unknown("board", board.to_owned())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraKind {
    Pattern,
    /// Index of a capture device, as understood by OpenCV
    Device(i32),
}

impl FromStr for CameraKind {
    type Err = Error;

    fn from_str(camera: &str) -> Result<Self> {
        match camera {
            "pattern" => Ok(CameraKind::Pattern),
            index => index.parse()
                .map(CameraKind::Device)
                .map_err(|_| Error::Unknown("camera", index.to_owned())),
        }
    }
}

#[derive(Debug, StructOpt)]
#[structopt(name = "rover", about = "Drives a rover and streams its camera over TCP")]
pub struct Options {
    /// Address to listen on
    #[structopt(long, default_value = "0.0.0.0")]
    pub address: IpAddr,
    #[structopt(long, default_value = "5000")]
    pub control_port: u16,
    #[structopt(long, default_value = "5001")]
    pub video_port: u16,

    /// simulated or rpi
    #[structopt(long, default_value = "simulated")]
    pub board: BoardKind,
    #[structopt(long, default_value = "9")]
    pub in1: u8,
    #[structopt(long, default_value = "25")]
    pub in2: u8,
    #[structopt(long, default_value = "11")]
    pub in3: u8,
    #[structopt(long, default_value = "8")]
    pub in4: u8,
    #[structopt(long, default_value = "12")]
    pub ena: u8,
    #[structopt(long, default_value = "13")]
    pub enb: u8,
    #[structopt(long, default_value = "17")]
    pub servo_h_pin: u8,
    #[structopt(long, default_value = "27")]
    pub servo_v_pin: u8,
    /// PWM frequency of the wheel enable pins in Hz
    #[structopt(long, default_value = "1000")]
    pub motor_frequency: f64,
    /// Time a servo is driven after a move before it is relaxed, 0 keeps it driven
    #[structopt(long, default_value = "300")]
    pub servo_settle_ms: u64,
    /// pivot, brake or arc
    #[structopt(long, default_value = "pivot")]
    pub turn_policy: drive::TurnPolicy,

    #[structopt(long, default_value = "50")]
    pub speed: u8,
    #[structopt(long, default_value = "90")]
    pub h_angle: u8,
    #[structopt(long, default_value = "90")]
    pub v_angle: u8,

    /// pattern or the index of a capture device
    #[structopt(long, default_value = "pattern")]
    pub camera: CameraKind,
    #[structopt(long, default_value = "640")]
    pub width: u32,
    #[structopt(long, default_value = "480")]
    pub height: u32,
    #[structopt(long, default_value = "20")]
    pub fps: u32,
    #[structopt(long, default_value = "80")]
    pub quality: u8,
    #[structopt(long, default_value = "50")]
    pub fallback_quality: u8,
    /// Encoded frames above this size are encoded again at the fallback quality
    #[structopt(long, default_value = "100000")]
    pub max_frame_len: usize,
    /// Start the camera without waiting for start_camera
    #[structopt(long)]
    pub camera_autostart: bool,

    /// Seconds without a command before a control connection is closed, 0 never closes
    #[structopt(long, default_value = "30")]
    pub idle_timeout: u64,
    /// Milliseconds a video client may stall before it is dropped
    #[structopt(long, default_value = "2000")]
    pub send_timeout_ms: u64,
}

impl Options {
    pub fn control_address(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.control_port)
    }

    pub fn video_address(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.video_port)
    }

    pub fn pins(&self) -> drive::Pins {
        drive::Pins {
            in1: self.in1,
            in2: self.in2,
            in3: self.in3,
            in4: self.in4,
            ena: self.ena,
            enb: self.enb,
            servo_horizontal: self.servo_h_pin,
            servo_vertical: self.servo_v_pin,
        }
    }

    pub fn board(&self) -> Result<Box<dyn drive::Board>> {
        if !(self.motor_frequency.is_finite() && self.motor_frequency > 0.0) {
            return Err(Error::InvalidFrequency(self.motor_frequency));
        }
        match self.board {
            BoardKind::Simulated => Ok(Box::new(drive::simulated::SimulatedBoard::default())),
            #[cfg(feature = "rpi")]
            BoardKind::Rpi => Ok(Box::new(drive::rpi::RpiBoard::new(self.pins(), self.motor_frequency)?)),
            #[cfg(not(feature = "rpi"))]
            BoardKind::Rpi => Err(Error::NotCompiled("the Raspberry Pi GPIO", "rpi")),
        }
    }

    pub fn camera_source(&self) -> Result<Box<dyn camera::Source>> {
        match self.camera {
            CameraKind::Pattern => Ok(Box::new(camera::pattern::PatternSource::new(self.width, self.height))),
            #[cfg(feature = "opencv")]
            CameraKind::Device(index) => Ok(Box::new(camera::opencv::OpenCvSource {
                index,
                width: self.width,
                height: self.height,
            })),
            #[cfg(not(feature = "opencv"))]
            CameraKind::Device(_) => Err(Error::NotCompiled("capture devices", "opencv")),
        }
    }

    pub fn camera_settings(&self) -> camera::Settings {
        camera::Settings {
            width: self.width,
            height: self.height,
            quality: self.quality,
            fallback_quality: self.fallback_quality,
            max_frame_len: self.max_frame_len,
        }
    }

    pub fn vehicle_settings(&self) -> vehicle::Settings {
        vehicle::Settings {
            speed: self.speed,
            h_angle: self.h_angle,
            v_angle: self.v_angle,
            servo_settle: non_zero(Duration::from_millis(self.servo_settle_ms)),
            frame_interval: Duration::from_secs(1) / self.fps.max(1),
        }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        non_zero(Duration::from_secs(self.idle_timeout))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for Options {
    fn default() -> Self {
        Options::from_iter(std::iter::once("rover"))
    }
}

fn non_zero(duration: Duration) -> Option<Duration> {
    (!duration.is_zero()).then(|| duration)
}
