use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use futures::FutureExt;
use shared::control::{Action, Command, Response, Status};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{camera::{self, Camera}, drive::{self, Driver, Servo, Turn}};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Could not send request")]
    RequestError,
    #[error("Did not receive response")]
    ResponseError,
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug)]
pub struct Settings {
    pub speed: u8,
    pub h_angle: u8,
    pub v_angle: u8,
    /// How long a servo is driven after being moved, `None` keeps it driven
    pub servo_settle: Option<Duration>,
    pub frame_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            speed: 50,
            h_angle: 90,
            v_angle: 90,
            servo_settle: Some(Duration::from_millis(300)),
            frame_interval: Duration::from_millis(50),
        }
    }
}

/// The last commanded motion, re-applied when the speed changes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Motion {
    Stopped,
    Forward,
    Backward,
    Left,
    Right,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct State {
    pub speed: u8,
    pub h_angle: u8,
    pub v_angle: u8,
    pub motion: Motion,
    pub camera_running: bool,
}

impl State {
    pub fn response(&self, status: Status, message: impl Into<String>) -> Response {
        Response {
            status,
            message: message.into(),
            current_speed: self.speed,
            current_h_angle: self.h_angle,
            current_v_angle: self.v_angle,
        }
    }
}

pub enum Request {
    Execute {
        command: Command,
        callback: oneshot::Sender<Response>,
    },
    GetState(oneshot::Sender<State>),
}

pub type Sender = mpsc::UnboundedSender<Request>;
pub type Receiver = mpsc::UnboundedReceiver<Request>;

/// Cloneable access to the vehicle task
#[derive(Clone)]
pub struct Handle {
    request_tx: Sender,
}

impl Handle {
    pub fn new(request_tx: Sender) -> Self {
        Handle { request_tx }
    }

    pub async fn execute(&self, command: Command) -> Result<Response> {
        let (callback, response) = oneshot::channel();
        self.request_tx.send(Request::Execute { command, callback })
            .map_err(|_| Error::RequestError)?;
        response.await.map_err(|_| Error::ResponseError)
    }

    pub async fn state(&self) -> Result<State> {
        let (callback, state) = oneshot::channel();
        self.request_tx.send(Request::GetState(callback))
            .map_err(|_| Error::RequestError)?;
        state.await.map_err(|_| Error::ResponseError)
    }
}

pub fn clamp_speed(value: f64) -> u8 {
    /* NaN saturates to zero */
    value.clamp(0.0, f64::from(drive::MAX_SPEED)) as u8
}

pub fn clamp_angle(value: f64) -> u8 {
    value.clamp(0.0, f64::from(drive::SERVO_MAX_ANGLE)) as u8
}

type Reply = (Status, String);

type CaptureResult = std::result::Result<camera::Result<()>, tokio::task::JoinError>;

fn ok(message: impl Into<String>) -> Reply {
    (Status::Ok, message.into())
}

fn error(message: impl ToString) -> Reply {
    (Status::Error, message.to_string())
}

struct Vehicle {
    driver: Driver,
    camera: Arc<Camera>,
    frames: broadcast::Sender<Bytes>,
    settings: Settings,
    state: State,
    capture_stop: Option<CancellationToken>,
}

impl Vehicle {
    fn drive(&mut self, motion: Motion) -> drive::Result<()> {
        let speed = self.state.speed;
        match motion {
            Motion::Stopped => self.driver.stop(),
            Motion::Forward => self.driver.forward(speed),
            Motion::Backward => self.driver.backward(speed),
            Motion::Left => self.driver.turn(Turn::Left, speed),
            Motion::Right => self.driver.turn(Turn::Right, speed),
        }?;
        self.state.motion = if speed == 0 { Motion::Stopped } else { motion };
        Ok(())
    }

    fn set_speed(&mut self, value: f64) -> drive::Result<()> {
        self.state.speed = clamp_speed(value);
        match self.state.motion {
            Motion::Stopped => Ok(()),
            motion => self.drive(motion),
        }
    }

    fn set_servo(&mut self, servo: Servo, value: f64) -> drive::Result<u8> {
        let angle = clamp_angle(value);
        self.driver.set_servo(servo, angle)?;
        match servo {
            Servo::Horizontal => self.state.h_angle = angle,
            Servo::Vertical => self.state.v_angle = angle,
        }
        Ok(angle)
    }
}

fn motion(action: Action) -> Option<Motion> {
    match action {
        Action::Forward => Some(Motion::Forward),
        Action::Backward => Some(Motion::Backward),
        Action::Left => Some(Motion::Left),
        Action::Right => Some(Motion::Right),
        Action::Stop => Some(Motion::Stopped),
        _ => None,
    }
}

/// Runs the vehicle until every `Sender` has been dropped. Commands are
/// applied one at a time in the order they arrive. On exit the camera is
/// stopped and the driver releases the board.
pub async fn new(
    mut request_rx: Receiver,
    driver: Driver,
    camera: Arc<Camera>,
    frames: broadcast::Sender<Bytes>,
    settings: Settings,
) {
    let mut vehicle = Vehicle {
        driver,
        camera,
        frames,
        settings,
        state: State {
            speed: settings.speed.min(drive::MAX_SPEED),
            h_angle: settings.h_angle.min(drive::SERVO_MAX_ANGLE),
            v_angle: settings.v_angle.min(drive::SERVO_MAX_ANGLE),
            motion: Motion::Stopped,
            camera_running: false,
        },
        capture_stop: None,
    };

    let capture_task = futures::future::pending::<CaptureResult>().left_future();
    let settle_horizontal = futures::future::pending::<()>().left_future();
    let settle_vertical = futures::future::pending::<()>().left_future();
    tokio::pin!(capture_task);
    tokio::pin!(settle_horizontal);
    tokio::pin!(settle_vertical);

    /* center the camera */
    for (servo, angle) in [(Servo::Horizontal, vehicle.state.h_angle), (Servo::Vertical, vehicle.state.v_angle)] {
        if let Err(drive_error) = vehicle.set_servo(servo, f64::from(angle)) {
            log::warn!("Could not move {} servo: {}", servo, drive_error);
        }
    }
    if let Some(settle) = vehicle.settings.servo_settle {
        settle_horizontal.set(tokio::time::sleep(settle).right_future());
        settle_vertical.set(tokio::time::sleep(settle).right_future());
    }

    loop {
        tokio::select! {
            request = request_rx.recv() => match request {
                Some(Request::Execute { command, callback }) => {
                    let (status, message) = match command.action() {
                        Err(unknown) => error(unknown),
                        Ok(action) => match (action, command.value) {
                            (action, None) if action.requires_value() =>
                                error(format!("{} requires a value", action)),
                            (Action::Speed, Some(value)) => match vehicle.set_speed(value) {
                                Ok(_) => ok(format!("speed set to {}", vehicle.state.speed)),
                                Err(drive_error) => error(drive_error),
                            },
                            (Action::ServoHorizontal, Some(value)) => match vehicle.set_servo(Servo::Horizontal, value) {
                                Ok(angle) => {
                                    if let Some(settle) = vehicle.settings.servo_settle {
                                        settle_horizontal.set(tokio::time::sleep(settle).right_future());
                                    }
                                    ok(format!("horizontal servo set to {}", angle))
                                },
                                Err(drive_error) => error(drive_error),
                            },
                            (Action::ServoVertical, Some(value)) => match vehicle.set_servo(Servo::Vertical, value) {
                                Ok(angle) => {
                                    if let Some(settle) = vehicle.settings.servo_settle {
                                        settle_vertical.set(tokio::time::sleep(settle).right_future());
                                    }
                                    ok(format!("vertical servo set to {}", angle))
                                },
                                Err(drive_error) => error(drive_error),
                            },
                            (Action::StartCamera, _) => {
                                if vehicle.state.camera_running {
                                    ok("camera already running")
                                }
                                else {
                                    let camera = vehicle.camera.clone();
                                    let opened = tokio::task::spawn_blocking(move || camera.open()).await
                                        .unwrap_or_else(|join_error| Err(join_error.into()));
                                    match opened {
                                        Ok(_) => {
                                            let stop = CancellationToken::new();
                                            let task = tokio::spawn(camera::stream::capture(
                                                vehicle.camera.clone(),
                                                vehicle.frames.clone(),
                                                vehicle.settings.frame_interval,
                                                stop.clone()));
                                            capture_task.set(task.right_future());
                                            vehicle.capture_stop = Some(stop);
                                            vehicle.state.camera_running = true;
                                            log::info!("Camera {} started", vehicle.camera.name());
                                            ok("camera started")
                                        },
                                        Err(camera_error) => {
                                            log::warn!("Could not start camera {}: {}", vehicle.camera.name(), camera_error);
                                            error(format!("could not start camera: {}", camera_error))
                                        }
                                    }
                                }
                            },
                            (Action::StopCamera, _) => match vehicle.capture_stop.take() {
                                Some(stop) => {
                                    stop.cancel();
                                    if let Ok(Err(capture_error)) = (&mut capture_task).await {
                                        log::warn!("Capture ended with: {}", capture_error);
                                    }
                                    capture_task.set(futures::future::pending().left_future());
                                    close(&vehicle.camera).await;
                                    vehicle.state.camera_running = false;
                                    ok("camera stopped")
                                },
                                None => ok("camera not running"),
                            },
                            (Action::Ping, _) => ok("pong"),
                            (action, _) => match motion(action) {
                                Some(motion) => match vehicle.drive(motion) {
                                    Ok(_) => ok(action.as_str()),
                                    Err(drive_error) => error(drive_error),
                                },
                                None => error(format!("{} requires a value", action)),
                            },
                        }
                    };
                    if status == Status::Error {
                        log::debug!("{:?} failed: {}", command, message);
                    }
                    let _ = callback.send(vehicle.state.response(status, message));
                },
                Some(Request::GetState(callback)) => {
                    let _ = callback.send(vehicle.state);
                },
                None => break,
            },
            result = &mut capture_task => {
                capture_task.set(futures::future::pending().left_future());
                vehicle.capture_stop = None;
                vehicle.state.camera_running = false;
                match result {
                    Ok(Ok(_)) => log::info!("Capture stopped"),
                    Ok(Err(capture_error)) => log::warn!("Capture stopped: {}", capture_error),
                    Err(join_error) => log::error!("Capture task failed: {}", join_error),
                }
                close(&vehicle.camera).await;
            },
            _ = &mut settle_horizontal => {
                settle_horizontal.set(futures::future::pending().left_future());
                if let Err(drive_error) = vehicle.driver.relax_servo(Servo::Horizontal) {
                    log::warn!("Could not relax horizontal servo: {}", drive_error);
                }
            },
            _ = &mut settle_vertical => {
                settle_vertical.set(futures::future::pending().left_future());
                if let Err(drive_error) = vehicle.driver.relax_servo(Servo::Vertical) {
                    log::warn!("Could not relax vertical servo: {}", drive_error);
                }
            },
        }
    }

    /* shut down */
    if let Some(stop) = vehicle.capture_stop.take() {
        stop.cancel();
        let _ = capture_task.await;
        close(&vehicle.camera).await;
    }
    match vehicle.driver.release() {
        Ok(_) => log::info!("Vehicle stopped and outputs released"),
        Err(drive_error) => log::error!("Could not release outputs: {}", drive_error),
    }
}

/// Closes the camera off the runtime, a capture in progress holds the lock
async fn close(camera: &Arc<Camera>) {
    let camera = camera.clone();
    if let Err(join_error) = tokio::task::spawn_blocking(move || camera.close()).await {
        log::error!("Could not close camera: {}", join_error);
    }
}
