use std::{fmt, str::FromStr};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
    Speed,
    ServoHorizontal,
    ServoVertical,
    StartCamera,
    StopCamera,
    Ping,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown action \"{0}\"")]
pub struct UnknownAction(pub String);

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Forward => "forward",
            Action::Backward => "backward",
            Action::Left => "left",
            Action::Right => "right",
            Action::Stop => "stop",
            Action::Speed => "speed",
            Action::ServoHorizontal => "servo_h",
            Action::ServoVertical => "servo_v",
            Action::StartCamera => "start_camera",
            Action::StopCamera => "stop_camera",
            Action::Ping => "ping",
        }
    }

    /// Whether the action is meaningless without a `value`
    pub fn requires_value(&self) -> bool {
        matches!(self, Action::Speed | Action::ServoHorizontal | Action::ServoVertical)
    }
}

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(action: &str) -> Result<Self, Self::Err> {
        match action.trim().to_ascii_lowercase().as_str() {
            "forward" => Ok(Action::Forward),
            "backward" => Ok(Action::Backward),
            "left" => Ok(Action::Left),
            "right" => Ok(Action::Right),
            "stop" => Ok(Action::Stop),
            "speed" => Ok(Action::Speed),
            "servo_h" => Ok(Action::ServoHorizontal),
            "servo_v" => Ok(Action::ServoVertical),
            "start_camera" => Ok(Action::StartCamera),
            "stop_camera" => Ok(Action::StopCamera),
            "ping" | "heartbeat" => Ok(Action::Ping),
            _ => Err(UnknownAction(action.to_owned())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request sent on the command channel.
///
/// The action is kept as a string so that an unrecognised action can be
/// answered with an error instead of failing deserialization of the whole
/// message.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Command {
    #[serde(alias = "command")]
    pub action: String,
    #[serde(default, alias = "speed", alias = "angle", skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Command {
    pub fn new(action: Action) -> Self {
        Command { action: action.as_str().to_owned(), value: None }
    }

    pub fn with_value(action: Action, value: f64) -> Self {
        Command { action: action.as_str().to_owned(), value: Some(value) }
    }

    pub fn action(&self) -> Result<Action, UnknownAction> {
        self.action.parse()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Ok,
    Error,
}

/// A reply on the command channel, a snapshot of the vehicle state taken
/// after the triggering command was applied
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Response {
    #[serde(default)]
    pub status: Status,
    pub message: String,
    pub current_speed: u8,
    pub current_h_angle: u8,
    pub current_v_angle: u8,
}

impl Response {
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}
