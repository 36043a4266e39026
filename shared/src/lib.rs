pub mod control;
pub mod framing;

/// Port of the command channel
pub const CONTROL_PORT: u16 = 5000;
/// Port of the video channel
pub const VIDEO_PORT: u16 = 5001;
