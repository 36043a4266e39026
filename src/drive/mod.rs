use std::{fmt, str::FromStr};

pub mod simulated;
#[cfg(feature = "rpi")]
pub mod rpi;

/// Duty cycle range of a hobby servo at 50 Hz (0.5 ms to 2.5 ms pulses)
const SERVO_MIN_DUTY_CYCLE: f64 = 2.5;
const SERVO_MAX_DUTY_CYCLE: f64 = 12.5;
pub const SERVO_MAX_ANGLE: u8 = 180;
pub const MAX_SPEED: u8 = 100;
/// Duty cycle of the inner wheel when turning with `TurnPolicy::Arc`
const ARC_INNER_DUTY_CYCLE: i16 = 10;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[cfg(feature = "rpi")]
    #[error(transparent)]
    GpioError(#[from] rppal::gpio::Error),

    #[error("Duty cycle {0} is outside of 0 to 100")]
    InvalidDutyCycle(f64),

    #[error("Board has been released")]
    Released,
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// The four direction inputs of the dual H-bridge. IN1/IN2 select the
/// direction of the left wheel, IN3/IN4 the direction of the right wheel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Output {
    In1,
    In2,
    In3,
    In4,
}

impl Output {
    pub const ALL: [Output; 4] = [Output::In1, Output::In2, Output::In3, Output::In4];

    pub fn index(self) -> usize {
        match self {
            Output::In1 => 0,
            Output::In2 => 1,
            Output::In3 => 2,
            Output::In4 => 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    LeftWheel,
    RightWheel,
    ServoHorizontal,
    ServoVertical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Servo {
    Horizontal,
    Vertical,
}

impl Servo {
    fn channel(self) -> Channel {
        match self {
            Servo::Horizontal => Channel::ServoHorizontal,
            Servo::Vertical => Channel::ServoVertical,
        }
    }
}

impl fmt::Display for Servo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Servo::Horizontal => f.write_str("horizontal"),
            Servo::Vertical => f.write_str("vertical"),
        }
    }
}

/// BCM numbers of the pins the board drives
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pins {
    pub in1: u8,
    pub in2: u8,
    pub in3: u8,
    pub in4: u8,
    /// PWM enable of the left wheel
    pub ena: u8,
    /// PWM enable of the right wheel
    pub enb: u8,
    pub servo_horizontal: u8,
    pub servo_vertical: u8,
}

/// The hardware seam: digital direction outputs plus PWM channels
pub trait Board: Send {
    fn write(&mut self, output: Output, level: Level) -> Result<()>;

    /// `duty_cycle` is a percentage, zero disables the channel
    fn set_duty_cycle(&mut self, channel: Channel, duty_cycle: f64) -> Result<()>;

    /// De-energize every output, called once before the board is dropped
    fn release(&mut self) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Turn {
    Left,
    Right,
}

/// How the two wheels are driven for `left` and `right`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnPolicy {
    /// inner wheel backwards at full speed, spinning on the spot
    Pivot,
    /// inner wheel stopped
    Brake,
    /// inner wheel crawling forwards
    Arc,
}

impl TurnPolicy {
    /// Signed duty cycles for the (left, right) wheels
    pub fn wheels(self, turn: Turn, speed: u8) -> (i16, i16) {
        let outer = i16::from(speed.min(MAX_SPEED));
        let inner = match self {
            TurnPolicy::Pivot => -outer,
            TurnPolicy::Brake => 0,
            TurnPolicy::Arc => outer.min(ARC_INNER_DUTY_CYCLE),
        };
        match turn {
            Turn::Left => (inner, outer),
            Turn::Right => (outer, inner),
        }
    }
}

#[derive(thiserror::Error, Debug)]
#[error("Unknown turn policy \"{0}\", expected pivot, brake or arc")]
pub struct UnknownTurnPolicy(String);

impl FromStr for TurnPolicy {
    type Err = UnknownTurnPolicy;

    fn from_str(policy: &str) -> std::result::Result<Self, Self::Err> {
        match policy {
            "pivot" => Ok(TurnPolicy::Pivot),
            "brake" => Ok(TurnPolicy::Brake),
            "arc" => Ok(TurnPolicy::Arc),
            _ => Err(UnknownTurnPolicy(policy.to_owned())),
        }
    }
}

/// Consumes every result and returns the first error. Releasing outputs
/// must carry on past a failing pin.
pub fn first_error(results: impl IntoIterator<Item = Result<()>>) -> Result<()> {
    results.into_iter().fold(Ok(()), |first, result| first.and(result))
}

/// Maps a servo angle onto the 2.5% to 12.5% duty cycle range
pub fn servo_duty_cycle(angle: u8) -> f64 {
    let angle = f64::from(angle.min(SERVO_MAX_ANGLE));
    SERVO_MIN_DUTY_CYCLE + (SERVO_MAX_DUTY_CYCLE - SERVO_MIN_DUTY_CYCLE) * angle / f64::from(SERVO_MAX_ANGLE)
}

/// Translates motion and servo commands into output levels and duty cycles.
/// The board is released when the driver is dropped so that the motors are
/// never left energized.
pub struct Driver {
    board: Box<dyn Board>,
    policy: TurnPolicy,
    released: bool,
}

impl Driver {
    pub fn new(board: Box<dyn Board>, policy: TurnPolicy) -> Self {
        Driver { board, policy, released: false }
    }

    pub fn policy(&self) -> TurnPolicy {
        self.policy
    }

    /// Drives the wheels with signed duty cycles in -100 to 100
    pub fn wheels(&mut self, left: i16, right: i16) -> Result<()> {
        if self.released {
            return Err(Error::Released);
        }
        if left == 0 && right == 0 {
            return self.stop();
        }
        let (in1, in2) = direction(left);
        let (in3, in4) = direction(right);
        self.board.write(Output::In1, in1)?;
        self.board.write(Output::In2, in2)?;
        self.board.write(Output::In3, in3)?;
        self.board.write(Output::In4, in4)?;
        self.board.set_duty_cycle(Channel::LeftWheel, magnitude(left))?;
        self.board.set_duty_cycle(Channel::RightWheel, magnitude(right))?;
        Ok(())
    }

    pub fn forward(&mut self, speed: u8) -> Result<()> {
        let speed = i16::from(speed.min(MAX_SPEED));
        self.wheels(speed, speed)
    }

    pub fn backward(&mut self, speed: u8) -> Result<()> {
        let speed = i16::from(speed.min(MAX_SPEED));
        self.wheels(-speed, -speed)
    }

    pub fn turn(&mut self, turn: Turn, speed: u8) -> Result<()> {
        let (left, right) = self.policy.wheels(turn, speed);
        self.wheels(left, right)
    }

    pub fn stop(&mut self) -> Result<()> {
        if self.released {
            return Err(Error::Released);
        }
        let board = &mut self.board;
        let levels: Vec<Result<()>> = Output::ALL.into_iter()
            .map(|output| board.write(output, Level::Low))
            .collect();
        let left = board.set_duty_cycle(Channel::LeftWheel, 0.0);
        let right = board.set_duty_cycle(Channel::RightWheel, 0.0);
        first_error(levels.into_iter().chain([left, right]))
    }

    pub fn set_servo(&mut self, servo: Servo, angle: u8) -> Result<()> {
        if self.released {
            return Err(Error::Released);
        }
        self.board.set_duty_cycle(servo.channel(), servo_duty_cycle(angle))
    }

    /// Stops driving the servo so that it does not jitter around its position
    pub fn relax_servo(&mut self, servo: Servo) -> Result<()> {
        if self.released {
            return Err(Error::Released);
        }
        self.board.set_duty_cycle(servo.channel(), 0.0)
    }

    /// Stops everything and hands the pins back, further commands fail
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        let stopped = self.stop();
        self.released = true;
        let released = self.board.release();
        stopped.and(released)
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        if let Err(error) = self.release() {
            log::error!("Could not release the board: {}", error);
        }
    }
}

fn direction(duty_cycle: i16) -> (Level, Level) {
    match duty_cycle {
        duty_cycle if duty_cycle > 0 => (Level::High, Level::Low),
        duty_cycle if duty_cycle < 0 => (Level::Low, Level::High),
        _ => (Level::Low, Level::Low),
    }
}

fn magnitude(duty_cycle: i16) -> f64 {
    f64::from(duty_cycle.unsigned_abs().min(u16::from(MAX_SPEED)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::simulated::{Outputs, SimulatedBoard};

    fn driver(policy: TurnPolicy) -> (Driver, SimulatedBoard) {
        let board = SimulatedBoard::default();
        (Driver::new(Box::new(board.clone()), policy), board)
    }

    fn assert_stopped(outputs: &Outputs) {
        assert_eq!(outputs.levels, [Level::Low; 4]);
        assert_eq!(outputs.left_duty_cycle, 0.0);
        assert_eq!(outputs.right_duty_cycle, 0.0);
    }

    #[test]
    fn forward_and_backward() {
        let (mut driver, board) = driver(TurnPolicy::Pivot);
        driver.forward(60).unwrap();
        let outputs = board.outputs();
        assert_eq!(outputs.levels, [Level::High, Level::Low, Level::High, Level::Low]);
        assert_eq!((outputs.left_duty_cycle, outputs.right_duty_cycle), (60.0, 60.0));

        driver.backward(35).unwrap();
        let outputs = board.outputs();
        assert_eq!(outputs.levels, [Level::Low, Level::High, Level::Low, Level::High]);
        assert_eq!((outputs.left_duty_cycle, outputs.right_duty_cycle), (35.0, 35.0));
    }

    #[test]
    fn stop_clears_everything() {
        let (mut driver, board) = driver(TurnPolicy::Pivot);
        driver.backward(100).unwrap();
        driver.stop().unwrap();
        assert_stopped(&board.outputs());
    }

    #[test]
    fn stop_is_idempotent() {
        let (mut driver, board) = driver(TurnPolicy::Brake);
        driver.turn(Turn::Left, 70).unwrap();
        driver.stop().unwrap();
        let once = board.outputs();
        driver.stop().unwrap();
        assert_eq!(board.outputs(), once);
        assert_stopped(&once);
    }

    /// Fails every write to IN1
    struct StuckBoard(SimulatedBoard);

    impl Board for StuckBoard {
        fn write(&mut self, output: Output, level: Level) -> Result<()> {
            match output {
                Output::In1 => Err(Error::Released),
                _ => self.0.write(output, level),
            }
        }

        fn set_duty_cycle(&mut self, channel: Channel, duty_cycle: f64) -> Result<()> {
            self.0.set_duty_cycle(channel, duty_cycle)
        }

        fn release(&mut self) -> Result<()> {
            self.0.release()
        }
    }

    #[test]
    fn first_error_tries_everything() {
        let mut attempts = 0;
        let results = [Ok(()), Err(Error::InvalidDutyCycle(1.0)), Err(Error::Released), Ok(())]
            .into_iter()
            .inspect(|_| attempts += 1);
        assert!(matches!(first_error(results), Err(Error::InvalidDutyCycle(_))));
        assert_eq!(attempts, 4);
        assert!(first_error(std::iter::empty()).is_ok());
    }

    #[test]
    fn stop_continues_past_a_failing_output() {
        let board = SimulatedBoard::default();
        let mut driver = Driver::new(Box::new(StuckBoard(board.clone())), TurnPolicy::Pivot);
        driver.board.set_duty_cycle(Channel::LeftWheel, 80.0).unwrap();
        driver.board.write(Output::In3, Level::High).unwrap();
        assert!(driver.stop().is_err());
        let outputs = board.outputs();
        assert_eq!(outputs.levels[Output::In3.index()], Level::Low);
        assert_eq!((outputs.left_duty_cycle, outputs.right_duty_cycle), (0.0, 0.0));
    }

    #[test]
    fn zero_speed_is_stop() {
        let (mut driver, board) = driver(TurnPolicy::Pivot);
        driver.forward(80).unwrap();
        driver.forward(0).unwrap();
        assert_stopped(&board.outputs());
        driver.turn(Turn::Right, 0).unwrap();
        assert_stopped(&board.outputs());
    }

    #[test]
    fn turn_policies() {
        assert_eq!(TurnPolicy::Pivot.wheels(Turn::Left, 50), (-50, 50));
        assert_eq!(TurnPolicy::Pivot.wheels(Turn::Right, 50), (50, -50));
        assert_eq!(TurnPolicy::Brake.wheels(Turn::Left, 50), (0, 50));
        assert_eq!(TurnPolicy::Brake.wheels(Turn::Right, 50), (50, 0));
        assert_eq!(TurnPolicy::Arc.wheels(Turn::Left, 50), (10, 50));
        assert_eq!(TurnPolicy::Arc.wheels(Turn::Right, 5), (5, 5));
    }

    #[test]
    fn pivot_left_reverses_left_wheel() {
        let (mut driver, board) = driver(TurnPolicy::Pivot);
        driver.turn(Turn::Left, 40).unwrap();
        let outputs = board.outputs();
        assert_eq!(outputs.levels, [Level::Low, Level::High, Level::High, Level::Low]);
        assert_eq!((outputs.left_duty_cycle, outputs.right_duty_cycle), (40.0, 40.0));
    }

    #[test]
    fn brake_right_stops_right_wheel() {
        let (mut driver, board) = driver(TurnPolicy::Brake);
        driver.turn(Turn::Right, 40).unwrap();
        let outputs = board.outputs();
        assert_eq!(outputs.levels, [Level::High, Level::Low, Level::Low, Level::Low]);
        assert_eq!((outputs.left_duty_cycle, outputs.right_duty_cycle), (40.0, 0.0));
    }

    #[test]
    fn servo_duty_cycle_range() {
        assert_eq!(servo_duty_cycle(0), 2.5);
        assert_eq!(servo_duty_cycle(90), 7.5);
        assert_eq!(servo_duty_cycle(180), 12.5);
        assert_eq!(servo_duty_cycle(255), 12.5);
    }

    #[test]
    fn servo_fire_and_settle() {
        let (mut driver, board) = driver(TurnPolicy::Pivot);
        driver.set_servo(Servo::Vertical, 180).unwrap();
        assert_eq!(board.outputs().servo_vertical_duty_cycle, 12.5);
        assert_eq!(board.outputs().servo_horizontal_duty_cycle, 0.0);
        driver.relax_servo(Servo::Vertical).unwrap();
        assert_eq!(board.outputs().servo_vertical_duty_cycle, 0.0);
    }

    #[test]
    fn drop_releases_board() {
        let (mut driver, board) = driver(TurnPolicy::Pivot);
        driver.forward(100).unwrap();
        drop(driver);
        let outputs = board.outputs();
        assert!(outputs.released);
        assert_stopped(&outputs);
    }

    #[test]
    fn released_driver_rejects_commands() {
        let (mut driver, _board) = driver(TurnPolicy::Pivot);
        driver.release().unwrap();
        assert!(matches!(driver.forward(50), Err(Error::Released)));
        assert!(driver.release().is_ok());
    }

    #[test]
    fn parse_turn_policy() {
        assert_eq!("arc".parse::<TurnPolicy>().unwrap(), TurnPolicy::Arc);
        assert!("drift".parse::<TurnPolicy>().is_err());
    }
}
