use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Board, Channel, Level, Output, Result};

/// Snapshot of everything a board drives
#[derive(Clone, Debug, PartialEq)]
pub struct Outputs {
    pub levels: [Level; 4],
    pub left_duty_cycle: f64,
    pub right_duty_cycle: f64,
    pub servo_horizontal_duty_cycle: f64,
    pub servo_vertical_duty_cycle: f64,
    pub released: bool,
}

impl Default for Outputs {
    fn default() -> Self {
        Outputs {
            levels: [Level::Low; 4],
            left_duty_cycle: 0.0,
            right_duty_cycle: 0.0,
            servo_horizontal_duty_cycle: 0.0,
            servo_vertical_duty_cycle: 0.0,
            released: false,
        }
    }
}

/// A board without hardware behind it. Clones share the same outputs so a
/// handle can be kept to observe what the driver did.
#[derive(Clone, Default)]
pub struct SimulatedBoard {
    outputs: Arc<Mutex<Outputs>>,
}

impl SimulatedBoard {
    pub fn outputs(&self) -> Outputs {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Outputs> {
        self.outputs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Board for SimulatedBoard {
    fn write(&mut self, output: Output, level: Level) -> Result<()> {
        log::trace!("{:?} -> {:?}", output, level);
        self.lock().levels[output.index()] = level;
        Ok(())
    }

    fn set_duty_cycle(&mut self, channel: Channel, duty_cycle: f64) -> Result<()> {
        if !(0.0..=100.0).contains(&duty_cycle) {
            return Err(super::Error::InvalidDutyCycle(duty_cycle));
        }
        log::trace!("{:?} duty cycle -> {}%", channel, duty_cycle);
        let mut outputs = self.lock();
        match channel {
            Channel::LeftWheel => outputs.left_duty_cycle = duty_cycle,
            Channel::RightWheel => outputs.right_duty_cycle = duty_cycle,
            Channel::ServoHorizontal => outputs.servo_horizontal_duty_cycle = duty_cycle,
            Channel::ServoVertical => outputs.servo_vertical_duty_cycle = duty_cycle,
        }
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        let mut outputs = self.lock();
        *outputs = Outputs { released: true, ..Outputs::default() };
        log::debug!("Simulated board released");
        Ok(())
    }
}
