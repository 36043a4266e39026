use rppal::gpio::{Gpio, OutputPin};

use super::{first_error, Board, Channel, Error, Level, Output, Pins, Result};

/// Servos expect a 20 ms period
const SERVO_PWM_FREQUENCY: f64 = 50.0;

/// GPIO board of a Raspberry Pi, PWM is generated in software by rppal
pub struct RpiBoard {
    directions: [OutputPin; 4],
    left: OutputPin,
    right: OutputPin,
    servo_horizontal: OutputPin,
    servo_vertical: OutputPin,
    motor_frequency: f64,
}

impl RpiBoard {
    pub fn new(pins: Pins, motor_frequency: f64) -> Result<Self> {
        let gpio = Gpio::new()?;
        let output = |pin: u8| -> Result<OutputPin> {
            let mut output = gpio.get(pin)?.into_output_low();
            output.set_reset_on_drop(true);
            Ok(output)
        };
        let board = RpiBoard {
            directions: [output(pins.in1)?, output(pins.in2)?, output(pins.in3)?, output(pins.in4)?],
            left: output(pins.ena)?,
            right: output(pins.enb)?,
            servo_horizontal: output(pins.servo_horizontal)?,
            servo_vertical: output(pins.servo_vertical)?,
            motor_frequency,
        };
        log::info!("Using GPIO pins {:?}", pins);
        Ok(board)
    }

    fn channel(&mut self, channel: Channel) -> (&mut OutputPin, f64) {
        match channel {
            Channel::LeftWheel => (&mut self.left, self.motor_frequency),
            Channel::RightWheel => (&mut self.right, self.motor_frequency),
            Channel::ServoHorizontal => (&mut self.servo_horizontal, SERVO_PWM_FREQUENCY),
            Channel::ServoVertical => (&mut self.servo_vertical, SERVO_PWM_FREQUENCY),
        }
    }
}

impl Board for RpiBoard {
    fn write(&mut self, output: Output, level: Level) -> Result<()> {
        let pin = &mut self.directions[output.index()];
        match level {
            Level::High => pin.set_high(),
            Level::Low => pin.set_low(),
        }
        Ok(())
    }

    fn set_duty_cycle(&mut self, channel: Channel, duty_cycle: f64) -> Result<()> {
        if !(0.0..=100.0).contains(&duty_cycle) {
            return Err(Error::InvalidDutyCycle(duty_cycle));
        }
        let (pin, frequency) = self.channel(channel);
        if duty_cycle == 0.0 {
            pin.clear_pwm()?;
            pin.set_low();
        }
        else {
            pin.set_pwm_frequency(frequency, duty_cycle / 100.0)?;
        }
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        let pwm = [&mut self.left, &mut self.right, &mut self.servo_horizontal, &mut self.servo_vertical]
            .into_iter()
            .map(|pin| {
                let cleared = pin.clear_pwm().map_err(Error::from);
                pin.set_low();
                cleared
            });
        let released = first_error(pwm);
        for pin in self.directions.iter_mut() {
            pin.set_low();
        }
        match &released {
            Ok(_) => log::info!("GPIO outputs released"),
            Err(error) => log::error!("GPIO outputs released with errors: {}", error),
        }
        released
    }
}
