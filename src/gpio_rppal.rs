//! Front-panel buttons and the proximity LED on Raspberry Pi GPIO.
//!
//! Buttons are wired to ground with the internal pull-up enabled, so a held
//! button reads low.

use anyhow::Context;
use iss_locator_lib::config::HardwareConfig;
use iss_locator_lib::device::{IndicatorLamp, InputSignal, ResetChord};
use rppal::gpio::{Gpio, InputPin, OutputPin};
use tracing::info;

pub struct Button {
    pin: InputPin,
}

impl InputSignal for Button {
    fn is_held(&self) -> bool {
        self.pin.is_low()
    }
}

pub struct Lamp {
    pin: OutputPin,
}

impl IndicatorLamp for Lamp {
    fn set_lit(&mut self, lit: bool) {
        if lit {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
    }
}

/// Claim the reset buttons and the lamp.
pub fn open(config: &HardwareConfig) -> anyhow::Result<(ResetChord<Button>, Lamp)> {
    let gpio = Gpio::new().context("open GPIO")?;
    let [first, second] = config.reset_pins;

    let button = |pin: u8| -> anyhow::Result<Button> {
        let pin = gpio
            .get(pin)
            .with_context(|| format!("claim button GPIO {pin}"))?
            .into_input_pullup();
        Ok(Button { pin })
    };
    let chord = ResetChord::new(button(first)?, button(second)?);

    let lamp = Lamp {
        pin: gpio
            .get(config.lamp_pin)
            .with_context(|| format!("claim lamp GPIO {}", config.lamp_pin))?
            .into_output_low(),
    };

    info!(
        reset_a = first,
        reset_c = second,
        lamp = config.lamp_pin,
        "GPIO ready"
    );
    Ok((chord, lamp))
}
