//! Target reset line shared by the programmer and the virtual serial port.
//!
//! Both sides only ever set a level, so a blocking critical-section mutex
//! around the pin is enough.

use core::cell::RefCell;
use core::convert::Infallible;

use embassy_rp::gpio::Output;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_hal::digital::{ErrorType, OutputPin};

/// The reset `Output` behind its lock.
pub type SharedReset = Mutex<CriticalSectionRawMutex, RefCell<Output<'static>>>;

/// `embedded-hal` pin handle over the shared reset line (active low).
#[derive(Clone, Copy)]
pub struct ResetLine {
    pin: &'static SharedReset,
}

impl ResetLine {
    #[must_use]
    pub fn new(pin: &'static SharedReset) -> Self {
        Self { pin }
    }
}

impl ErrorType for ResetLine {
    type Error = Infallible;
}

impl OutputPin for ResetLine {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.pin.lock(|pin| pin.borrow_mut().set_low());
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.pin.lock(|pin| pin.borrow_mut().set_high());
        Ok(())
    }
}
