//! Host serial port control lines mirrored onto the target.
//!
//! The bridge also shows up as a virtual serial port. Asserting DTR on it
//! holds the target in reset the way an Arduino's auto-reset circuit does,
//! and a line-coding change retunes the UART towards the target.

use embedded_hal::digital::OutputPin;

/// Error type for line control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LineError {
    /// Reset line could not be driven.
    ResetLine,
}

/// Last DTR state and baud rate applied to the target link.
pub struct LineControl<P> {
    reset: P,
    dtr: bool,
    baud: u32,
}

impl<P: OutputPin> LineControl<P> {
    /// `baud` is the rate the UART was brought up with. DTR starts
    /// deasserted, matching a reset line idling high.
    pub fn new(reset: P, baud: u32) -> Self {
        Self {
            reset,
            dtr: false,
            baud,
        }
    }

    /// Mirror DTR onto the reset line.
    ///
    /// Returns whether the line moved. Repeated reports of the same state
    /// leave the pin alone.
    pub fn set_dtr(&mut self, dtr: bool) -> Result<bool, LineError> {
        if dtr == self.dtr {
            return Ok(false);
        }

        let level = if dtr {
            self.reset.set_low()
        } else {
            self.reset.set_high()
        };
        level.map_err(|_| LineError::ResetLine)?;

        debug!("DTR {=bool}", dtr);
        self.dtr = dtr;
        Ok(true)
    }

    /// Record the host's requested data rate.
    ///
    /// Returns the rate to program into the UART, or `None` when it is
    /// unchanged or zero.
    pub fn set_baud(&mut self, rate: u32) -> Option<u32> {
        if rate == 0 || rate == self.baud {
            return None;
        }

        info!("target baud {=u32} -> {=u32}", self.baud, rate);
        self.baud = rate;
        Some(rate)
    }

    #[inline]
    pub fn dtr(&self) -> bool {
        self.dtr
    }

    #[inline]
    pub fn baud(&self) -> u32 {
        self.baud
    }

    /// Get a reference to the reset pin.
    pub fn reset_pin(&self) -> &P {
        &self.reset
    }
}
