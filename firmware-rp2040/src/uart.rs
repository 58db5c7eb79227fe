//! UART link to the target MCU.
//!
//! # Pins
//!
//! Uses UART1 by default:
//! - GPIO 8: TX (to target RX)
//! - GPIO 9: RX (from target TX)
//! - GPIO 10: target RESET (active low, see [`crate::reset`])
//!
//! The transmitter is shared between the programmer and the HF2 tunnel,
//! so it sits behind an async mutex. The lock is held per write call, so
//! tunnel bytes sent while flashing can land between two STK500 commands.

use embassy_rp::uart::{Async, Error as UartError, UartRx, UartTx};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::Timer;
use embedded_io_async::{ErrorKind, ErrorType, Write};
use uf2_bridge_core::{SerialRx, TunnelDrain};

/// Baud rate of the Optiboot bootloader on an Arduino Uno.
pub const TARGET_BAUD: u32 = 115_200;

/// Bytes moved from the tunnel queue to the UART per write.
const TUNNEL_BATCH: usize = 32;

/// Shared UART transmitter.
pub type SharedTx = Mutex<CriticalSectionRawMutex, UartTx<'static, Async>>;

/// Error type for UART writes.
#[derive(Debug, Clone, Copy, defmt::Format)]
pub struct TxError(pub UartError);

impl embedded_io_async::Error for TxError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// `embedded-io-async` writer over the shared transmitter.
#[derive(Clone, Copy)]
pub struct TargetTx {
    tx: &'static SharedTx,
}

impl TargetTx {
    #[must_use]
    pub fn new(tx: &'static SharedTx) -> Self {
        Self { tx }
    }

    /// Retune the UART. The divisor is shared, so this also moves RX.
    pub async fn set_baudrate(&self, baud: u32) {
        self.tx.lock().await.set_baudrate(baud);
    }
}

impl ErrorType for TargetTx {
    type Error = TxError;
}

impl Write for TargetTx {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let mut tx = self.tx.lock().await;
        tx.write(buf).await.map_err(TxError)?;
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        let mut tx = self.tx.lock().await;
        tx.blocking_flush().map_err(TxError)
    }
}

/// Feed every received byte to the serial bridge.
///
/// Errors are logged and reading continues; a dropped byte shows up as a
/// handshake timeout further up if it mattered.
pub async fn receive_loop(mut rx: UartRx<'static, Async>, mut serial: SerialRx<'static>) -> ! {
    let mut byte = [0u8; 1];
    loop {
        match rx.read(&mut byte).await {
            Ok(()) => serial.on_byte(byte[0]),
            Err(e) => defmt::warn!("UART rx error: {:?}", e),
        }
    }
}

/// Drain tunnel bytes from the host into the UART.
pub async fn tunnel_loop(mut drain: TunnelDrain<'static>, mut tx: TargetTx) -> ! {
    let mut batch = [0u8; TUNNEL_BATCH];
    loop {
        let mut n = 0;
        while n < batch.len() {
            match drain.pop() {
                Some(byte) => {
                    batch[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }

        if n == 0 {
            Timer::after_micros(500).await;
            continue;
        }

        if let Err(e) = tx.write_all(&batch[..n]).await {
            defmt::warn!("tunnel write failed: {:?}", e);
        }
    }
}
