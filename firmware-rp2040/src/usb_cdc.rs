//! CDC ACM virtual serial port.
//!
//! Carries no data of its own: host bytes are read and dropped so the host
//! never stalls on a full endpoint, and target output goes out over HF2.
//! What it does carry is control state. DTR drives the target reset line
//! and the line coding retunes the target UART, so opening the port from
//! a serial monitor resets the target as it would on a real Uno.

use defmt::{debug, trace, warn};
use embassy_futures::select::{select, Either};
use embassy_rp::peripherals::USB;
use embassy_rp::usb::Driver;
use embassy_usb::class::cdc_acm::{CdcAcmClass, ControlChanged, Receiver, Sender, State};
use embassy_usb::driver::EndpointError;
use embassy_usb::Builder;
use uf2_bridge_core::LineControl;

use crate::reset::ResetLine;
use crate::uart::TargetTx;

type UsbDriver = Driver<'static, USB>;

/// Bulk endpoint packet size (full speed).
pub const MAX_PACKET_SIZE: u16 = 64;

/// The virtual serial port's endpoints and control notifications.
pub struct VirtualSerial {
    sender: Sender<'static, UsbDriver>,
    receiver: Receiver<'static, UsbDriver>,
    control: ControlChanged<'static>,
}

/// Add the CDC ACM function to the USB builder.
pub fn configure_usb_cdc(
    builder: &mut Builder<'static, UsbDriver>,
    state: &'static mut State<'static>,
) -> VirtualSerial {
    let class = CdcAcmClass::new(builder, state, MAX_PACKET_SIZE);
    let (sender, receiver, control) = class.split_with_control();
    VirtualSerial {
        sender,
        receiver,
        control,
    }
}

impl VirtualSerial {
    /// Serve the port forever.
    pub async fn run(mut self, mut lines: LineControl<ResetLine>, tx: TargetTx) -> ! {
        let mut buf = [0u8; MAX_PACKET_SIZE as usize];
        loop {
            let event = select(
                self.control.control_changed(),
                self.receiver.read_packet(&mut buf),
            )
            .await;

            match event {
                Either::First(()) => self.apply(&mut lines, tx).await,
                Either::Second(Ok(n)) => trace!("dropped {=usize} host bytes", n),
                Either::Second(Err(EndpointError::Disabled)) => {
                    debug!("virtual serial disconnected");
                    self.receiver.wait_connection().await;
                }
                Either::Second(Err(e)) => warn!("virtual serial error: {:?}", e),
            }
        }
    }

    async fn apply(&mut self, lines: &mut LineControl<ResetLine>, tx: TargetTx) {
        if let Err(e) = lines.set_dtr(self.sender.dtr()) {
            warn!("DTR not applied: {:?}", e);
        }

        let coding = self.sender.line_coding();
        if let Some(rate) = lines.set_baud(coding.data_rate()) {
            tx.set_baudrate(rate).await;
        }
    }
}
