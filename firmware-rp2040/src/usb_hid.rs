//! HF2 transport over a vendor-defined USB HID interface.

use embassy_rp::peripherals::USB;
use embassy_rp::usb::Driver;
use embassy_usb::class::hid::{
    HidBootProtocol, HidReader, HidReaderWriter, HidSubclass, HidWriter, ReadError, State,
};
use embassy_usb::Builder;
use uf2_bridge_core::{InputError, OutputError, PacketSink, PacketSource};
use uf2_proto::hf2::PACKET_SIZE;
use uf2_proto::Packet;

type UsbDriver = Driver<'static, USB>;

/// Vendor page 0xFF97, one 64-byte input and one 64-byte output report.
///
/// This is the descriptor HF2 host tools look for.
pub const REPORT_DESCRIPTOR: &[u8] = &[
    0x06, 0x97, 0xFF, // Usage Page (Vendor 0xFF97)
    0x09, 0x01, // Usage (0x01)
    0xA1, 0x01, // Collection (Application)
    //
    // --- Device to host ---
    0x09, 0x02, //   Usage (0x02)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x00, //   Logical Maximum (255)
    0x75, 0x08, //   Report Size (8)
    0x95, 0x40, //   Report Count (64)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    //
    // --- Host to device ---
    0x09, 0x03, //   Usage (0x03)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x00, //   Logical Maximum (255)
    0x75, 0x08, //   Report Size (8)
    0x95, 0x40, //   Report Count (64)
    0x91, 0x02, //   Output (Data, Variable, Absolute)
    //
    0xC0, // End Collection
];

/// Inbound HF2 packets from the host.
pub struct UsbHidInput {
    reader: HidReader<'static, UsbDriver, PACKET_SIZE>,
    connected: bool,
}

impl UsbHidInput {
    #[must_use]
    pub fn new(reader: HidReader<'static, UsbDriver, PACKET_SIZE>) -> Self {
        Self {
            reader,
            connected: false,
        }
    }
}

impl PacketSource for UsbHidInput {
    async fn receive(&mut self) -> Result<Packet, InputError> {
        if !self.connected {
            self.reader.ready().await;
            self.connected = true;
        }

        let mut packet = [0u8; PACKET_SIZE];
        match self.reader.read(&mut packet).await {
            Ok(n) if n == PACKET_SIZE => Ok(packet),
            Ok(_) => Err(InputError::Truncated),
            Err(ReadError::Disabled) => {
                self.connected = false;
                Err(InputError::Disconnected)
            }
            Err(_) => Err(InputError::Io),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Outbound HF2 packets to the host.
pub struct UsbHidOutput {
    writer: HidWriter<'static, UsbDriver, PACKET_SIZE>,
    ready: bool,
}

impl UsbHidOutput {
    #[must_use]
    pub fn new(writer: HidWriter<'static, UsbDriver, PACKET_SIZE>) -> Self {
        Self {
            writer,
            ready: false,
        }
    }

    /// Wait until the device is ready (USB enumerated).
    pub async fn wait_ready(&mut self) {
        self.writer.ready().await;
        self.ready = true;
    }
}

impl PacketSink for UsbHidOutput {
    async fn send(&mut self, packet: &Packet) -> Result<(), OutputError> {
        if !self.ready {
            return Err(OutputError::NotReady);
        }
        self.writer.write(packet).await.map_err(|_| {
            self.ready = false;
            OutputError::Io
        })
    }

    fn is_ready(&self) -> bool {
        self.ready
    }
}

/// Configure the HF2 HID interface in the USB builder.
pub fn configure_usb_hid(
    builder: &mut Builder<'static, UsbDriver>,
    state: &'static mut State<'static>,
) -> (UsbHidInput, UsbHidOutput) {
    let config = embassy_usb::class::hid::Config {
        report_descriptor: REPORT_DESCRIPTOR,
        request_handler: None,
        poll_ms: 1,
        max_packet_size: PACKET_SIZE as u16,
        hid_subclass: HidSubclass::No,
        hid_boot_protocol: HidBootProtocol::None,
    };

    let hid = HidReaderWriter::<_, PACKET_SIZE, PACKET_SIZE>::new(builder, state, config);
    let (reader, writer) = hid.split();
    (UsbHidInput::new(reader), UsbHidOutput::new(writer))
}
