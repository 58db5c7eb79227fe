#![no_std]
#![no_main]

use core::cell::RefCell;

use defmt::{error, info, warn};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_futures::select::{select, Either};
use embassy_rp::bind_interrupts;
use embassy_rp::gpio::{Level, Output};
use embassy_rp::peripherals::{UART1, USB};
use embassy_rp::uart::{Async, Config as UartConfig, Uart, UartRx};
use embassy_rp::usb::Driver;
use embassy_rp::watchdog::Watchdog;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Delay, Duration, Timer};
use embassy_usb::class::cdc_acm::State as CdcState;
use embassy_usb::class::hid::State;
use embassy_usb::driver::EndpointError;
use embassy_usb::{Builder, Config as UsbConfig};
use static_cell::StaticCell;
use uf2_bridge_core::{SerialRx, TunnelDrain};
use uf2_bridge_rp2040::{
    configure_usb_cdc, configure_usb_hid, configure_usb_msc, receive_loop, tunnel_loop,
    Hf2Channel, Hf2Processor, InputError, LineControl, MassStorage, MscControl, MscEvent,
    PacketSource, ProgramError, Programmer, ResetLine, SerialBridge, SharedReset, SharedTx,
    TargetTx, UsbHidInput, UsbHidOutput, VirtualFilesystem, VirtualSerial, DEFAULT_CONFIG,
    TARGET_BAUD,
};

#[cfg(feature = "dev-panic")]
use panic_probe as _;
#[cfg(feature = "prod-panic")]
use panic_reset as _;

bind_interrupts!(struct Irqs {
    UART1_IRQ => embassy_rp::uart::InterruptHandler<UART1>;
    USBCTRL_IRQ => embassy_rp::usb::InterruptHandler<USB>;
});

/// Watchdog period armed after a completed transfer. Must elapse well
/// before the target's bootloader hands over to the new sketch.
const REBOOT_TIMEOUT: Duration = Duration::from_millis(15);

/// How long the HID task waits for a host packet before checking the relay.
const RELAY_POLL: Duration = Duration::from_millis(1);

/// Queues and flags shared between the UART and USB tasks.
static SERIAL: StaticCell<SerialBridge> = StaticCell::new();

/// UART transmitter shared by the programmer and the tunnel.
static TARGET_TX: StaticCell<SharedTx> = StaticCell::new();

/// Target reset pin shared by the programmer and the virtual serial port.
static RESET: StaticCell<SharedReset> = StaticCell::new();

/// USB device configuration buffer.
static CONFIG_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
static BOS_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
static MSOS_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
static CONTROL_BUF: StaticCell<[u8; 64]> = StaticCell::new();

/// HID state.
static HID_STATE: StaticCell<State> = StaticCell::new();

/// CDC ACM state.
static CDC_STATE: StaticCell<CdcState> = StaticCell::new();

/// Mass-storage class request handler.
static MSC_CONTROL: StaticCell<MscControl> = StaticCell::new();

type UsbDriver = Driver<'static, USB>;
type HidChannel = Hf2Channel<'static, UsbHidInput, UsbHidOutput>;

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("UF2 bridge starting...");

    if let Err(e) = DEFAULT_CONFIG.validate() {
        error!("Invalid configuration: {:?}", e);
        return;
    }

    let p = embassy_rp::init(embassy_rp::config::Config::default());

    let serial = SERIAL.init(SerialBridge::new()).split();

    // --- UART Setup ---
    let mut uart_config = UartConfig::default();
    uart_config.baudrate = TARGET_BAUD;

    let uart = Uart::new(
        p.UART1,
        p.PIN_8, // TX
        p.PIN_9, // RX
        Irqs,
        p.DMA_CH0,
        p.DMA_CH1,
        uart_config,
    );
    let (tx, rx) = uart.split();
    let target_tx = TargetTx::new(TARGET_TX.init(Mutex::new(tx)));

    // Reset idles high; the programmer pulls it low to enter the bootloader.
    let reset = ResetLine::new(RESET.init(BlockingMutex::new(RefCell::new(Output::new(
        p.PIN_10,
        Level::High,
    )))));
    let watchdog = Watchdog::new(p.WATCHDOG);

    let programmer = Programmer::new(target_tx, reset, Delay, serial.ack, DEFAULT_CONFIG);

    // --- USB Setup ---
    let usb_driver = Driver::new(p.USB, Irqs);

    let mut usb_config = UsbConfig::new(0x1209, 0x0001); // pid.codes test VID/PID
    usb_config.manufacturer = Some("Rust UF2");
    usb_config.product = Some(DEFAULT_CONFIG.product_name);
    usb_config.serial_number = Some("001");
    usb_config.max_power = 100;
    usb_config.max_packet_size_0 = 64;

    // Interface association descriptors for the two-interface CDC function
    usb_config.device_class = 0xEF;
    usb_config.device_sub_class = 0x02;
    usb_config.device_protocol = 0x01;
    usb_config.composite_with_iads = true;

    let config_descriptor = CONFIG_DESCRIPTOR.init([0; 256]);
    let bos_descriptor = BOS_DESCRIPTOR.init([0; 256]);
    let msos_descriptor = MSOS_DESCRIPTOR.init([0; 256]);
    let control_buf = CONTROL_BUF.init([0; 64]);

    let mut builder = Builder::new(
        usb_driver,
        usb_config,
        config_descriptor,
        bos_descriptor,
        msos_descriptor,
        control_buf,
    );

    // Mass storage first so it gets interface 0
    let (msc, control) = configure_usb_msc(&mut builder, VirtualFilesystem::new(DEFAULT_CONFIG));
    builder.handler(MSC_CONTROL.init(control));

    let serial_port = configure_usb_cdc(&mut builder, CDC_STATE.init(CdcState::new()));
    let lines = LineControl::new(reset, TARGET_BAUD);

    let hid_state = HID_STATE.init(State::new());
    let (hid_input, hid_output) = configure_usb_hid(&mut builder, hid_state);

    let usb_device = builder.build();

    let processor = Hf2Processor::new(serial.tunnel_in, DEFAULT_CONFIG);
    let channel = Hf2Channel::new(hid_input, hid_output, processor, serial.relay);

    spawner.spawn(usb_task(usb_device).unwrap());
    spawner.spawn(uart_rx_task(rx, serial.rx).unwrap());
    spawner.spawn(tunnel_task(serial.tunnel_drain, target_tx).unwrap());
    spawner.spawn(msc_task(msc, programmer, watchdog).unwrap());
    spawner.spawn(cdc_task(serial_port, lines, target_tx).unwrap());
    spawner.spawn(hid_task(channel).unwrap());

    info!("UF2 bridge initialized, waiting for host...");
}

/// USB device task - runs the USB stack.
#[embassy_executor::task]
async fn usb_task(mut device: embassy_usb::UsbDevice<'static, UsbDriver>) {
    device.run().await;
}

/// UART receive task - feeds target output to the relay and ack counter.
#[embassy_executor::task]
async fn uart_rx_task(rx: UartRx<'static, Async>, serial: SerialRx<'static>) {
    receive_loop(rx, serial).await
}

/// Tunnel task - forwards HF2 serial bytes to the target.
#[embassy_executor::task]
async fn tunnel_task(drain: TunnelDrain<'static>, tx: TargetTx) {
    tunnel_loop(drain, tx).await
}

/// Mass-storage task - serves the virtual drive and flashes the target.
#[embassy_executor::task]
async fn msc_task(mut msc: MassStorage, mut programmer: Programmer, mut watchdog: Watchdog) {
    msc.wait_enabled().await;
    info!("Mass storage ready");

    loop {
        match msc.serve_one(&mut programmer).await {
            Ok(None) => {}
            Ok(Some(MscEvent::TransferComplete)) => {
                info!("Transfer complete, rebooting");
                // The target stays in reset until the reboot releases the pin
                watchdog.start(REBOOT_TIMEOUT);
                loop {
                    Timer::after_secs(1).await;
                }
            }
            Ok(Some(MscEvent::ProgramFailed(ProgramError::HandshakeTimeout))) => {
                error!("Target not responding, rebooting");
                watchdog.trigger_reset();
            }
            Ok(Some(MscEvent::ProgramFailed(e))) => {
                error!("Programming failed: {:?}", e);
            }
            Err(EndpointError::Disabled) => {
                warn!("Mass storage disabled");
                programmer.discard_partial_block();
                msc.wait_enabled().await;
            }
            Err(e) => {
                warn!("Mass storage error: {:?}", e);
            }
        }
    }
}

/// CDC task - mirrors DTR and line coding onto the target.
#[embassy_executor::task]
async fn cdc_task(port: VirtualSerial, lines: LineControl<ResetLine>, tx: TargetTx) {
    port.run(lines, tx).await
}

/// HID task - answers HF2 commands and relays target output to the host.
#[embassy_executor::task]
async fn hid_task(mut channel: HidChannel) {
    channel.output_mut().wait_ready().await;
    info!("HF2 interface ready");

    loop {
        let event = select(channel.input_mut().receive(), Timer::after(RELAY_POLL)).await;
        match event {
            Either::First(Ok(packet)) => {
                if let Err(e) = channel.dispatch(&packet).await {
                    error!("HF2 reply failed: {:?}", e);
                }
            }
            Either::First(Err(InputError::Disconnected)) => {
                warn!("HF2 interface disconnected");
                channel.output_mut().wait_ready().await;
            }
            Either::First(Err(e)) => {
                warn!("HF2 input error: {:?}", e);
            }
            Either::Second(()) => {}
        }

        if let Err(e) = channel.poll_relay().await {
            error!("Serial relay failed: {:?}", e);
        }
    }
}
