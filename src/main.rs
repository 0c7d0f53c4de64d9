//! ZoneTrac: BLE beacon zone gateway (Embassy / esp-hal)
//!
//! Scans for BLE beacons, tracks which ones are inside the zone and which
//! one is closest, and reports changes as NDJSON to a mesh radio module on
//! UART1. Configuration commands from the mesh arrive on the same UART.
//!
//! All tracking state lives in one [`Engine`] owned by `tracking_task`.
//! The BLE runner and the UART reader only feed channels.

#![no_std]
#![no_main]

use esp_backtrace as _;

esp_bootloader_esp_idf::esp_app_desc!();

// Hardware-specific modules (binary crate only)
#[cfg(feature = "m5stickc")]
mod display;

// Re-export library modules so binary submodules (display) can use crate::*
pub(crate) use zonetrac::{board, engine, presentation, protocol, scanner, settings};

use core::cell::Cell;
use critical_section::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Instant, Ticker, Timer};
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::timer::timg::TimerGroup;
use esp_hal::uart::{Config as UartConfig, Uart, UartRx, UartTx};
use esp_hal::Async;
use heapless::Vec;
use static_cell::StaticCell;

use trouble_host::prelude::*;

use engine::{Engine, LineSink};
use protocol::{MsgBuffer, VERSION};
use scanner::{BeaconReport, BeaconSource, BleAdvParser, ScanParams};
use settings::{MemoryStore, Settings};

/// Tracking pass cadence
const PASS_INTERVAL_MS: u64 = 100;

/// Largest chunk handed over by the UART reader
const INBOUND_CHUNK: usize = 64;

// ── Channel type aliases ──────────────────────────────────────────────

struct Inbound {
    bytes: Vec<u8, INBOUND_CHUNK>,
    at_ms: u64,
}

type ScanChannel = Channel<CriticalSectionRawMutex, BeaconReport, 32>;
type OutputChannel = Channel<CriticalSectionRawMutex, MsgBuffer, 8>;
type InboundChannel = Channel<CriticalSectionRawMutex, Inbound, 4>;

// ── Static channels and shared state ─────────────────────────────────

/// Beacon reports from the BLE runner's event handler
static SCAN_CHANNEL: ScanChannel = Channel::new();

/// Serialized NDJSON lines bound for the mesh UART
static OUTPUT_CHANNEL: OutputChannel = Channel::new();

/// Raw bytes from the mesh UART
static INBOUND_CHANNEL: InboundChannel = Channel::new();

/// Display frames for the screen task (M5StickC only)
#[cfg(feature = "m5stickc")]
pub(crate) static DISPLAY_CHANNEL: Channel<CriticalSectionRawMutex, engine::DisplayFrame, 1> =
    Channel::new();

/// Scan parameters published by the tracking task, read by the scanner
/// at the start of every scan round.
static SCAN_PARAMS: Mutex<Cell<Option<ScanParams>>> = Mutex::new(Cell::new(None));

fn scan_params() -> ScanParams {
    critical_section::with(|cs| SCAN_PARAMS.borrow(cs).get())
        .unwrap_or_else(|| ScanParams::from_settings(&Settings::beacon()))
}

fn publish_scan_params(settings: &Settings) {
    let params = ScanParams::from_settings(settings);
    critical_section::with(|cs| SCAN_PARAMS.borrow(cs).set(Some(params)));
}

// ── BLE scan event handler ───────────────────────────────────────────

/// EventHandler for BLE advertisement reports from trouble-host.
///
/// Called synchronously from the runner and must not block. Reports are
/// timestamped here and queued for the tracking task.
struct ScanEventHandler;

impl EventHandler for ScanEventHandler {
    fn on_adv_reports(&self, mut it: LeAdvReportsIter<'_>) {
        let now_ms = Instant::now().as_millis();
        while let Some(Ok(report)) = it.next() {
            let Ok(addr) = <&[u8; 6]>::try_from(report.addr.raw()) else {
                continue;
            };
            let beacon = BleAdvParser::parse(addr, report.rssi, report.data, now_ms);
            let _ = SCAN_CHANNEL.try_send(beacon);
        }
    }
}

// ── Output sink ──────────────────────────────────────────────────────

/// Queues engine output for the UART writer task.
struct ChannelSink;

impl LineSink for ChannelSink {
    fn send_line(&mut self, line: &[u8]) {
        let Ok(buf) = MsgBuffer::from_slice(line) else {
            return;
        };
        if OUTPUT_CHANNEL.try_send(buf).is_err() {
            log::warn!("Output queue full, dropping line");
        }
    }
}

// ── Entry point ──────────────────────────────────────────────────────

#[esp_rtos::main]
async fn main(spawner: embassy_executor::Spawner) {
    esp_println::logger::init_logger_from_env();

    let peripherals = esp_hal::init(esp_hal::Config::default());

    // BLE controller needs heap; ESP32 is tighter on DRAM
    #[cfg(feature = "esp32")]
    {
        esp_alloc::heap_allocator!(size: 64 * 1024);
    }
    #[cfg(not(feature = "esp32"))]
    {
        esp_alloc::heap_allocator!(size: 96 * 1024);
    }

    // Start the RTOS; requires timer + software interrupt
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_int = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_int.software_interrupt0);

    log::info!("ZoneTrac v{} starting on {}", VERSION, board::BOARD_NAME);

    // ── Mesh radio UART ───────────────────────────────────────────────

    let uart_config = UartConfig::default().with_baudrate(board::MESH_BAUD);
    let uart = Uart::new(peripherals.UART1, uart_config).expect("UART1 init failed");
    #[cfg(feature = "xiao")]
    let uart = uart.with_tx(peripherals.GPIO43).with_rx(peripherals.GPIO44);
    #[cfg(feature = "m5stickc")]
    let uart = uart.with_tx(peripherals.GPIO32).with_rx(peripherals.GPIO33);
    let (uart_rx, uart_tx) = uart.into_async().split();

    log::info!("Mesh UART at {} baud", board::MESH_BAUD);

    spawner.spawn(uart_rx_task(uart_rx)).unwrap();
    spawner.spawn(uart_tx_task(uart_tx)).unwrap();
    spawner.spawn(tracking_task()).unwrap();

    // Hold power on (M5StickC Plus2 needs GPIO4 HIGH to stay powered)
    #[cfg(feature = "m5stickc")]
    let _power_hold = esp_hal::gpio::Output::new(
        peripherals.GPIO4,
        esp_hal::gpio::Level::High,
        esp_hal::gpio::OutputConfig::default(),
    );

    #[cfg(feature = "m5stickc")]
    {
        spawner
            .spawn(display::display_task(
                peripherals.SPI2,
                peripherals.GPIO15,
                peripherals.GPIO13,
                peripherals.GPIO5,
                peripherals.GPIO14,
                peripherals.GPIO12,
                peripherals.GPIO27,
            ))
            .unwrap();
        log::info!("Display task spawned");
    }

    // ── BLE radio initialization ──────────────────────────────────────

    let connector =
        esp_radio::ble::controller::BleConnector::new(peripherals.BT, Default::default())
            .expect("BLE connector init failed");
    let controller: ExternalController<_, 20> = ExternalController::new(connector);

    static HOST_RESOURCES: StaticCell<HostResources<DefaultPacketPool, 1, 1>> = StaticCell::new();
    let resources = HOST_RESOURCES.init(HostResources::new());

    let address = Address::random([0xff, 0x8f, 0x1a, 0x05, 0xe4, 0xab]);
    let stack = trouble_host::new(controller, resources).set_random_address(address);
    let Host {
        central,
        mut runner,
        ..
    } = stack.build();

    log::info!("BLE radio initialized");

    let scan_handler = ScanEventHandler;

    // ── BLE orchestration ─────────────────────────────────────────────
    //
    //   1. BLE stack runner (drives HCI, delivers scan reports to handler)
    //   2. Scan rounds of scan_time seconds, re-reading scan parameters
    //      before each round so configuration changes apply

    let _ = embassy_futures::join::join(
        async {
            loop {
                if let Err(e) = runner.run_with_handler(&scan_handler).await {
                    log::error!("BLE runner error: {:?}", e);
                    Timer::after(Duration::from_secs(1)).await;
                }
            }
        },
        async {
            let mut scanner = trouble_host::scan::Scanner::new(central);
            loop {
                let params = scan_params();
                let config = ScanConfig {
                    active: params.active,
                    interval: Duration::from_micros(params.interval_us()),
                    window: Duration::from_micros(params.window_us()),
                    ..Default::default()
                };
                match scanner.scan(&config).await {
                    Ok(_session) => {
                        log::debug!("Scan round: {} ms", params.duration_ms);
                        Timer::after(Duration::from_millis(params.duration_ms as u64)).await;
                    }
                    Err(e) => {
                        log::error!("BLE scan failed to start: {:?}", e);
                        Timer::after(Duration::from_secs(1)).await;
                    }
                }
            }
        },
    )
    .await;
}

/// Main loop: drain commands, drain beacon reports, run the tracking pass,
/// feed the display. Owns all tracking state.
#[embassy_executor::task]
async fn tracking_task() {
    log::info!("Tracking task started");

    let settings = Settings::beacon();
    settings.log_summary();
    publish_scan_params(&settings);

    // No flash driver in this build: accepted commands last until reset
    let mut store = MemoryStore::new();
    log::warn!("Settings are kept in RAM only");

    let mut engine = Engine::new(settings);
    let mut source = BeaconSource::new();
    let mut sink = ChannelSink;
    let mut ticker = Ticker::every(Duration::from_millis(PASS_INTERVAL_MS));

    loop {
        ticker.next().await;
        let now_ms = Instant::now().as_millis();

        while let Ok(chunk) = INBOUND_CHANNEL.try_receive() {
            if engine.handle_inbound(&chunk.bytes, chunk.at_ms, &mut sink, &mut store) {
                publish_scan_params(engine.settings());
            }
        }

        while let Ok(report) = SCAN_CHANNEL.try_receive() {
            source.push(report);
        }
        engine.ingest(&mut source);
        engine.run_pass(now_ms, &mut sink);

        #[cfg(feature = "m5stickc")]
        if let Some(frame) = engine.display_frame(now_ms) {
            let _ = DISPLAY_CHANNEL.try_send(frame);
        }
    }
}

/// Mesh UART reader. Forwards received bytes with their arrival time.
#[embassy_executor::task]
async fn uart_rx_task(mut rx: UartRx<'static, Async>) {
    let mut buf = [0u8; INBOUND_CHUNK];
    loop {
        match rx.read_async(&mut buf).await {
            Ok(0) => {}
            Ok(n) => {
                let Ok(bytes) = Vec::from_slice(&buf[..n]) else {
                    continue;
                };
                let chunk = Inbound {
                    bytes,
                    at_ms: Instant::now().as_millis(),
                };
                if INBOUND_CHANNEL.try_send(chunk).is_err() {
                    log::warn!("Inbound queue full, dropping {} bytes", n);
                }
            }
            Err(e) => log::warn!("Mesh UART read error: {:?}", e),
        }
    }
}

/// Mesh UART writer. Sends queued NDJSON lines.
#[embassy_executor::task]
async fn uart_tx_task(mut tx: UartTx<'static, Async>) {
    loop {
        let line = OUTPUT_CHANNEL.receive().await;
        if let Ok(s) = core::str::from_utf8(&line) {
            log::debug!("> {}", s.trim_end());
        }
        if let Err(e) = tx.write_async(&line).await {
            log::warn!("Mesh UART write error: {:?}", e);
        }
    }
}
