//! Display driver for M5StickC Plus2 (ST7789V2, 135x240, SPI).
//!
//! Renders the tracked beacon: name, distance and time since last seen
//! while it is present, a red "GONE" alert when it leaves, and a dark
//! screen with the backlight off otherwise. Frames arrive from the
//! tracking task at most every 500ms and are drawn straight over SPI
//! (a 240x135 framebuffer does not fit the ESP32 heap).

use core::fmt::Write;

use embedded_graphics::mono_font::ascii::{FONT_10X20, FONT_6X10};
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{PrimitiveStyle, Rectangle};
use embedded_graphics::text::Text;
use embedded_hal_bus::spi::ExclusiveDevice;
use esp_hal::delay::Delay;
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::spi::Mode;
use esp_hal::time::Rate;
use mipidsi::interface::SpiInterface;
use mipidsi::models::ST7789;
use mipidsi::options::{ColorInversion, ColorOrder, Orientation, Rotation};
use mipidsi::Builder;

use embassy_time::{Duration, Timer};

use crate::board;
use crate::engine::DisplayFrame;
use crate::presentation::{BeaconView, DisplayMode};
use crate::protocol::VERSION;

/// Landscape width after 90-degree rotation
const W: i32 = 240;

/// Colors
const BG: Rgb565 = Rgb565::BLACK;
const HEADER_BG: Rgb565 = Rgb565::new(2, 4, 12);
const TEXT: Rgb565 = Rgb565::WHITE;
const ACCENT: Rgb565 = Rgb565::new(0, 50, 0);
const DIM: Rgb565 = Rgb565::new(12, 24, 12);
const ALERT_BG: Rgb565 = Rgb565::new(20, 0, 0);

#[embassy_executor::task]
pub async fn display_task(
    spi2: esp_hal::peripherals::SPI2<'static>,
    mosi: esp_hal::peripherals::GPIO15<'static>,
    clk: esp_hal::peripherals::GPIO13<'static>,
    cs_pin: esp_hal::peripherals::GPIO5<'static>,
    dc_pin: esp_hal::peripherals::GPIO14<'static>,
    rst_pin: esp_hal::peripherals::GPIO12<'static>,
    bl_pin: esp_hal::peripherals::GPIO27<'static>,
) {
    let mut backlight = Output::new(bl_pin, Level::High, OutputConfig::default());

    // Configure SPI bus (40 MHz, Mode 0)
    let spi_config = SpiConfig::default()
        .with_frequency(Rate::from_mhz(board::DISPLAY_SPI_FREQ_MHZ))
        .with_mode(Mode::_0);
    let spi = match Spi::new(spi2, spi_config) {
        Ok(spi) => spi.with_sck(clk).with_mosi(mosi),
        Err(e) => {
            log::error!("Display SPI init failed: {:?}", e);
            return;
        }
    };

    let cs = Output::new(cs_pin, Level::High, OutputConfig::default());
    let Ok(spi_device) = ExclusiveDevice::new_no_delay(spi, cs) else {
        log::error!("Display SPI device init failed");
        return;
    };

    let dc = Output::new(dc_pin, Level::Low, OutputConfig::default());
    let mut buffer = [0u8; 512];
    let di = SpiInterface::new(spi_device, dc, &mut buffer);

    let rst = Output::new(rst_pin, Level::High, OutputConfig::default());
    let mut delay = Delay::new();
    let mut display = match Builder::new(ST7789, di)
        .display_size(board::DISPLAY_WIDTH, board::DISPLAY_HEIGHT)
        .display_offset(52, 40)
        .invert_colors(ColorInversion::Inverted)
        .color_order(ColorOrder::Bgr)
        .orientation(Orientation::new().rotate(Rotation::Deg90))
        .reset_pin(rst)
        .init(&mut delay)
    {
        Ok(d) => d,
        Err(_) => {
            log::error!("Display init failed");
            return;
        }
    };

    log::info!("Display initialized (240x135 landscape)");

    draw_splash(&mut display);
    Timer::after(Duration::from_secs(2)).await;

    let mut last_mode = None;
    loop {
        let frame = crate::DISPLAY_CHANNEL.receive().await;
        let DisplayFrame::Beacon { mode, view } = frame else {
            continue;
        };

        if last_mode != Some(mode) {
            log::debug!("Display mode {:?}", mode);
            match mode {
                DisplayMode::Off => backlight.set_low(),
                _ => backlight.set_high(),
            }
            last_mode = Some(mode);
        }

        match (mode, view) {
            (DisplayMode::Tracking, Some(v)) => draw_tracking(&mut display, &v),
            (DisplayMode::Alert, Some(v)) => draw_alert(&mut display, &v),
            _ => {
                let _ = display.clear(BG);
            }
        }
    }
}

fn draw_splash(display: &mut impl DrawTarget<Color = Rgb565>) {
    let _ = display.clear(BG);

    let style = MonoTextStyle::new(&FONT_6X10, TEXT);
    let accent = MonoTextStyle::new(&FONT_6X10, ACCENT);

    // Center "ZONETRAC" (8 chars × 6px = 48px)
    let _ = Text::new("ZONETRAC", Point::new((W - 48) / 2, 55), style).draw(display);

    let mut ver = heapless::String::<20>::new();
    let _ = write!(ver, "v{}", VERSION);
    let vw = ver.len() as i32 * 6;
    let _ = Text::new(&ver, Point::new((W - vw) / 2, 70), accent).draw(display);

    let tag = "Beacon Gateway";
    let tw = tag.len() as i32 * 6;
    let _ = Text::new(tag, Point::new((W - tw) / 2, 95), MonoTextStyle::new(&FONT_6X10, DIM)).draw(display);
}

fn draw_header(display: &mut impl DrawTarget<Color = Rgb565>, view: &BeaconView, fill: Rgb565) {
    let _ = Rectangle::new(Point::zero(), Size::new(W as u32, 14))
        .into_styled(PrimitiveStyle::with_fill(fill))
        .draw(display);
    let mut header = heapless::String::<40>::new();
    let _ = write!(header, " {}", view.gateway);
    let _ = Text::new(&header, Point::new(0, 10), MonoTextStyle::new(&FONT_6X10, TEXT)).draw(display);
}

fn draw_tracking(display: &mut impl DrawTarget<Color = Rgb565>, view: &BeaconView) {
    let _ = display.clear(BG);
    draw_header(display, view, HEADER_BG);

    let big = MonoTextStyle::new(&FONT_10X20, Rgb565::GREEN);
    let white = MonoTextStyle::new(&FONT_6X10, TEXT);
    let dim = MonoTextStyle::new(&FONT_6X10, DIM);

    let _ = Text::new(&view.name, Point::new(6, 40), big).draw(display);

    let mut line = heapless::String::<40>::new();
    let _ = write!(line, " Distance: {:.2} m", view.distance);
    let _ = Text::new(&line, Point::new(0, 70), white).draw(display);

    line.clear();
    let _ = write!(line, " Last seen: {:.1} s ago", view.elapsed_s);
    let _ = Text::new(&line, Point::new(0, 88), dim).draw(display);
}

fn draw_alert(display: &mut impl DrawTarget<Color = Rgb565>, view: &BeaconView) {
    let _ = display.clear(ALERT_BG);
    draw_header(display, view, ALERT_BG);

    let big = MonoTextStyle::new(&FONT_10X20, TEXT);
    let _ = Text::new("GONE", Point::new((W - 40) / 2, 50), big).draw(display);

    let mut line = heapless::String::<40>::new();
    let _ = write!(line, "{}", view.name);
    let lw = line.len() as i32 * 6;
    let _ = Text::new(&line, Point::new((W - lw) / 2, 80), MonoTextStyle::new(&FONT_6X10, TEXT)).draw(display);
}
