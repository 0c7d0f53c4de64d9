//! Display driver for M5StickC Plus2 (ST7789V2, 135x240, SPI).
//!
//! ESP-IDF std version using the esp-idf-svc SPI driver and mipidsi.
//! Draws whatever [`DisplayFrame`] the main loop hands over: the tracked
//! beacon with a timed "GONE" alert, or the radar's three target slots.

use std::sync::mpsc::Receiver;
use std::time::Duration;

use embedded_graphics::mono_font::ascii::FONT_6X10;
use embedded_graphics::mono_font::{MonoTextStyle, MonoTextStyleBuilder};
use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{PrimitiveStyle, Rectangle};
use embedded_graphics::text::Text;
use esp_idf_svc::hal::delay::Delay;
use esp_idf_svc::hal::gpio::*;
use esp_idf_svc::hal::peripheral::Peripheral;
use esp_idf_svc::hal::spi::config::Config as SpiConfig;
use esp_idf_svc::hal::spi::config::DriverConfig as SpiDriverConfig;
use esp_idf_svc::hal::spi::{SpiDeviceDriver, SpiDriver};
use esp_idf_svc::hal::units::Hertz;
use mipidsi::interface::SpiInterface;
use mipidsi::models::ST7789;
use mipidsi::options::{ColorInversion, ColorOrder, Orientation, Rotation};
use mipidsi::Builder;

use zonetrac::board;
use zonetrac::engine::DisplayFrame;
use zonetrac::presentation::{BeaconView, DisplayMode, RadarView};
use zonetrac::protocol::VERSION;

// ── Display geometry ─────────────────────────────────────────────────

const W: i32 = 240;
const H: i32 = 135;
const ROW_H: i32 = 14;
const LINE_W: usize = (W / 6) as usize;

// ── Color palette ────────────────────────────────────────────────────

const BG: Rgb565 = Rgb565::BLACK;
const HEADER_BG: Rgb565 = Rgb565::new(2, 4, 12);
const ALERT_BG: Rgb565 = Rgb565::new(20, 0, 0);
const FG: Rgb565 = Rgb565::WHITE;
const ACCENT: Rgb565 = Rgb565::new(0, 50, 0);
const DIM: Rgb565 = Rgb565::new(12, 24, 12);

// ── Screen renderer ──────────────────────────────────────────────────

/// Row-oriented text renderer. Every row is padded to the full width so
/// redrawing over the previous frame needs no clear.
struct Screen<'a, D> {
    display: &'a mut D,
    y: i32,
    bg: Rgb565,
    buf: heapless::String<40>,
}

impl<'a, D: DrawTarget<Color = Rgb565>> Screen<'a, D> {
    fn new(display: &'a mut D, bg: Rgb565) -> Self {
        Self {
            display,
            y: 0,
            bg,
            buf: heapless::String::new(),
        }
    }

    fn clear(&mut self) {
        let _ = self.display.clear(self.bg);
        self.y = 0;
    }

    fn skip(&mut self, pixels: i32) {
        self.y += pixels;
    }

    fn row(&mut self, color: Rgb565, args: core::fmt::Arguments<'_>) {
        self.buf.clear();
        let _ = core::fmt::write(&mut self.buf, args);
        self.pad();
        self.emit(color, self.bg, 0);
        self.y += ROW_H;
    }

    fn centered(&mut self, color: Rgb565, args: core::fmt::Arguments<'_>) {
        self.buf.clear();
        let _ = core::fmt::write(&mut self.buf, args);
        let x = (W - self.buf.len() as i32 * 6) / 2;
        self.emit(color, self.bg, x);
        self.y += ROW_H;
    }

    fn header(&mut self, title: &str, indicator: &str, indicator_color: Rgb565, fill: Rgb565) {
        let _ = Rectangle::new(Point::new(0, self.y), Size::new(W as u32, ROW_H as u32))
            .into_styled(PrimitiveStyle::with_fill(fill))
            .draw(self.display);

        self.buf.clear();
        let _ = core::fmt::write(&mut self.buf, format_args!(" {}", title));
        self.emit(FG, fill, 0);

        let x = W - indicator.len() as i32 * 6 - 2;
        let _ = Text::new(
            indicator,
            Point::new(x, self.y + 10),
            Self::text_style(indicator_color, fill),
        )
        .draw(self.display);
        self.y += ROW_H;
    }

    fn divider(&mut self) {
        let _ = Rectangle::new(Point::new(0, self.y), Size::new(W as u32, 1))
            .into_styled(PrimitiveStyle::with_fill(DIM))
            .draw(self.display);
        self.y += 3;
    }

    fn pad(&mut self) {
        while self.buf.len() < LINE_W {
            let _ = self.buf.push(' ');
        }
    }

    fn emit(&mut self, fg: Rgb565, bg: Rgb565, x: i32) {
        let _ = Text::new(&self.buf, Point::new(x, self.y + 10), Self::text_style(fg, bg))
            .draw(self.display);
    }

    fn text_style(fg: Rgb565, bg: Rgb565) -> MonoTextStyle<'static, Rgb565> {
        MonoTextStyleBuilder::new()
            .font(&FONT_6X10)
            .text_color(fg)
            .background_color(bg)
            .build()
    }
}

macro_rules! row {
    ($s:expr, $color:expr, $($arg:tt)*) => {
        $s.row($color, format_args!($($arg)*))
    };
}

macro_rules! centered {
    ($s:expr, $color:expr, $($arg:tt)*) => {
        $s.centered($color, format_args!($($arg)*))
    };
}

// ── Screen implementations ───────────────────────────────────────────

fn draw_splash(display: &mut impl DrawTarget<Color = Rgb565>) {
    let mut s = Screen::new(display, BG);
    s.clear();
    s.skip(42);
    centered!(s, FG, "ZONETRAC");
    centered!(s, ACCENT, "v{}", VERSION);
    s.skip(12);
    if cfg!(feature = "radar") {
        centered!(s, DIM, "Radar Node (std)");
    } else {
        centered!(s, DIM, "Beacon Gateway (std)");
    }
}

fn draw_tracking(display: &mut impl DrawTarget<Color = Rgb565>, view: &BeaconView) {
    let mut s = Screen::new(display, BG);
    let (indicator, color) = if view.present {
        ("[IN]", Rgb565::GREEN)
    } else {
        ("[--]", DIM)
    };
    s.header(&view.gateway, indicator, color, HEADER_BG);
    s.skip(8);
    row!(s, Rgb565::GREEN, " {}", view.name);
    s.divider();
    row!(s, FG, " Distance:  {:.2} m", view.distance);
    row!(s, DIM, " Last seen: {:.1} s ago", view.elapsed_s);
}

fn draw_alert(display: &mut impl DrawTarget<Color = Rgb565>, view: &BeaconView) {
    let mut s = Screen::new(display, ALERT_BG);
    s.clear();
    s.header(&view.gateway, "[OUT]", FG, ALERT_BG);
    s.skip(28);
    centered!(s, FG, "GONE");
    s.skip(6);
    centered!(s, FG, "{}", view.name);
}

fn draw_radar(display: &mut impl DrawTarget<Color = Rgb565>, view: &RadarView) {
    let mut s = Screen::new(display, BG);
    let (indicator, color) = if view.any_present() {
        ("[DETECT]", Rgb565::GREEN)
    } else {
        ("[CLEAR]", DIM)
    };
    s.header("LD2450", indicator, color, HEADER_BG);
    for (i, slot) in view.slots.iter().enumerate() {
        if slot.present {
            row!(s, Rgb565::GREEN, " Target {}: {} cm", i + 1, slot.distance_cm);
        } else {
            row!(s, DIM, " Target {}: ---", i + 1);
        }
    }
    s.divider();
    row!(s, FG, " Closest: {} cm", view.closest_cm);
    row!(
        s,
        DIM,
        " Range: {} cm  Filter: {}",
        view.range_cm,
        if view.filter_enable { "ON" } else { "OFF" }
    );
}

// ── Display thread ───────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
pub fn display_thread(
    frames: Receiver<DisplayFrame>,
    spi: impl Peripheral<P = impl esp_idf_svc::hal::spi::SpiAnyPins> + 'static,
    mosi: impl Peripheral<P = impl OutputPin> + 'static,
    clk: impl Peripheral<P = impl OutputPin> + 'static,
    cs_pin: impl Peripheral<P = impl OutputPin> + 'static,
    dc_pin: impl Peripheral<P = impl OutputPin> + 'static,
    rst_pin: impl Peripheral<P = impl IOPin> + 'static,
    bl_pin: impl Peripheral<P = impl OutputPin> + 'static,
) {
    if let Err(e) = run(frames, spi, mosi, clk, cs_pin, dc_pin, rst_pin, bl_pin) {
        log::error!("Display thread stopped: {:?}", e);
    }
}

#[allow(clippy::too_many_arguments)]
fn run(
    frames: Receiver<DisplayFrame>,
    spi: impl Peripheral<P = impl esp_idf_svc::hal::spi::SpiAnyPins> + 'static,
    mosi: impl Peripheral<P = impl OutputPin> + 'static,
    clk: impl Peripheral<P = impl OutputPin> + 'static,
    cs_pin: impl Peripheral<P = impl OutputPin> + 'static,
    dc_pin: impl Peripheral<P = impl OutputPin> + 'static,
    rst_pin: impl Peripheral<P = impl IOPin> + 'static,
    bl_pin: impl Peripheral<P = impl OutputPin> + 'static,
) -> anyhow::Result<()> {
    log::info!("Display thread starting");

    // Manual hardware reset
    let mut rst = PinDriver::output(rst_pin)?;
    rst.set_low()?;
    std::thread::sleep(Duration::from_millis(20));
    rst.set_high()?;
    std::thread::sleep(Duration::from_millis(120));

    // SPI bus
    let spi_driver = SpiDriver::new(spi, clk, mosi, None::<AnyIOPin>, &SpiDriverConfig::new())?;
    let spi_config = SpiConfig::new()
        .baudrate(Hertz(board::DISPLAY_SPI_FREQ_MHZ * 1_000_000))
        .data_mode(embedded_hal::spi::MODE_0);
    let spi_device = SpiDeviceDriver::new(spi_driver, Some(cs_pin), &spi_config)?;

    let dc = PinDriver::output(dc_pin)?;
    let mut buffer = [0u8; 512];
    let di = SpiInterface::new(spi_device, dc, &mut buffer);

    let mut delay = Delay::new_default();
    let mut display = Builder::new(ST7789, di)
        .display_size(board::DISPLAY_WIDTH, board::DISPLAY_HEIGHT)
        .display_offset(52, 40)
        .invert_colors(ColorInversion::Inverted)
        .color_order(ColorOrder::Bgr)
        .orientation(Orientation::new().rotate(Rotation::Deg90))
        .init(&mut delay)
        .map_err(|e| anyhow::anyhow!("display init: {:?}", e))?;

    log::info!("Display initialized ({}x{} landscape)", W, H);

    let mut bl = PinDriver::output(bl_pin)?;
    bl.set_high()?;

    draw_splash(&mut display);
    std::thread::sleep(Duration::from_secs(2));
    let _ = display.clear(BG);

    let mut last_mode: Option<DisplayMode> = None;

    // Ends when the main loop drops the sender
    for frame in frames {
        match frame {
            DisplayFrame::Beacon { mode, view } => {
                let mode_changed = last_mode != Some(mode);
                if mode_changed {
                    log::debug!("Display mode {:?}", mode);
                    if mode == DisplayMode::Off {
                        bl.set_low()?;
                    } else {
                        bl.set_high()?;
                    }
                    let _ = display.clear(BG);
                    last_mode = Some(mode);
                }
                match (mode, view) {
                    (DisplayMode::Tracking, Some(v)) => draw_tracking(&mut display, &v),
                    (DisplayMode::Alert, Some(v)) if mode_changed => draw_alert(&mut display, &v),
                    _ => {}
                }
            }
            DisplayFrame::Radar(view) => draw_radar(&mut display, &view),
        }
    }
    Ok(())
}
