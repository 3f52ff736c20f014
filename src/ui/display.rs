//! SSD1306 OLED display wrapper (128×32).
//!
//! Top line: weight in the configured unit (large font). Bottom line:
//! device name and peak, the calibration prompt while calibrating, or a
//! warning while the last settings write has failed.

use core::fmt::Write;

use crate::config::{CALIBRATION_WEIGHT_LBS, DISPLAY_UPDATE_RATE_HZ, OLED_ADDRESS};
use crate::error::Error;
use crate::sampler;
use crate::scale::units::format_weight;
use crate::scale::Snapshot;
use crate::ui::Screen;
use defmt::{info, warn};
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};
use embedded_graphics::mono_font::ascii::{FONT_10X20, FONT_6X10};
use embedded_graphics::mono_font::{MonoFont, MonoTextStyle, MonoTextStyleBuilder};
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::text::Text;
use heapless::String;
use ssd1306::mode::BufferedGraphicsMode;
use ssd1306::prelude::*;
use ssd1306::I2CDisplayInterface;
use ssd1306::Ssd1306;

/// Type alias for the concrete display driver.
///
/// Generic over the I²C implementation so callers pass in their HAL's
/// I²C peripheral.
pub type Display<I2C> =
    Ssd1306<I2CInterface<I2C>, DisplaySize128x32, BufferedGraphicsMode<DisplaySize128x32>>;

/// `true` = panel on. Sent by the scale task around sleep.
static PANEL: Signal<CriticalSectionRawMutex, bool> = Signal::new();
/// Acknowledges that the panel has been switched off.
static BLANKED: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Switch the panel off and wait (bounded) for the display task to do it.
pub async fn blank() {
    BLANKED.reset();
    PANEL.signal(false);
    let _ = embassy_time::with_timeout(Duration::from_millis(200), BLANKED.wait()).await;
}

pub fn unblank() {
    PANEL.signal(true);
}

/// Initialise the SSD1306 display and clear the screen.
pub fn init<I2C>(i2c: I2C) -> Display<I2C>
where
    I2C: embedded_hal::i2c::I2c,
{
    let interface = I2CDisplayInterface::new_custom_address(i2c, OLED_ADDRESS);
    let mut display = Ssd1306::new(interface, DisplaySize128x32, DisplayRotation::Rotate0)
        .into_buffered_graphics_mode();
    if display.init().is_err() {
        warn!("Display: init failed");
    }
    display.clear_buffer();
    let _ = display.flush();
    display
}

fn text_style(font: &'static MonoFont<'static>) -> MonoTextStyle<'static, BinaryColor> {
    MonoTextStyleBuilder::new()
        .font(font)
        .text_color(BinaryColor::On)
        .build()
}

fn draw_lines<I2C>(display: &mut Display<I2C>, top: &str, bottom: &str) -> Result<(), Error>
where
    I2C: embedded_hal::i2c::I2c,
{
    display.clear_buffer();
    let _ = Text::new(top, Point::new(0, 15), text_style(&FONT_10X20)).draw(display);
    let _ = Text::new(bottom, Point::new(0, 30), text_style(&FONT_6X10)).draw(display);
    display.flush().map_err(|_| Error::Display)
}

/// Render the weight screen.
pub fn draw_weight<I2C>(display: &mut Display<I2C>, snapshot: &Snapshot) -> Result<(), Error>
where
    I2C: embedded_hal::i2c::I2c,
{
    let mut top: String<24> = String::new();
    let _ = write!(
        top,
        "{} {}",
        format_weight(snapshot.weight.grams, snapshot.unit),
        snapshot.unit.label()
    );

    let mut bottom: String<32> = String::new();
    if snapshot.save_error.is_some() {
        let _ = bottom.push_str("save failed");
    } else {
        let _ = write!(
            bottom,
            "{}  pk {}",
            snapshot.name,
            format_weight(snapshot.weight.peak_grams, snapshot.unit)
        );
    }

    draw_lines(display, &top, &bottom)
}

/// Render a calibration step.
pub fn draw_calibration<I2C>(display: &mut Display<I2C>, screen: Screen) -> Result<(), Error>
where
    I2C: embedded_hal::i2c::I2c,
{
    let mut bottom: String<32> = String::new();
    let top = match screen {
        Screen::Sequence(count) => {
            let _ = write!(bottom, "sequence {}/7", count);
            "CAL?"
        }
        Screen::RemoveLoad => {
            let _ = bottom.push_str("remove all weight");
            "CAL 1/2"
        }
        Screen::PlaceWeight => {
            let _ = write!(bottom, "place {} lb, press", CALIBRATION_WEIGHT_LBS);
            "CAL 2/2"
        }
        Screen::Saving => {
            let _ = bottom.push_str("saving...");
            "CAL"
        }
        Screen::Weight => return Ok(()),
    };
    draw_lines(display, top, &bottom)
}

pub fn draw<I2C>(display: &mut Display<I2C>, snapshot: &Snapshot) -> Result<(), Error>
where
    I2C: embedded_hal::i2c::I2c,
{
    match Screen::for_phase(snapshot.phase) {
        Screen::Weight => draw_weight(display, snapshot),
        screen => draw_calibration(display, screen),
    }
}

/// Refresh the display from the published snapshot at a fixed rate.
pub async fn display_task<I2C>(mut display: Display<I2C>) -> !
where
    I2C: embedded_hal::i2c::I2c,
{
    let period = Duration::from_millis(1000 / DISPLAY_UPDATE_RATE_HZ as u64);
    let mut panel_on = true;
    let mut healthy = true;

    loop {
        match select(Timer::after(period), PANEL.wait()).await {
            Either::First(()) => {
                if !panel_on {
                    continue;
                }
                match draw(&mut display, &sampler::snapshot()) {
                    Ok(()) if !healthy => {
                        info!("Display: recovered");
                        healthy = true;
                    }
                    Err(e) if healthy => {
                        warn!("Display: {}", e);
                        healthy = false;
                    }
                    _ => {}
                }
            }
            Either::Second(on) => {
                panel_on = on;
                if display.set_display_on(on).is_err() {
                    warn!("Display: power toggle failed");
                }
                info!("Display: {}", if on { "on" } else { "off" });
                if !on {
                    BLANKED.signal(());
                }
            }
        }
    }
}
