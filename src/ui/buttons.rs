//! GPIO button input with polled debouncing.
//!
//! One active-low button with internal pull-up. The line is sampled every
//! `BUTTON_POLL_MS`; [`PressClassifier`] debounces it and turns accepted
//! presses into Short/Long `ButtonEvent`s for the scale task.

use crate::config::BUTTON_POLL_MS;
use crate::ui::press::{ButtonEvent, PressClassifier};
use defmt::{debug, warn};
use embassy_nrf::gpio::Input;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Sender;
use embassy_time::{Duration, Instant, Ticker};

/// Run the button polling loop.
///
/// Sleeps on the falling edge while idle, then polls until the press has
/// been released and classified.
pub async fn button_task(
    mut btn: Input<'static>,
    tx: &Sender<'static, CriticalSectionRawMutex, ButtonEvent, 4>,
) -> ! {
    let mut classifier = PressClassifier::new();

    loop {
        if btn.is_high() && !classifier.is_pressed() {
            // Idle: no need to poll until something happens.
            btn.wait_for_falling_edge().await;
        }

        let mut ticker = Ticker::every(Duration::from_millis(BUTTON_POLL_MS));
        loop {
            let pressed = btn.is_low();
            if let Some(event) = classifier.update(pressed, Instant::now().as_millis()) {
                debug!("Button: {}", event);
                if tx.try_send(event).is_err() {
                    warn!("Button: event queue full, dropping {}", event.kind);
                }
            }
            // Released and debounced (or a glitch that never counted).
            if !pressed && !classifier.is_pressed() {
                break;
            }
            ticker.next().await;
        }
    }
}
