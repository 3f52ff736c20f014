//! Button press classification.
//!
//! Turns a polled, bouncing active-low level into `Short`/`Long` press
//! events. A level change is only accepted once it has held for the full
//! debounce window. Presses that fall between the short and long limits
//! are dropped so borderline presses never reach the sequence matcher.

use crate::config::{BUTTON_DEBOUNCE_MS, LONG_PRESS_MS, SHORT_PRESS_MAX_MS};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PressKind {
    Short,
    Long,
}

/// One classified press.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ButtonEvent {
    pub kind: PressKind,
    /// Time the release edge started (ms since boot).
    pub at_ms: u64,
}

/// Map a press duration onto a kind, or `None` inside the dead zone.
pub fn classify_press(duration_ms: u64) -> Option<PressKind> {
    if duration_ms <= SHORT_PRESS_MAX_MS {
        Some(PressKind::Short)
    } else if duration_ms >= LONG_PRESS_MS {
        Some(PressKind::Long)
    } else {
        None
    }
}

/// Debouncing press classifier. Poll faster than the debounce window.
#[derive(Clone, Copy, Debug)]
pub struct PressClassifier {
    /// Last accepted level (true = pressed).
    stable: bool,
    /// Level currently being observed.
    candidate: bool,
    /// When `candidate` first appeared.
    candidate_since_ms: u64,
    /// Start of the accepted press, if the button is down.
    pressed_at_ms: Option<u64>,
}

impl PressClassifier {
    pub const fn new() -> Self {
        Self {
            stable: false,
            candidate: false,
            candidate_since_ms: 0,
            pressed_at_ms: None,
        }
    }

    pub fn is_pressed(&self) -> bool {
        self.stable
    }

    /// Feed one sample of the (already inverted) button level.
    pub fn update(&mut self, pressed: bool, now_ms: u64) -> Option<ButtonEvent> {
        if pressed != self.candidate {
            self.candidate = pressed;
            self.candidate_since_ms = now_ms;
            return None;
        }

        if self.candidate == self.stable {
            return None;
        }

        if now_ms.saturating_sub(self.candidate_since_ms) < BUTTON_DEBOUNCE_MS {
            return None;
        }

        self.stable = self.candidate;
        let edge_ms = self.candidate_since_ms;

        if self.stable {
            self.pressed_at_ms = Some(edge_ms);
            return None;
        }

        let started = self.pressed_at_ms.take()?;
        classify_press(edge_ms.saturating_sub(started)).map(|kind| ButtonEvent {
            kind,
            at_ms: edge_ms,
        })
    }
}

impl Default for PressClassifier {
    fn default() -> Self {
        Self::new()
    }
}
