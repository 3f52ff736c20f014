//! Calibration trigger sequence and two-point calibration.
//!
//! Button events are matched prefix-wise against [`CALIBRATION_SEQUENCE`].
//! A full match starts a two-point calibration: after the unload window the
//! empty raw mean is captured as the zero, the user places the reference weight, and once the
//! load is confirmed the loaded raw mean gives
//! `factor = (raw_loaded - raw_zero) / known_weight`.
//!
//! The state machine is a pure function of `(state, input, now)`. Nothing
//! is applied to the sampling pipeline until `Commit` is emitted, so every
//! abort leaves the existing calibration exactly as it was.
//!
//! ```text
//!  Idle ──press──▶ Accumulating ──7th match──▶ AwaitingZero
//!   ▲                 │ mismatch / gap ≥ 3 s         │ raw mean after 3 s
//!   │◀────────────────┘ ◀──────long press─────────── ▼
//!   │◀──cancel / timeout / bad factor── AwaitingKnownWeight
//!   │                                                │ confirmed + raw mean
//!   └────────────── persisted ◀── Committing ◀───────┘
//! ```

use heapless::Vec;

use crate::config::{
    CALIBRATION_CONFIRM_TIMEOUT_MS, CALIBRATION_UNLOAD_MS, CALIBRATION_WEIGHT_GRAMS,
    SEQUENCE_TIMEOUT_MS,
};
use crate::scale::pipeline::validate_calibration_factor;
use crate::ui::press::{ButtonEvent, PressKind};

pub const CALIBRATION_SEQUENCE_LENGTH: usize = 7;

/// short, short, short, long, short, short, short
pub const CALIBRATION_SEQUENCE: [PressKind; CALIBRATION_SEQUENCE_LENGTH] = [
    PressKind::Short,
    PressKind::Short,
    PressKind::Short,
    PressKind::Long,
    PressKind::Short,
    PressKind::Short,
    PressKind::Short,
];

/// How the controller learns that the reference weight is in place.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfirmTrigger {
    /// A short press confirms the load.
    Press,
    /// The load is assumed in place after a fixed delay.
    Settle { delay_ms: u64 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ControllerConfig {
    pub known_weight_grams: f32,
    pub sequence_timeout_ms: u64,
    pub confirm_timeout_ms: u64,
    /// Raw means arriving sooner than this after `Started` are not a zero.
    pub unload_ms: u64,
    pub trigger: ConfirmTrigger,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            known_weight_grams: CALIBRATION_WEIGHT_GRAMS,
            sequence_timeout_ms: SEQUENCE_TIMEOUT_MS,
            confirm_timeout_ms: CALIBRATION_CONFIRM_TIMEOUT_MS,
            unload_ms: CALIBRATION_UNLOAD_MS,
            trigger: ConfirmTrigger::Press,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CalibrationState {
    Idle,
    Accumulating {
        presses: Vec<PressKind, CALIBRATION_SEQUENCE_LENGTH>,
        last_event_ms: u64,
    },
    AwaitingZero {
        since_ms: u64,
    },
    AwaitingKnownWeight {
        raw_zero: i32,
        since_ms: u64,
        confirmed: bool,
    },
    Committing {
        factor: f32,
        raw_zero: i32,
    },
}

/// Coarse phase for UI and logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationPhase {
    Idle,
    Accumulating(u8),
    AwaitingZero,
    AwaitingKnownWeight,
    Committing,
}

impl CalibrationState {
    pub fn phase(&self) -> CalibrationPhase {
        match self {
            CalibrationState::Idle => CalibrationPhase::Idle,
            CalibrationState::Accumulating { presses, .. } => {
                CalibrationPhase::Accumulating(presses.len() as u8)
            }
            CalibrationState::AwaitingZero { .. } => CalibrationPhase::AwaitingZero,
            CalibrationState::AwaitingKnownWeight { .. } => CalibrationPhase::AwaitingKnownWeight,
            CalibrationState::Committing { .. } => CalibrationPhase::Committing,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationInput {
    Press(ButtonEvent),
    /// Raw mean of the latest sampling cycle.
    RawMean(i32),
    /// Periodic clock tick for timeouts.
    Tick,
}

/// Why an in-progress sequence or calibration was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AbortReason {
    /// Press did not match the sequence at its position.
    Mismatch,
    /// Gap between presses reached the sequence timeout.
    SequenceTimeout,
    /// Reference weight was never confirmed.
    ConfirmTimeout,
    /// Long press while waiting for the reference weight.
    Cancelled,
    /// Computed factor was zero or not finite.
    InvalidFactor,
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationEffect {
    /// Full sequence matched; keep the scale unloaded.
    Started,
    /// Zero captured; place the reference weight.
    ZeroCaptured { raw_zero: i32 },
    /// Reference weight confirmed; next raw mean is the loaded point.
    LoadConfirmed,
    /// Persist `factor` and install it together with `raw_zero`.
    Commit { factor: f32, raw_zero: i32 },
    Aborted(AbortReason),
}

/// Pure transition function.
pub fn step(
    state: CalibrationState,
    input: CalibrationInput,
    now_ms: u64,
    config: &ControllerConfig,
) -> (CalibrationState, Option<CalibrationEffect>) {
    use CalibrationInput::*;
    use CalibrationState::*;

    match (state, input) {
        (Idle, Press(event)) => start_sequence(event),
        (Idle, _) => (Idle, None),

        (
            Accumulating {
                mut presses,
                last_event_ms,
            },
            Press(event),
        ) => {
            if event.at_ms.saturating_sub(last_event_ms) >= config.sequence_timeout_ms {
                // The old attempt expired; this press starts a fresh one.
                return start_sequence(event);
            }
            let position = presses.len();
            if CALIBRATION_SEQUENCE[position] != event.kind || presses.push(event.kind).is_err() {
                return (Idle, Some(CalibrationEffect::Aborted(AbortReason::Mismatch)));
            }
            if presses.len() == CALIBRATION_SEQUENCE_LENGTH {
                return (
                    AwaitingZero {
                        since_ms: event.at_ms,
                    },
                    Some(CalibrationEffect::Started),
                );
            }
            (
                Accumulating {
                    presses,
                    last_event_ms: event.at_ms,
                },
                None,
            )
        }
        (
            Accumulating {
                presses,
                last_event_ms,
            },
            Tick | RawMean(_),
        ) => {
            if now_ms.saturating_sub(last_event_ms) >= config.sequence_timeout_ms {
                (
                    Idle,
                    Some(CalibrationEffect::Aborted(AbortReason::SequenceTimeout)),
                )
            } else {
                (
                    Accumulating {
                        presses,
                        last_event_ms,
                    },
                    None,
                )
            }
        }

        (AwaitingZero { since_ms }, RawMean(raw_zero))
            if now_ms.saturating_sub(since_ms) >= config.unload_ms =>
        {
            (
                AwaitingKnownWeight {
                    raw_zero,
                    since_ms: now_ms,
                    confirmed: false,
                },
                Some(CalibrationEffect::ZeroCaptured { raw_zero }),
            )
        }
        (
            AwaitingZero { .. },
            Press(ButtonEvent {
                kind: PressKind::Long,
                ..
            }),
        ) => (Idle, Some(CalibrationEffect::Aborted(AbortReason::Cancelled))),
        (AwaitingZero { since_ms }, _) => (AwaitingZero { since_ms }, None),

        (
            AwaitingKnownWeight {
                raw_zero,
                since_ms,
                confirmed,
            },
            input,
        ) => await_known_weight(raw_zero, since_ms, confirmed, input, now_ms, config),

        (Committing { factor, raw_zero }, _) => (Committing { factor, raw_zero }, None),
    }
}

fn start_sequence(event: ButtonEvent) -> (CalibrationState, Option<CalibrationEffect>) {
    if event.kind != CALIBRATION_SEQUENCE[0] {
        return (
            CalibrationState::Idle,
            Some(CalibrationEffect::Aborted(AbortReason::Mismatch)),
        );
    }
    let mut presses = Vec::new();
    let _ = presses.push(event.kind);
    (
        CalibrationState::Accumulating {
            presses,
            last_event_ms: event.at_ms,
        },
        None,
    )
}

fn await_known_weight(
    raw_zero: i32,
    since_ms: u64,
    confirmed: bool,
    input: CalibrationInput,
    now_ms: u64,
    config: &ControllerConfig,
) -> (CalibrationState, Option<CalibrationEffect>) {
    let waiting = |confirmed| CalibrationState::AwaitingKnownWeight {
        raw_zero,
        since_ms,
        confirmed,
    };

    match input {
        CalibrationInput::Press(ButtonEvent {
            kind: PressKind::Long,
            ..
        }) => (
            CalibrationState::Idle,
            Some(CalibrationEffect::Aborted(AbortReason::Cancelled)),
        ),
        CalibrationInput::Press(_) => {
            if !confirmed && config.trigger == ConfirmTrigger::Press {
                (waiting(true), Some(CalibrationEffect::LoadConfirmed))
            } else {
                (waiting(confirmed), None)
            }
        }
        CalibrationInput::Tick => {
            let elapsed = now_ms.saturating_sub(since_ms);
            if confirmed {
                return (waiting(true), None);
            }
            if let ConfirmTrigger::Settle { delay_ms } = config.trigger {
                if elapsed >= delay_ms {
                    return (waiting(true), Some(CalibrationEffect::LoadConfirmed));
                }
            }
            if elapsed >= config.confirm_timeout_ms {
                return (
                    CalibrationState::Idle,
                    Some(CalibrationEffect::Aborted(AbortReason::ConfirmTimeout)),
                );
            }
            (waiting(false), None)
        }
        CalibrationInput::RawMean(raw_loaded) if confirmed => {
            let counts = raw_loaded as i64 - raw_zero as i64;
            let factor = counts as f32 / config.known_weight_grams;
            match validate_calibration_factor(factor) {
                Ok(factor) => (
                    CalibrationState::Committing { factor, raw_zero },
                    Some(CalibrationEffect::Commit { factor, raw_zero }),
                ),
                Err(_) => (
                    CalibrationState::Idle,
                    Some(CalibrationEffect::Aborted(AbortReason::InvalidFactor)),
                ),
            }
        }
        CalibrationInput::RawMean(_) => (waiting(false), None),
    }
}

/// Owns the calibration state and applies [`step`].
pub struct CalibrationController {
    state: CalibrationState,
    config: ControllerConfig,
}

impl CalibrationController {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            state: CalibrationState::Idle,
            config,
        }
    }

    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.state.phase()
    }

    pub fn is_calibrating(&self) -> bool {
        matches!(
            self.state,
            CalibrationState::AwaitingZero { .. }
                | CalibrationState::AwaitingKnownWeight { .. }
                | CalibrationState::Committing { .. }
        )
    }

    pub fn handle(&mut self, input: CalibrationInput, now_ms: u64) -> Option<CalibrationEffect> {
        let state = core::mem::replace(&mut self.state, CalibrationState::Idle);
        let (next, effect) = step(state, input, now_ms, &self.config);
        self.state = next;
        effect
    }

    /// The commit was handled (persisted or not); back to `Idle`.
    pub fn finish_commit(&mut self) {
        if matches!(self.state, CalibrationState::Committing { .. }) {
            self.state = CalibrationState::Idle;
        }
    }
}

impl Default for CalibrationController {
    fn default() -> Self {
        Self::new(ControllerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(kind: PressKind, at_ms: u64) -> CalibrationInput {
        CalibrationInput::Press(ButtonEvent { kind, at_ms })
    }

    /// Feed the full trigger sequence, one press every `gap_ms`. Returns
    /// the first time a raw mean is taken as the zero.
    fn feed_sequence(c: &mut CalibrationController, start: u64, gap_ms: u64) -> u64 {
        let mut t = start;
        for kind in CALIBRATION_SEQUENCE {
            c.handle(press(kind, t), t);
            t += gap_ms;
        }
        t - gap_ms + CALIBRATION_UNLOAD_MS
    }

    #[test]
    fn full_sequence_starts_calibration() {
        let mut c = CalibrationController::default();
        let mut last = None;
        let mut t = 0;
        for kind in CALIBRATION_SEQUENCE {
            last = c.handle(press(kind, t), t);
            t += 800;
        }
        assert_eq!(last, Some(CalibrationEffect::Started));
        assert_eq!(c.phase(), CalibrationPhase::AwaitingZero);
        assert!(c.is_calibrating());
    }

    #[test]
    fn substituted_event_resets_and_clears_buffer() {
        for bad_position in 0..CALIBRATION_SEQUENCE_LENGTH {
            let mut c = CalibrationController::default();
            let mut effect = None;
            for (i, kind) in CALIBRATION_SEQUENCE.iter().enumerate().take(bad_position + 1) {
                let kind = if i == bad_position {
                    match kind {
                        PressKind::Short => PressKind::Long,
                        PressKind::Long => PressKind::Short,
                    }
                } else {
                    *kind
                };
                let t = i as u64 * 500;
                effect = c.handle(press(kind, t), t);
            }
            assert_eq!(effect, Some(CalibrationEffect::Aborted(AbortReason::Mismatch)));
            assert_eq!(c.state(), &CalibrationState::Idle);
        }
    }

    #[test]
    fn reordered_sequence_resets() {
        let mut c = CalibrationController::default();
        let order = [
            PressKind::Short,
            PressKind::Short,
            PressKind::Long,
            PressKind::Short,
        ];
        let mut effects = [None; 4];
        for (i, kind) in order.into_iter().enumerate() {
            effects[i] = c.handle(press(kind, i as u64 * 500), i as u64 * 500);
            if i == 2 {
                assert_eq!(c.state(), &CalibrationState::Idle);
            }
        }
        assert_eq!(
            effects[2],
            Some(CalibrationEffect::Aborted(AbortReason::Mismatch))
        );
        // The trailing Short opens a new attempt at position one.
        assert_eq!(effects[3], None);
        assert_eq!(c.phase(), CalibrationPhase::Accumulating(1));
    }

    #[test]
    fn zero_waits_for_unload_window() {
        let mut c = CalibrationController::default();
        let t = feed_sequence(&mut c, 0, 600);

        // Still loaded right after the trigger: not a zero.
        assert_eq!(c.handle(CalibrationInput::RawMean(90_000), t - 1), None);
        assert_eq!(c.phase(), CalibrationPhase::AwaitingZero);
        assert_eq!(
            c.handle(CalibrationInput::RawMean(1000), t),
            Some(CalibrationEffect::ZeroCaptured { raw_zero: 1000 })
        );
    }

    #[test]
    fn long_press_cancels_while_unloading() {
        let mut c = CalibrationController::default();
        let t = feed_sequence(&mut c, 0, 600);
        assert_eq!(
            c.handle(press(PressKind::Long, t - 1000), t - 1000),
            Some(CalibrationEffect::Aborted(AbortReason::Cancelled))
        );
        assert_eq!(c.state(), &CalibrationState::Idle);
    }

    #[test]
    fn gap_at_timeout_abandons_sequence() {
        let mut c = CalibrationController::default();
        c.handle(press(PressKind::Short, 0), 0);
        c.handle(press(PressKind::Short, 500), 500);
        assert_eq!(c.handle(CalibrationInput::Tick, 3499), None);
        assert_eq!(c.phase(), CalibrationPhase::Accumulating(2));
        assert_eq!(
            c.handle(CalibrationInput::Tick, 3500),
            Some(CalibrationEffect::Aborted(AbortReason::SequenceTimeout))
        );
        assert_eq!(c.state(), &CalibrationState::Idle);
    }

    #[test]
    fn late_press_starts_fresh_sequence() {
        let mut c = CalibrationController::default();
        c.handle(press(PressKind::Short, 0), 0);
        c.handle(press(PressKind::Short, 500), 500);
        c.handle(press(PressKind::Short, 1000), 1000);
        // Long arrives too late: the old attempt is gone and a lone Long
        // cannot start a new one.
        assert_eq!(
            c.handle(press(PressKind::Long, 4000), 4000),
            Some(CalibrationEffect::Aborted(AbortReason::Mismatch))
        );
        // A late Short restarts at position one.
        c.handle(press(PressKind::Short, 5000), 5000);
        c.handle(press(PressKind::Short, 9000), 9000);
        assert_eq!(c.phase(), CalibrationPhase::Accumulating(1));
    }

    #[test]
    fn two_point_reference_scenario() {
        let mut c = CalibrationController::default();
        let t = feed_sequence(&mut c, 0, 600);

        assert_eq!(
            c.handle(CalibrationInput::RawMean(1000), t + 100),
            Some(CalibrationEffect::ZeroCaptured { raw_zero: 1000 })
        );
        // Unconfirmed samples are ignored.
        assert_eq!(c.handle(CalibrationInput::RawMean(900_000), t + 200), None);
        assert_eq!(
            c.handle(press(PressKind::Short, t + 5000), t + 5000),
            Some(CalibrationEffect::LoadConfirmed)
        );
        let effect = c.handle(CalibrationInput::RawMean(1_906_520), t + 5100);
        match effect {
            Some(CalibrationEffect::Commit { factor, raw_zero }) => {
                assert_eq!(raw_zero, 1000);
                // (1_906_520 - 1000) / 4535.92 = 420.096
                assert!((factor - 420.0).abs() < 0.1);
            }
            other => panic!("expected commit, got {:?}", other),
        }
        assert_eq!(c.phase(), CalibrationPhase::Committing);

        // Presses are ignored until the commit finishes.
        assert_eq!(c.handle(press(PressKind::Short, t + 5200), t + 5200), None);
        c.finish_commit();
        assert_eq!(c.phase(), CalibrationPhase::Idle);
    }

    #[test]
    fn zero_factor_aborts() {
        let mut c = CalibrationController::default();
        let t = feed_sequence(&mut c, 0, 600);
        c.handle(CalibrationInput::RawMean(5000), t);
        c.handle(press(PressKind::Short, t + 1000), t + 1000);
        assert_eq!(
            c.handle(CalibrationInput::RawMean(5000), t + 1100),
            Some(CalibrationEffect::Aborted(AbortReason::InvalidFactor))
        );
        assert_eq!(c.state(), &CalibrationState::Idle);
    }

    #[test]
    fn long_press_cancels_while_waiting_for_weight() {
        let mut c = CalibrationController::default();
        let t = feed_sequence(&mut c, 0, 600);
        c.handle(CalibrationInput::RawMean(1000), t);
        assert_eq!(
            c.handle(press(PressKind::Long, t + 2000), t + 2000),
            Some(CalibrationEffect::Aborted(AbortReason::Cancelled))
        );
        assert!(!c.is_calibrating());
    }

    #[test]
    fn unconfirmed_weight_times_out() {
        let mut c = CalibrationController::default();
        let t = feed_sequence(&mut c, 0, 600);
        c.handle(CalibrationInput::RawMean(1000), t);
        assert_eq!(
            c.handle(CalibrationInput::Tick, t + CALIBRATION_CONFIRM_TIMEOUT_MS - 1),
            None
        );
        assert_eq!(
            c.handle(CalibrationInput::Tick, t + CALIBRATION_CONFIRM_TIMEOUT_MS),
            Some(CalibrationEffect::Aborted(AbortReason::ConfirmTimeout))
        );
    }

    #[test]
    fn settle_trigger_confirms_after_delay() {
        let mut c = CalibrationController::new(ControllerConfig {
            trigger: ConfirmTrigger::Settle {
                delay_ms: crate::config::CALIBRATION_SETTLE_MS,
            },
            ..Default::default()
        });
        let t = feed_sequence(&mut c, 0, 600);
        c.handle(CalibrationInput::RawMean(1000), t);
        // Short presses do not confirm in settle mode.
        assert_eq!(c.handle(press(PressKind::Short, t + 100), t + 100), None);
        assert_eq!(c.handle(CalibrationInput::Tick, t + 4999), None);
        assert_eq!(
            c.handle(CalibrationInput::Tick, t + 5000),
            Some(CalibrationEffect::LoadConfirmed)
        );
        assert!(matches!(
            c.handle(CalibrationInput::RawMean(1_906_520), t + 5100),
            Some(CalibrationEffect::Commit { .. })
        ));
    }
}
