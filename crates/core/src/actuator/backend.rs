// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hardware abstraction for the Actuator Controller's output lines and win
//! sensor input. Two implementations: [`SimBackend`] (default, used by every
//! test and by development off the cabinet) and, behind the `hardware`
//! feature, [`RppalBackend`] driving real GPIO via `rppal`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::PinMap;
use crate::error::ClawError;

/// Every physical line the Actuator Controller can assert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Line {
    Coin,
    Drop,
    North,
    South,
    East,
    West,
}

impl Line {
    pub fn all() -> [Line; 6] {
        [Line::Coin, Line::Drop, Line::North, Line::South, Line::East, Line::West]
    }
}

/// Logical on/off control of output lines plus a debounced win-sensor read.
/// Implementations describe the *logical* level; polarity inversion for
/// active-low wiring happens inside the implementation, never at call sites.
pub trait HardwareBackend: Send + Sync {
    /// Assert (`true`) or deassert (`false`) `line`'s logical output.
    fn set(&self, line: Line, on: bool) -> Result<(), ClawError>;

    /// Current debounced win-sensor reading.
    fn read_win_sensor(&self) -> Result<bool, ClawError>;

    /// Lower every output line. Used on `emergency_stop` and at startup.
    fn all_off(&self) -> Result<(), ClawError> {
        for line in Line::all() {
            self.set(line, false)?;
        }
        Ok(())
    }
}

/// In-memory simulated backend. Lines are tracked so tests can assert on
/// `active_directions`-equivalent state; the win sensor is driven
/// programmatically via [`SimBackend::trigger_win`].
#[derive(Debug, Default)]
pub struct SimBackend {
    lines: Mutex<std::collections::HashMap<Line, bool>>,
    win: Arc<AtomicBool>,
}

impl SimBackend {
    pub fn new() -> Self {
        Self { lines: Mutex::new(std::collections::HashMap::new()), win: Arc::new(AtomicBool::new(false)) }
    }

    /// Simulate the win sensor asserting (as a real strike would).
    pub fn trigger_win(&self) {
        self.win.store(true, Ordering::SeqCst);
    }

    pub fn reset_win(&self) {
        self.win.store(false, Ordering::SeqCst);
    }

    /// Snapshot of which lines are currently logically on.
    pub fn active_lines(&self) -> Vec<Line> {
        self.lines
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .iter()
            .filter(|(_, on)| **on)
            .map(|(line, _)| *line)
            .collect()
    }
}

impl HardwareBackend for SimBackend {
    fn set(&self, line: Line, on: bool) -> Result<(), ClawError> {
        let mut lines = self.lines.lock().unwrap_or_else(|poison| poison.into_inner());
        lines.insert(line, on);
        Ok(())
    }

    fn read_win_sensor(&self) -> Result<bool, ClawError> {
        Ok(self.win.load(Ordering::SeqCst))
    }
}

/// Real GPIO backend via `rppal`, gated behind the `hardware` feature.
/// Output pins sit behind a `Mutex` because `rppal::gpio::OutputPin` needs
/// `&mut self` to toggle while [`HardwareBackend::set`] only gets `&self` —
/// the Actuator Controller's single-worker executor is the real serializer,
/// this lock never contends in practice.
#[cfg(feature = "hardware")]
pub struct RppalBackend {
    pins: Mutex<std::collections::HashMap<Line, rppal::gpio::OutputPin>>,
    active_high: bool,
    win_debounced: Arc<AtomicBool>,
    _debounce_thread: std::thread::JoinHandle<()>,
}

#[cfg(feature = "hardware")]
impl RppalBackend {
    pub fn open(map: &PinMap) -> anyhow::Result<Self> {
        let gpio = rppal::gpio::Gpio::new()?;
        let active_high = map.active_high;

        let mut pins = std::collections::HashMap::new();
        for (line, pin_no) in [
            (Line::Coin, map.coin),
            (Line::Drop, map.drop),
            (Line::North, map.north),
            (Line::South, map.south),
            (Line::East, map.east),
            (Line::West, map.west),
        ] {
            let mut pin = gpio.get(pin_no)?.into_output();
            if active_high {
                pin.set_low();
            } else {
                pin.set_high();
            }
            pins.insert(line, pin);
        }

        let mut win_pin = gpio.get(map.win_sensor)?.into_input();
        if map.win_pull_up {
            win_pin.set_pullup_high();
        } else {
            win_pin.set_pulldown_low();
        }

        let win_debounced = Arc::new(AtomicBool::new(false));
        let debounce_target = Arc::clone(&win_debounced);
        let win_pull_up = map.win_pull_up;

        // Hardware-grade debounce: require 3 consecutive agreeing reads,
        // 2ms apart, before trusting a transition.
        let debounce_thread = std::thread::spawn(move || loop {
            let mut agree = 0u8;
            let mut last = None;
            for _ in 0..3 {
                let raw = win_pin.is_high();
                let asserted = if win_pull_up { !raw } else { raw };
                if last == Some(asserted) {
                    agree += 1;
                } else {
                    agree = 1;
                }
                last = Some(asserted);
                std::thread::sleep(std::time::Duration::from_millis(2));
            }
            if agree >= 3 {
                if let Some(value) = last {
                    debounce_target.store(value, Ordering::SeqCst);
                }
            }
        });

        Ok(Self {
            pins: Mutex::new(pins),
            active_high,
            win_debounced,
            _debounce_thread: debounce_thread,
        })
    }
}

#[cfg(feature = "hardware")]
impl HardwareBackend for RppalBackend {
    fn set(&self, line: Line, on: bool) -> Result<(), ClawError> {
        let mut pins = self.pins.lock().unwrap_or_else(|poison| poison.into_inner());
        let pin = pins.get_mut(&line).ok_or(ClawError::FatalHardware)?;
        let assert_high = on == self.active_high;
        if assert_high {
            pin.set_high();
        } else {
            pin.set_low();
        }
        Ok(())
    }

    fn read_win_sensor(&self) -> Result<bool, ClawError> {
        Ok(self.win_debounced.load(Ordering::SeqCst))
    }
}
