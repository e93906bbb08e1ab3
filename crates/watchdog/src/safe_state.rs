// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The safe-state primitive: a direct hardware path that the watchdog uses
//! to force every output line low, independent of (and without contending
//! with) the main process's Actuator Controller. It must coexist with a
//! possibly-orphaned owner via last-write-wins, so unlike
//! `clawcore::actuator::backend::RppalBackend` this takes no lock and holds
//! no long-lived mutable state: every call opens the pins fresh, drives them
//! low, and lets them drop.

use crate::config::WatchdogPinMap;

/// Forces every configured output line to its logical "off" level.
pub trait SafeStatePrimitive: Send + Sync {
    fn force_safe(&self) -> anyhow::Result<()>;
}

/// Development/test path: logs the lines it would drive instead of touching
/// hardware. This is the default build; `hardware` gates the real GPIO path.
pub struct SimSafeState;

impl SafeStatePrimitive for SimSafeState {
    fn force_safe(&self) -> anyhow::Result<()> {
        tracing::warn!("SIMULATED safe-state trip: would force all output lines low");
        Ok(())
    }
}

/// Real GPIO safe-state primitive via `rppal`, gated behind the `hardware`
/// feature. Opens each configured pin in `Gpio::new()?.get(pin)?.into_output()`
/// (the same call the main process's `RppalBackend::open` makes) and drives
/// it to its logical-off level, then lets the `OutputPin` drop — no shared
/// handle is kept across trips, so this never contends with a live main
/// process for the pin, and a second trip during an extended outage simply
/// re-asserts the same level.
#[cfg(feature = "hardware")]
pub struct RppalSafeState {
    pins: Vec<u8>,
    active_high: bool,
}

#[cfg(feature = "hardware")]
impl RppalSafeState {
    pub fn new(map: &WatchdogPinMap) -> Self {
        Self {
            pins: vec![map.coin, map.drop, map.north, map.south, map.east, map.west],
            active_high: map.active_high,
        }
    }
}

#[cfg(feature = "hardware")]
impl SafeStatePrimitive for RppalSafeState {
    fn force_safe(&self) -> anyhow::Result<()> {
        let gpio = rppal::gpio::Gpio::new()?;
        for &pin_no in &self.pins {
            let mut pin = gpio.get(pin_no)?.into_output();
            // Logical "off": electrically low for active-high wiring, high
            // for active-low. Holding the pin only for the duration of this
            // call is what makes last-write-wins safe against a live owner.
            if self.active_high {
                pin.set_low();
            } else {
                pin.set_high();
            }
        }
        Ok(())
    }
}

/// Build the configured primitive. Mirrors `clawcore::build_backend`'s
/// feature-gating: without the `hardware` feature, `simulate` must be true.
pub fn build(map: &WatchdogPinMap, simulate: bool) -> anyhow::Result<Box<dyn SafeStatePrimitive>> {
    #[cfg(feature = "hardware")]
    if !simulate {
        return Ok(Box::new(RppalSafeState::new(map)));
    }
    #[cfg(not(feature = "hardware"))]
    anyhow::ensure!(
        simulate,
        "built without the `hardware` feature; pass --simulate or rebuild with --features hardware"
    );
    let _ = map;

    Ok(Box::new(SimSafeState))
}
