//! # Binding Runtime Table
//!
//! Per-pin runtime state of the loaded bindings. The table never touches
//! timers or channels itself: every operation returns the [`Effect`]s its
//! owner must carry out, which keeps all transitions testable without a
//! runtime.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use super::binding::{BindingSet, ButtonBinding, ButtonMode, LeverBinding};
use crate::simulator::SimulatorCommand;

/// Work requested by the table
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Send(SimulatorCommand),
    /// Start ticking [`BindingTable::on_repeat`] for `pin` every `interval`
    StartRepeat {
        pin: u8,
        generation: u64,
        interval: Duration,
    },
    /// Stop the repeat timer of `pin`
    CancelRepeat { pin: u8 },
}

#[derive(Debug, Default)]
struct ButtonState {
    pressed: bool,
    latched: bool,
    last_sent: Option<f64>,
    /// Generation of the live momentary press
    press: Option<u64>,
}

#[derive(Debug)]
struct ButtonSlot {
    binding: ButtonBinding,
    state: ButtonState,
}

#[derive(Debug)]
struct LeverSlot {
    binding: LeverBinding,
    last_sent: Option<f64>,
}

/// Runtime state of every binding, keyed by pin
#[derive(Debug)]
pub struct BindingTable {
    buttons: HashMap<u8, ButtonSlot>,
    levers: HashMap<u8, LeverSlot>,
    default_repeat_interval: Duration,
    next_generation: u64,
}

impl BindingTable {
    #[must_use]
    pub fn new(default_repeat_interval: Duration) -> Self {
        Self {
            buttons: HashMap::new(),
            levers: HashMap::new(),
            default_repeat_interval,
            next_generation: 1,
        }
    }

    #[must_use]
    pub fn button_count(&self) -> usize {
        self.buttons.len()
    }

    #[must_use]
    pub fn lever_count(&self) -> usize {
        self.levers.len()
    }

    /// Replaces all bindings. Live repeats are cancelled first and no
    /// runtime state survives.
    pub fn reload(&mut self, bindings: BindingSet) -> Vec<Effect> {
        let effects = self.cancel_presses();

        self.buttons = bindings
            .buttons
            .into_iter()
            .map(|binding| {
                let slot = ButtonSlot {
                    binding,
                    state: ButtonState::default(),
                };
                (slot.binding.pin, slot)
            })
            .collect();
        self.levers = bindings
            .levers
            .into_iter()
            .map(|binding| {
                let slot = LeverSlot {
                    binding,
                    last_sent: None,
                };
                (slot.binding.pin, slot)
            })
            .collect();

        effects
    }

    /// Cancels live repeats and clears runtime state, keeping the bindings.
    pub fn reset(&mut self) -> Vec<Effect> {
        let effects = self.cancel_presses();
        for slot in self.buttons.values_mut() {
            slot.state = ButtonState::default();
        }
        for slot in self.levers.values_mut() {
            slot.last_sent = None;
        }
        effects
    }

    /// Handles a raw value reported for `pin`.
    pub fn on_input(&mut self, pin: u8, raw: i16) -> Vec<Effect> {
        if let Some(slot) = self.levers.get_mut(&pin) {
            let value = slot.binding.output(raw);
            if slot.last_sent == Some(value) {
                return Vec::new();
            }
            slot.last_sent = Some(value);
            return vec![Effect::Send(SimulatorCommand::new(slot.binding.endpoint.clone(), value))];
        }

        let Some(slot) = self.buttons.get_mut(&pin) else {
            return Vec::new();
        };

        let pressed = raw != 0;
        if pressed == slot.state.pressed {
            return Vec::new();
        }
        slot.state.pressed = pressed;

        match slot.binding.mode {
            ButtonMode::Simple => {
                let value = slot.binding.value_for(pressed);
                send_changed(slot, value).into_iter().collect()
            }
            ButtonMode::Momentary if pressed => {
                let generation = self.next_generation;
                self.next_generation += 1;
                slot.state.press = Some(generation);

                let interval = slot
                    .binding
                    .repeat_interval_ms
                    .map_or(self.default_repeat_interval, Duration::from_millis);
                let on_value = slot.binding.on_value;
                vec![
                    send(slot, on_value),
                    Effect::StartRepeat {
                        pin,
                        generation,
                        interval,
                    },
                ]
            }
            ButtonMode::Momentary => {
                let mut effects = Vec::with_capacity(2);
                if slot.state.press.take().is_some() {
                    effects.push(Effect::CancelRepeat { pin });
                }
                let off_value = slot.binding.off_value;
                effects.push(send(slot, off_value));
                effects
            }
            ButtonMode::Latching if pressed => {
                slot.state.latched = !slot.state.latched;
                let value = slot.binding.value_for(slot.state.latched);
                vec![send(slot, value)]
            }
            ButtonMode::Latching => Vec::new(),
        }
    }

    /// Handles a repeat tick. Ticks from a press that has since ended, or
    /// from before a reload, are dropped.
    pub fn on_repeat(&mut self, pin: u8, generation: u64) -> Vec<Effect> {
        match self.buttons.get_mut(&pin) {
            Some(slot) if slot.state.press == Some(generation) => {
                let value = slot.binding.on_value;
                vec![send(slot, value)]
            }
            _ => {
                debug!("Dropping stale repeat tick for pin {} (generation {})", pin, generation);
                Vec::new()
            }
        }
    }

    fn cancel_presses(&mut self) -> Vec<Effect> {
        self.buttons
            .iter_mut()
            .filter_map(|(&pin, slot)| slot.state.press.take().map(|_| Effect::CancelRepeat { pin }))
            .collect()
    }
}

fn send(slot: &mut ButtonSlot, value: f64) -> Effect {
    slot.state.last_sent = Some(value);
    Effect::Send(SimulatorCommand::new(slot.binding.endpoint.clone(), value))
}

fn send_changed(slot: &mut ButtonSlot, value: f64) -> Option<Effect> {
    if slot.state.last_sent == Some(value) {
        return None;
    }
    Some(send(slot, value))
}
