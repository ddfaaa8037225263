//! # Controller Task
//!
//! Owns the [`BindingTable`] and the repeat timers, and carries out the
//! effects the table asks for.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{BindingSet, BindingTable, ControllerCommand, ControllerHandle, ControllerNotification, Effect};
use crate::session::SessionEvent;
use crate::simulator::SimulatorCommand;

pub(crate) struct ControllerActor {
    table: BindingTable,
    commands: mpsc::Receiver<ControllerCommand>,
    /// Lets timers feed ticks back without keeping the controller alive
    ticks: mpsc::WeakSender<ControllerCommand>,
    output: mpsc::Sender<SimulatorCommand>,
    notifications: broadcast::Sender<ControllerNotification>,
    timers: HashMap<u8, JoinHandle<()>>,
}

impl ControllerActor {
    pub(crate) fn new(
        table: BindingTable,
        commands: mpsc::Receiver<ControllerCommand>,
        ticks: mpsc::WeakSender<ControllerCommand>,
        output: mpsc::Sender<SimulatorCommand>,
        notifications: broadcast::Sender<ControllerNotification>,
    ) -> Self {
        Self {
            table,
            commands,
            ticks,
            output,
            notifications,
            timers: HashMap::new(),
        }
    }

    pub(crate) async fn run(mut self, bindings: BindingSet) {
        self.reload(bindings).await;

        while let Some(command) = self.commands.recv().await {
            let effects = match command {
                ControllerCommand::Input { pin, value } => self.table.on_input(pin, value),
                ControllerCommand::RepeatTick { pin, generation } => self.table.on_repeat(pin, generation),
                ControllerCommand::Reload(bindings) => {
                    self.reload(bindings).await;
                    continue;
                }
                ControllerCommand::Reset => {
                    debug!("Resetting binding state");
                    self.table.reset()
                }
                ControllerCommand::Shutdown => break,
            };
            self.apply(effects).await;
        }

        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
        info!("Controller stopped");
    }

    async fn reload(&mut self, bindings: BindingSet) {
        let effects = self.table.reload(bindings);
        self.apply(effects).await;

        let (buttons, levers) = (self.table.button_count(), self.table.lever_count());
        info!("Loaded {} button and {} lever bindings", buttons, levers);
        let _ = self
            .notifications
            .send(ControllerNotification::BindingsReloaded { buttons, levers });
    }

    async fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send(command) => {
                    if self.output.send(command).await.is_err() {
                        warn!("Command dispatcher is gone, dropping output");
                    }
                }
                Effect::StartRepeat {
                    pin,
                    generation,
                    interval,
                } => {
                    let timer = spawn_repeat(self.ticks.clone(), pin, generation, interval);
                    if let Some(previous) = self.timers.insert(pin, timer) {
                        previous.abort();
                    }
                }
                Effect::CancelRepeat { pin } => {
                    if let Some(timer) = self.timers.remove(&pin) {
                        timer.abort();
                    }
                }
            }
        }
    }
}

fn spawn_repeat(
    ticks: mpsc::WeakSender<ControllerCommand>,
    pin: u8,
    generation: u64,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let Some(ticks) = ticks.upgrade() else {
                break;
            };
            if ticks.send(ControllerCommand::RepeatTick { pin, generation }).await.is_err() {
                break;
            }
        }
    })
}

/// Feed a session's input values into a controller
///
/// Connection loss, or falling behind the event stream, resets the
/// controller's runtime state; a closed session shuts it down. Returns when either side stops.
pub async fn follow_session(mut events: broadcast::Receiver<SessionEvent>, controller: ControllerHandle) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::InputValueUpdated { pin, value, .. }) => {
                if controller.input(pin, value).await.is_err() {
                    break;
                }
            }
            Ok(SessionEvent::ConnectionLost { port }) => {
                debug!("{} lost, resetting bindings", port);
                if controller.reset().await.is_err() {
                    break;
                }
            }
            Ok(SessionEvent::Closed { .. }) | Err(RecvError::Closed) => {
                let _ = controller.shutdown().await;
                break;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => {
                // A skipped release would leave its repeat running
                warn!("Controller fell behind, {} session events skipped; resetting bindings", missed);
                if controller.reset().await.is_err() {
                    break;
                }
            }
        }
    }
}
