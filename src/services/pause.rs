use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriticalSignal {
    OperationStarted,
    OperationSettled,
}

#[derive(Clone)]
pub struct CriticalSignalBus {
    sender: broadcast::Sender<CriticalSignal>,
}

impl CriticalSignalBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        CriticalSignalBus { sender }
    }

    pub fn publish(&self, signal: CriticalSignal) {
        // No receivers is fine, the signal just goes nowhere.
        let _ = self.sender.send(signal);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CriticalSignal> {
        self.sender.subscribe()
    }
}

impl Default for CriticalSignalBus {
    fn default() -> Self {
        CriticalSignalBus::new()
    }
}

pub struct PauseGate {
    paused_until: Mutex<Option<Instant>>,
    cooldown: Duration,
}

impl PauseGate {
    pub fn new(cooldown: Duration) -> Self {
        PauseGate {
            paused_until: Mutex::new(None),
            cooldown,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn pause(&self, window: Duration) {
        let deadline = Instant::now() + window;
        let mut guard = self.paused_until.lock().unwrap();
        // Overlapping pauses keep the later deadline.
        *guard = Some(match *guard {
            Some(existing) if existing > deadline => existing,
            _ => deadline,
        });
    }

    pub fn resume_now(&self) {
        *self.paused_until.lock().unwrap() = None;
    }

    pub fn can_persist_now(&self) -> bool {
        let mut guard = self.paused_until.lock().unwrap();
        match *guard {
            Some(deadline) if Instant::now() < deadline => false,
            Some(_) => {
                *guard = None;
                true
            }
            None => true,
        }
    }

    pub fn is_blocked(&self) -> bool {
        !self.can_persist_now()
    }

    pub fn blocked_remaining(&self) -> Option<Duration> {
        let guard = self.paused_until.lock().unwrap();
        guard
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .filter(|remaining| !remaining.is_zero())
    }

    pub fn spawn_cooldown_listener(
        self: &Arc<Self>,
        mut receiver: broadcast::Receiver<CriticalSignal>,
    ) -> JoinHandle<()> {
        let gate = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(signal) => {
                        log::debug!(
                            "Critical signal {:?}, pausing persistence for {:?}",
                            signal,
                            gate.cooldown
                        );
                        gate.pause(gate.cooldown);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("Critical signal listener lagged by {} signals", skipped);
                        gate.pause(gate.cooldown);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
