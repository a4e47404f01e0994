//! Suspend/resume point for a human to clear a CAPTCHA.
//!
//! ```text
//! Disabled                      (captcha mode off, never changes)
//! Armed --detect/trip--> Waiting --resume--> Released --pass--> Armed
//! ```
//!
//! The worker calls [`CaptchaGate::pass`] between steps. While the gate is
//! `Waiting` that call parks on a watch channel, so observers reading the
//! session snapshot never contend with it.

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::models::PageContent;
use crate::state::StopSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Disabled,
    Armed,
    Waiting,
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Passage {
    Proceed,
    Cancelled,
}

pub struct CaptchaGate {
    state: watch::Sender<GateState>,
    markers: Vec<String>,
}

impl CaptchaGate {
    pub fn new(enabled: bool, markers: &[String]) -> Self {
        let initial = if enabled {
            GateState::Armed
        } else {
            GateState::Disabled
        };
        let (state, _rx) = watch::channel(initial);
        Self {
            state,
            markers: markers
                .iter()
                .map(|m| m.trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, &[])
    }

    pub fn state(&self) -> GateState {
        *self.state.borrow()
    }

    pub fn is_waiting(&self) -> bool {
        self.state() == GateState::Waiting
    }

    /// True when the page looks like a CAPTCHA wall. Always false when the
    /// gate is disabled.
    pub fn detect(&self, content: &PageContent) -> bool {
        if self.state() == GateState::Disabled {
            return false;
        }
        let html = content.html.to_lowercase();
        self.markers.iter().any(|marker| html.contains(marker))
    }

    /// Armed -> Waiting. Returns whether the transition happened.
    pub fn trip(&self) -> bool {
        let tripped = self.transition(GateState::Armed, GateState::Waiting);
        if tripped {
            info!("CAPTCHA gate closed, waiting for resume");
        }
        tripped
    }

    /// Waiting -> Released. Returns whether the transition happened.
    pub fn resume(&self) -> bool {
        let resumed = self.transition(GateState::Waiting, GateState::Released);
        if resumed {
            info!("CAPTCHA gate released");
        }
        resumed
    }

    /// Returns immediately unless the gate is `Waiting`; then blocks until
    /// resumed or until `stop` fires.
    pub async fn pass(&self, stop: &StopSignal) -> Passage {
        if stop.is_stopped() {
            return Passage::Cancelled;
        }

        let mut rx = self.state.subscribe();
        loop {
            let current = *rx.borrow_and_update();
            if current != GateState::Waiting {
                break;
            }
            debug!("Parked at CAPTCHA gate");
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Passage::Cancelled;
                    }
                }
                _ = stop.stopped() => return Passage::Cancelled,
            }
        }

        self.transition(GateState::Released, GateState::Armed);
        Passage::Proceed
    }

    pub fn subscribe(&self) -> watch::Receiver<GateState> {
        self.state.subscribe()
    }

    fn transition(&self, from: GateState, to: GateState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }
}
