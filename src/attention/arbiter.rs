//! # Attention Arbiter
//!
//! The periodic decision loop that turns "who is speaking" into "where the
//! robot looks and what it shows".
//!
//! ## Each Cycle:
//! 1. **Deferred intents** whose due time has passed are flushed first
//!    (end of a backchannel hold, return from an operator nod)
//! 2. **Override**: a pending operator command is applied field by field and
//!    autonomous evaluation is skipped for this cycle
//! 3. **Rules**, in strict priority order:
//!    - the robot itself is speaking → "speaking" icon, gaze unchanged
//!    - several people speaking → keep the current focus if it is one of them,
//!      otherwise pick one at random
//!    - one person speaking → look at them; after a long dwell, emit a
//!      backchannel cue without moving
//!    - nobody speaking → "idle" icon, focus cleared, gaze left where it is
//!
//! ## Timing Without Blocking:
//! Holds and settle windows are never slept on. A backchannel toggle is
//! queued as a deferred intent, and the settle window after a gaze move only
//! suppresses further new-focus moves until it expires.
//!
//! ## Ownership:
//! `FocusState` lives inside the arbiter and is only touched by `step`, so it
//! needs no lock. Other tasks observe it through the published [`FocusView`].

use crate::attention::actuation::{dispatch, ActuationPort, Intent};
use crate::attention::geometry::{ChannelGeometry, Position};
use crate::attention::mailbox::{OverrideCommand, OverrideMailbox};
use crate::attention::registry::SpeakerRegistry;
use crate::attention::{ChannelId, SELF_CHANNEL};
use crate::config::{AppConfig, IconSettings};
use crate::shutdown::ShutdownSignal;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Timings and asset names the arbiter runs with.
#[derive(Debug, Clone)]
pub struct ArbiterConfig {
    pub cadence: Duration,
    pub settle: Duration,
    pub backchannel_dwell: Duration,
    pub backchannel_hold: Duration,
    pub nod_offset: i32,
    pub icons: IconSettings,
    pub initial_image: String,
    pub initial_tilt: i32,
    pub startup_delay: Duration,
}

impl ArbiterConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        let arbiter = &config.arbiter;
        Self {
            cadence: Duration::from_millis(arbiter.cadence_ms),
            settle: Duration::from_millis(arbiter.settle_ms),
            backchannel_dwell: Duration::from_millis(arbiter.backchannel_dwell_ms),
            backchannel_hold: Duration::from_millis(arbiter.backchannel_hold_ms),
            nod_offset: arbiter.nod_offset,
            icons: arbiter.icons.clone(),
            initial_image: config.robot.initial_image.clone(),
            initial_tilt: config.robot.initial_tilt,
            startup_delay: Duration::from_millis(config.robot.startup_delay_ms),
        }
    }
}

/// Rule evaluation fault. The cycle that hits one becomes a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArbiterError {
    /// A speaking channel has no gaze target to look at
    MissingGeometry(ChannelId),
    /// A speaking channel is not in the geometry table at all
    UnknownChannel(ChannelId),
}

impl fmt::Display for ArbiterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArbiterError::MissingGeometry(id) => write!(f, "Channel {} has no gaze target", id),
            ArbiterError::UnknownChannel(id) => write!(f, "Channel {} is not configured", id),
        }
    }
}

impl std::error::Error for ArbiterError {}

/// Who the robot attends to, since when, and where it is looking.
#[derive(Debug, Clone, PartialEq)]
pub struct FocusState {
    pub current_focus: Option<ChannelId>,
    pub dwell_start: Option<Instant>,
    pub current_position: Position,
}

/// Read-only copy of the arbiter's state for status endpoints.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FocusView {
    pub focus: Option<ChannelId>,
    pub pan: i32,
    pub tilt: i32,
    pub icon: Option<String>,
    pub behaviour: bool,
    pub cycles: u64,
    pub overrides_applied: u64,
}

#[derive(Debug)]
struct Deferred {
    due: Instant,
    intent: Intent,
}

/// The autonomous turn-taking state machine.
pub struct AttentionArbiter {
    config: ArbiterConfig,
    geometry: ChannelGeometry,
    registry: Arc<SpeakerRegistry>,
    mailbox: Arc<OverrideMailbox>,
    state: FocusState,
    last_icon: Option<String>,
    behaviour_on: bool,
    settle_until: Option<Instant>,
    deferred: Vec<Deferred>,
    rng: StdRng,
    cycles: u64,
    overrides_applied: u64,
    view_tx: watch::Sender<FocusView>,
    #[cfg(test)]
    fault_next_cycle: bool,
}

impl AttentionArbiter {
    pub fn new(
        config: ArbiterConfig,
        geometry: ChannelGeometry,
        registry: Arc<SpeakerRegistry>,
        mailbox: Arc<OverrideMailbox>,
    ) -> Self {
        let state = FocusState {
            current_focus: None,
            dwell_start: None,
            current_position: Position::new(0, config.initial_tilt),
        };
        let (view_tx, _) = watch::channel(FocusView {
            tilt: config.initial_tilt,
            ..FocusView::default()
        });

        Self {
            config,
            geometry,
            registry,
            mailbox,
            state,
            last_icon: None,
            behaviour_on: false,
            settle_until: None,
            deferred: Vec::new(),
            rng: StdRng::from_entropy(),
            cycles: 0,
            overrides_applied: 0,
            view_tx,
            #[cfg(test)]
            fault_next_cycle: false,
        }
    }

    /// Replace the tie-break RNG with a seeded one (reproducible runs).
    #[cfg(test)]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Receiver that always holds the latest [`FocusView`].
    pub fn subscribe(&self) -> watch::Receiver<FocusView> {
        self.view_tx.subscribe()
    }

    #[cfg(test)]
    pub fn state(&self) -> &FocusState {
        &self.state
    }

    /// Pose and face shown before autonomous control starts.
    pub fn startup_intents(&mut self) -> Vec<Intent> {
        self.state.current_position.tilt = self.config.initial_tilt;
        vec![
            Intent::MoveTilt(self.config.initial_tilt),
            Intent::SetImage(self.config.initial_image.clone()),
        ]
    }

    /// Run one arbitration cycle and return the intents to issue, in order.
    ///
    /// Rule faults are logged and turn the cycle into a no-op; due deferred
    /// intents are still returned.
    pub fn step(
        &mut self,
        now: Instant,
        snapshot: &[(ChannelId, bool)],
        command: Option<OverrideCommand>,
    ) -> Vec<Intent> {
        self.cycles += 1;
        #[cfg(test)]
        if std::mem::take(&mut self.fault_next_cycle) {
            panic!("arbitration fault injected by test");
        }
        let mut intents = self.take_due(now);

        if let Some(command) = command {
            self.apply_override(now, command, &mut intents);
            return intents;
        }

        let active: Vec<ChannelId> = snapshot
            .iter()
            .filter(|(_, speaking)| *speaking)
            .map(|(id, _)| *id)
            .collect();

        match self.evaluate(now, &active) {
            Ok(mut decided) => intents.append(&mut decided),
            Err(e) => warn!(cycle = self.cycles, error = %e, "Arbitration cycle skipped"),
        }
        intents
    }

    fn evaluate(&mut self, now: Instant, active: &[ChannelId]) -> Result<Vec<Intent>, ArbiterError> {
        let mut intents = Vec::new();

        if active.contains(&SELF_CHANNEL) {
            if self.state.current_focus != Some(SELF_CHANNEL) {
                info!("Robot is speaking");
            }
            let icon = self.config.icons.speaking.clone();
            self.show_icon(&icon, &mut intents);
            self.state.current_focus = Some(SELF_CHANNEL);
            self.state.dwell_start = None;
            return Ok(intents);
        }

        match active {
            [] => {
                if self.state.current_focus.is_some() {
                    info!("Conversation went quiet");
                }
                let icon = self.config.icons.idle.clone();
                self.show_icon(&icon, &mut intents);
                self.state.current_focus = None;
                self.state.dwell_start = None;
            }
            [speaker] => self.attend(now, *speaker, &mut intents)?,
            several => {
                let previous = self.state.current_focus.filter(|f| several.contains(f));
                match previous {
                    Some(focus) => {
                        debug!(focus, "Several speakers, keeping current focus");
                        let icon = self.config.icons.listening.clone();
                        self.show_icon(&icon, &mut intents);
                    }
                    None => {
                        if let Some(&picked) = several.choose(&mut self.rng) {
                            debug!(picked, speakers = ?several, "Several speakers, picked one at random");
                            self.attend(now, picked, &mut intents)?;
                        }
                    }
                }
            }
        }
        Ok(intents)
    }

    /// Single-speaker handling: shift gaze to a new focus, or backchannel
    /// after a long dwell on the same one.
    fn attend(&mut self, now: Instant, speaker: ChannelId, intents: &mut Vec<Intent>) -> Result<(), ArbiterError> {
        let listening = self.config.icons.listening.clone();

        if self.state.current_focus == Some(speaker) {
            self.show_icon(&listening, intents);
            let dwell_start = *self.state.dwell_start.get_or_insert(now);
            if now.duration_since(dwell_start) >= self.config.backchannel_dwell && !self.behaviour_on {
                info!(focus = speaker, "Backchannel cue");
                intents.push(Intent::SetBehaviour(true));
                self.behaviour_on = true;
                self.defer(now + self.config.backchannel_hold, Intent::SetBehaviour(false));
                self.state.dwell_start = Some(now);
            }
            return Ok(());
        }

        // Half a cadence of slack: a jittery tick two cadences after the move is never held
        if let Some(until) = self.settle_until {
            if now + self.config.cadence / 2 < until {
                debug!(speaker, "Gaze still settling, new focus deferred");
                self.show_icon(&listening, intents);
                return Ok(());
            }
        }

        let target = self
            .geometry
            .target(speaker)
            .ok_or(ArbiterError::UnknownChannel(speaker))?
            .ok_or(ArbiterError::MissingGeometry(speaker))?;

        info!(focus = speaker, pan = target.pan, tilt = target.tilt, "Shifting attention");
        self.cancel_deferred_motion();
        intents.push(Intent::MovePan(target.pan));
        intents.push(Intent::MoveTilt(target.tilt));
        self.show_icon(&listening, intents);

        self.state.current_focus = Some(speaker);
        self.state.dwell_start = Some(now);
        self.state.current_position = target;
        self.settle_until = Some(now + self.config.settle);
        Ok(())
    }

    fn apply_override(&mut self, now: Instant, command: OverrideCommand, intents: &mut Vec<Intent>) {
        self.overrides_applied += 1;

        if command.is_empty() {
            let tilt = self.state.current_position.tilt;
            info!(tilt, "Operator nod");
            self.cancel_deferred_motion();
            intents.push(Intent::MoveTilt(tilt + self.config.nod_offset));
            self.defer(now + self.config.backchannel_hold, Intent::MoveTilt(tilt));
            return;
        }

        info!(?command, "Operator override");
        if command.pan.is_some() || command.tilt.is_some() {
            self.cancel_deferred_motion();
        }
        if let Some(pan) = command.pan {
            intents.push(Intent::MovePan(pan));
            self.state.current_position.pan = pan;
        }
        if let Some(tilt) = command.tilt {
            intents.push(Intent::MoveTilt(tilt));
            self.state.current_position.tilt = tilt;
        }
        if let Some(image) = command.image {
            intents.push(Intent::SetImage(image));
        }
        if let Some(icon) = command.icon {
            intents.push(Intent::SetIcon(icon.clone()));
            self.last_icon = Some(icon);
        }
    }

    fn show_icon(&mut self, icon: &str, intents: &mut Vec<Intent>) {
        if self.last_icon.as_deref() != Some(icon) {
            intents.push(Intent::SetIcon(icon.to_string()));
            self.last_icon = Some(icon.to_string());
        }
    }

    fn defer(&mut self, due: Instant, intent: Intent) {
        self.deferred.push(Deferred { due, intent });
    }

    /// A fresh gaze command supersedes any queued return-from-nod.
    fn cancel_deferred_motion(&mut self) {
        self.deferred
            .retain(|d| !matches!(d.intent, Intent::MovePan(_) | Intent::MoveTilt(_)));
    }

    fn take_due(&mut self, now: Instant) -> Vec<Intent> {
        let (mut due, pending): (Vec<Deferred>, Vec<Deferred>) =
            self.deferred.drain(..).partition(|d| d.due <= now);
        self.deferred = pending;
        due.sort_by_key(|d| d.due);
        due.into_iter().map(|d| self.note_issued(d.intent)).collect()
    }

    /// Everything still queued, regardless of due time (used on shutdown).
    fn drain_deferred(&mut self) -> Vec<Intent> {
        let mut all: Vec<Deferred> = self.deferred.drain(..).collect();
        all.sort_by_key(|d| d.due);
        all.into_iter().map(|d| self.note_issued(d.intent)).collect()
    }

    fn note_issued(&mut self, intent: Intent) -> Intent {
        match &intent {
            Intent::SetBehaviour(enabled) => self.behaviour_on = *enabled,
            Intent::MoveTilt(tilt) => self.state.current_position.tilt = *tilt,
            Intent::MovePan(pan) => self.state.current_position.pan = *pan,
            _ => {}
        }
        intent
    }

    fn publish(&self) {
        self.view_tx.send_replace(FocusView {
            focus: self.state.current_focus,
            pan: self.state.current_position.pan,
            tilt: self.state.current_position.tilt,
            icon: self.last_icon.clone(),
            behaviour: self.behaviour_on,
            cycles: self.cycles,
            overrides_applied: self.overrides_applied,
        });
    }

    fn run_cycle(&mut self, port: &mut dyn ActuationPort) {
        let now = Instant::now();
        let snapshot = self.registry.snapshot();
        let command = self.mailbox.take_if_present();

        match panic::catch_unwind(AssertUnwindSafe(|| self.step(now, &snapshot, command))) {
            Ok(intents) => {
                dispatch(port, &intents);
            }
            Err(_) => error!(cycle = self.cycles, "Arbitration cycle panicked, continuing"),
        }
        self.publish();
    }

    /// Drive the arbiter until the shutdown signal is raised.
    pub async fn run(mut self, mut port: Box<dyn ActuationPort>, shutdown: ShutdownSignal) {
        info!(cadence_ms = self.config.cadence.as_millis() as u64, "Attention arbiter starting");

        let intents = self.startup_intents();
        dispatch(port.as_mut(), &intents);
        self.publish();

        tokio::select! {
            _ = tokio::time::sleep(self.config.startup_delay) => {}
            _ = shutdown.wait() => {
                info!("Shutdown before autonomous control started");
                return;
            }
        }
        info!("Autonomous control running");

        let mut ticker = tokio::time::interval(self.config.cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.wait() => break,
            }
            if shutdown.is_triggered() {
                break;
            }
            self.run_cycle(port.as_mut());
        }

        let remaining = self.drain_deferred();
        dispatch(port.as_mut(), &remaining);
        self.publish();
        info!(cycles = self.cycles, "Attention arbiter stopped");
    }
}
