//! Turn engine: routes server messages and local intents through the
//! reconciler, the sequencer and the pre-action queue.
//!
//! The engine does no I/O and reads no clock. Callers pass `now` in and drain
//! [`EngineOutput`]s; the session actor is the only production caller.

use super::{
    pre_action::{Evaluation, LocalGate, PreActionError, PreActionKind, PreActionQueue, Staleness},
    reconciler::{CommitBasis, Reconciler},
    sequencer::{
        AbilityAnimation, Animation, CasinoAnimation, Choreography, Landing, Phase, RollAnimation,
        Sequencer, SequencerEffect, TeleportAnimation,
    },
    view::{ActionLocks, ChatLine, Connectivity, EffectiveView},
};
use crate::{
    config::PhaseTimings,
    game::entities::{ParticipantId, Snapshot},
    net::{
        connection::ConnectionEvent,
        messages::{ClientCommand, ServerMessage},
    },
    session::messages::{Notice, Prompt, SessionError, SessionUpdate},
};
use std::collections::{BTreeMap, BTreeSet};
use tokio::time::{Duration, Instant};

/// Forced resets of one participant's lane before the player is told.
const STUCK_NOTICE_AFTER: u32 = 2;

#[derive(Clone, Debug, PartialEq)]
pub enum EngineOutput {
    /// Command to put on the wire.
    Send(ClientCommand),
    Update(SessionUpdate),
}

#[derive(Debug)]
pub struct TurnEngine {
    local: ParticipantId,
    timings: PhaseTimings,
    reconciler: Reconciler,
    sequencer: Sequencer,
    pre_actions: PreActionQueue,
    /// When the last local roll was sent, until its result arrives.
    roll_in_flight: Option<Instant>,
    game_over: bool,
    /// The next full-state push replaces everything.
    awaiting_resync: bool,
    /// Trades addressed to the local player with an open prompt.
    open_trades: BTreeSet<String>,
    stalls: BTreeMap<ParticipantId, u32>,
    outputs: Vec<EngineOutput>,
}

impl TurnEngine {
    pub fn new(local: ParticipantId, timings: PhaseTimings, await_render_ack: bool) -> Self {
        Self {
            pre_actions: PreActionQueue::new(local.clone()),
            local,
            sequencer: Sequencer::new(timings, await_render_ack),
            timings,
            reconciler: Reconciler::new(),
            roll_in_flight: None,
            game_over: false,
            awaiting_resync: false,
            open_trades: BTreeSet::new(),
            stalls: BTreeMap::new(),
            outputs: Vec::new(),
        }
    }

    pub fn local(&self) -> &ParticipantId {
        &self.local
    }

    /// Apply one server message.
    pub fn apply(&mut self, message: ServerMessage, now: Instant) {
        log::trace!("Applying {}", message.kind());
        self.handle(message, now);
        self.settle(now);
    }

    /// Advance animations to `now`.
    pub fn tick(&mut self, now: Instant) {
        self.sequencer.tick(now);
        self.track_stalls();

        let walking: Vec<ParticipantId> = self
            .sequencer
            .phases()
            .into_iter()
            .filter(|(_, phase)| *phase == Phase::Transitioning)
            .map(|(id, _)| id)
            .collect();
        for participant in walking {
            if let Some((elapsed, total)) = self.sequencer.movement_elapsed(&participant, now) {
                self.reconciler.set_walk_progress(&participant, elapsed, total);
            }
        }

        let roll_expired = self
            .roll_in_flight
            .is_some_and(|sent| now.saturating_duration_since(sent) >= self.timings.safety_timeout);
        if roll_expired {
            log::warn!("No result for roll sent by {}, releasing lock", self.local);
            self.roll_in_flight = None;
        }

        self.settle(now);
    }

    pub fn on_connection_event(&mut self, event: ConnectionEvent, now: Instant) {
        match event {
            ConnectionEvent::Opened { reconnect } => {
                self.set_connectivity(Connectivity::Online);
                if reconnect {
                    self.awaiting_resync = true;
                    self.outputs.push(EngineOutput::Send(ClientCommand::Sync));
                    self.notify(Notice::Reconnected);
                }
            }
            ConnectionEvent::Message(message) => self.apply(message, now),
            ConnectionEvent::Closed { reason } => {
                let next = match self.reconciler.view().connectivity {
                    Connectivity::Reconnecting { attempts } => Connectivity::Reconnecting {
                        attempts: attempts + 1,
                    },
                    Connectivity::Online => {
                        self.notify(Notice::ConnectionLost { reason });
                        Connectivity::Reconnecting { attempts: 1 }
                    }
                    Connectivity::Connecting => Connectivity::Reconnecting { attempts: 1 },
                    Connectivity::Offline => Connectivity::Offline,
                };
                self.set_connectivity(next);
            }
            ConnectionEvent::TornDown => self.set_connectivity(Connectivity::Offline),
        }
    }

    /// Send a command now, subject to the local locks.
    pub fn submit(&mut self, command: ClientCommand, now: Instant) -> Result<(), SessionError> {
        if self.game_over && command.is_turn_affecting() {
            return Err(SessionError::GameOver);
        }
        let command = match command {
            ClientCommand::Chat { message } => {
                let trimmed = ClientCommand::chat(&message);
                if matches!(&trimmed, ClientCommand::Chat { message } if message.is_empty()) {
                    return Err(SessionError::EmptyMessage);
                }
                trimmed
            }
            ClientCommand::UseAbility {
                ability_type,
                target_id: None,
            } if ability_type.requires_target() => {
                return Err(SessionError::TargetRequired(ability_type));
            }
            ClientCommand::Roll => {
                if self.roll_in_flight.is_some() || self.sequencer.is_active(&self.local) {
                    return Err(SessionError::RollInProgress);
                }
                self.roll_in_flight = Some(now);
                ClientCommand::Roll
            }
            ClientCommand::Sync => {
                self.awaiting_resync = true;
                ClientCommand::Sync
            }
            other => other,
        };
        log::debug!("Submitting {command}");
        self.outputs.push(EngineOutput::Send(command));
        Ok(())
    }

    /// Arm `kind`; it may fire immediately.
    pub fn arm(&mut self, kind: PreActionKind, now: Instant) -> Result<(), SessionError> {
        if self.game_over {
            return Err(SessionError::GameOver);
        }
        let snapshot = self
            .reconciler
            .authoritative()
            .ok_or(PreActionError::NoState)?;
        self.pre_actions.arm(kind, snapshot)?;
        self.settle(now);
        Ok(())
    }

    pub fn disarm(&mut self) -> bool {
        self.pre_actions.disarm().is_some()
    }

    pub fn render_ack(&mut self, participant: &ParticipantId, now: Instant) {
        self.sequencer.render_ack(participant, now);
        self.settle(now);
    }

    /// Earliest instant at which [`TurnEngine::tick`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let walk_steps = self.sequencer.phases().into_iter().filter_map(|(id, phase)| {
            if phase != Phase::Transitioning {
                return None;
            }
            let (started, duration) = self.sequencer.movement_window(&id)?;
            let walk = self.reconciler.view().participant(&id)?.walk.as_ref()?;
            // The last cell is held until the phase itself ends.
            let len = walk.path.len();
            let next = walk.step + 1;
            if next >= len {
                return None;
            }
            let offset = (duration.as_nanos() * next as u128).div_ceil(len as u128);
            Some(started + Duration::from_nanos(u64::try_from(offset).unwrap_or(u64::MAX)))
        });
        let roll = self
            .roll_in_flight
            .map(|sent| sent + self.timings.safety_timeout);

        self.sequencer
            .next_deadline()
            .into_iter()
            .chain(roll)
            .chain(walk_steps)
            .min()
    }

    /// The current view with lock and phase state filled in.
    pub fn view(&self) -> EffectiveView {
        let mut view = self.reconciler.view().clone();
        view.phases = self.sequencer.phases();
        view.locks = ActionLocks {
            roll_in_flight: self.roll_in_flight.is_some(),
            animating: self.sequencer.is_active(&self.local),
        };
        view
    }

    pub fn authoritative(&self) -> Option<&Snapshot> {
        self.reconciler.authoritative()
    }

    pub fn armed(&self) -> Option<&PreActionKind> {
        self.pre_actions.pending().map(|pending| &pending.kind)
    }

    pub fn is_game_over(&self) -> bool {
        self.game_over
    }

    pub fn drain_outputs(&mut self) -> Vec<EngineOutput> {
        std::mem::take(&mut self.outputs)
    }

    fn handle(&mut self, message: ServerMessage, now: Instant) {
        if let Some((kind, resolution)) = message.ability() {
            let caster = resolution.player_id.clone().or_else(|| self.lease_holder());
            let target = resolution.target_id.clone();
            let snapshot = resolution.game_state.clone();
            match caster {
                Some(subject) => self.animate(
                    Animation::Ability(AbilityAnimation {
                        subject,
                        kind: Some(kind),
                        target,
                    }),
                    snapshot,
                    now,
                ),
                None => self.apply_plain(snapshot),
            }
            return;
        }

        match message {
            ServerMessage::Connected(push) | ServerMessage::SyncResponse(push) => {
                if let Some(snapshot) = push.game_state {
                    self.hydrate(*snapshot, now);
                }
            }
            ServerMessage::StateUpdate(push)
            | ServerMessage::GameStarted(push)
            | ServerMessage::PlayerJoined(push)
            | ServerMessage::PlayerLeft(push) => self.apply_plain(push.game_state),
            ServerMessage::DiceRolled(event) => {
                if event.player_id == self.local {
                    self.roll_in_flight = None;
                }
                let animation = Animation::Roll(RollAnimation::from_event(&event));
                self.animate(animation, event.game_state, now);
            }
            ServerMessage::Teleport(event) => {
                let animation = Animation::Teleport(TeleportAnimation {
                    subject: event.player_id,
                });
                self.animate(animation, event.game_state, now);
            }
            ServerMessage::AbilityUsed(resolution) => {
                match resolution.player_id.clone().or_else(|| self.lease_holder()) {
                    Some(subject) => self.animate(
                        Animation::Ability(AbilityAnimation {
                            subject,
                            kind: None,
                            target: resolution.target_id,
                        }),
                        resolution.game_state,
                        now,
                    ),
                    None => self.apply_plain(resolution.game_state),
                }
            }
            ServerMessage::CasinoResult(result) => {
                let animation = Animation::Casino(CasinoAnimation {
                    subject: result.player_id,
                    result: result.result,
                    won: result.won,
                    payout: result.payout,
                });
                self.animate(animation, result.game_state, now);
            }
            ServerMessage::PropertyBought(change)
            | ServerMessage::HouseBuilt(change)
            | ServerMessage::HouseSold(change)
            | ServerMessage::PropertyMortgaged(change)
            | ServerMessage::PropertyUnmortgaged(change) => self.apply_plain(change.game_state),
            ServerMessage::RentPaid(payment) | ServerMessage::TaxPaid(payment) => {
                self.apply_plain(payment.game_state)
            }
            ServerMessage::TurnEnded(change) => self.apply_plain(change.game_state),
            ServerMessage::TurnSkipped(change) => {
                self.apply_plain(change.game_state);
                if let Some(participant) = change.player_id {
                    if participant == self.local {
                        self.clear_armed("turn skipped");
                    }
                    self.notify(Notice::TurnSkipped {
                        participant,
                        reason: change.reason,
                    });
                }
            }
            ServerMessage::PlayerDisqualified(change) => {
                self.apply_plain(change.game_state);
                if let Some(participant) = change.player_id {
                    if participant == self.local {
                        self.clear_armed("disqualified");
                    }
                    self.notify(Notice::Disqualified { participant });
                }
            }
            ServerMessage::TradeOffered(notice) => {
                self.apply_plain(notice.game_state);
                if let Some(trade) = notice.trade.filter(|t| t.to_player_id == self.local) {
                    self.open_trades.insert(trade.id.clone());
                    self.prompt(Prompt::IncomingTrade(trade));
                }
            }
            ServerMessage::TradeUpdated(notice) => {
                let trade_id = notice.id().map(str::to_string);
                self.apply_plain(notice.game_state);
                if let Some(trade_id) = trade_id.filter(|id| self.open_trades.remove(id)) {
                    self.prompt(Prompt::TradeClosed {
                        trade_id,
                        status: notice.status,
                    });
                }
            }
            ServerMessage::ChatMessage(chat) => {
                self.reconciler.push_chat(ChatLine {
                    participant: chat.player_id,
                    name: chat.player_name,
                    message: chat.message,
                });
                self.apply_plain(chat.game_state);
            }
            ServerMessage::BotActions(batch) => {
                log::debug!("Applying {} bot action(s)", batch.actions.len());
                for action in batch.actions {
                    self.handle(action, now);
                }
                self.apply_plain(batch.game_state);
            }
            ServerMessage::PlayerDisconnected(presence) => {
                self.notify(Notice::PlayerDisconnected {
                    participant: presence.player_id,
                    name: presence.player_name,
                });
            }
            ServerMessage::GameOver(over) => {
                self.apply_plain(over.game_state);
                let winner = over
                    .winner_id
                    .or_else(|| self.authoritative().and_then(|s| s.winner_id.clone()));
                self.finish_game(winner);
            }
            ServerMessage::Error { message } => {
                log::warn!("Server rejected a command: {message}");
                // Lanes are reset only while a roll is unanswered.
                if self.roll_in_flight.take().is_some() {
                    let local = self.local.clone();
                    self.sequencer.force_reset(&local);
                }
                self.notify(Notice::ServerRejected { message });
            }
            ServerMessage::Pong => {}
            ServerMessage::Unknown => log::debug!("Ignoring unknown message"),
            ServerMessage::Oreshnik(_)
            | ServerMessage::Buyout(_)
            | ServerMessage::Aid(_)
            | ServerMessage::Isolation(_)
            | ServerMessage::Sanctions(_)
            | ServerMessage::BeltRoad(_) => {}
        }
    }

    fn hydrate(&mut self, snapshot: Snapshot, now: Instant) {
        if !self.awaiting_resync {
            self.reconciler.apply_snapshot(snapshot);
            return;
        }
        self.awaiting_resync = false;
        let stale = self.sequencer.cancel_stale(now);
        if !stale.is_empty() {
            log::warn!("Cancelled {} stale animation(s) on resync", stale.len());
        }
        // The resync snapshot supersedes whatever the remaining lanes were
        // animating towards.
        let superseded = self.sequencer.reset_all();
        if !superseded.is_empty() {
            log::debug!("Resync superseded {} running animation(s)", superseded.len());
        }
        self.reconciler.resync(snapshot);
    }

    fn animate(&mut self, animation: Animation, snapshot: Option<Box<Snapshot>>, now: Instant) {
        let subject = animation.subject().clone();
        let log_floor = self.reconciler.authoritative_log_len();
        let basis = match snapshot {
            Some(snapshot) => self.reconciler.apply_event(Some(*snapshot), Some(&subject)),
            None => {
                log::warn!("Animated event for {subject} carried no snapshot");
                self.reconciler.hold(&subject);
                self.reconciler.latest().cloned()
            }
        };
        match basis {
            Some(basis) => self.sequencer.enqueue(animation, basis, log_floor, now),
            None => self.reconciler.release(&subject),
        }
    }

    fn apply_plain(&mut self, snapshot: Option<Box<Snapshot>>) {
        if let Some(snapshot) = snapshot {
            self.reconciler.apply_event(Some(*snapshot), None);
        }
    }

    /// Carry out sequencer effects, refresh log gating and re-check the
    /// armed action.
    fn settle(&mut self, now: Instant) {
        loop {
            let effects = self.sequencer.drain_effects();
            if effects.is_empty() {
                break;
            }
            for effect in effects {
                self.on_effect(effect);
            }
        }
        self.reconciler.set_log_limit(self.sequencer.log_floor());

        if !self.game_over && self.authoritative().is_some_and(Snapshot::is_finished) {
            let winner = self.authoritative().and_then(|s| s.winner_id.clone());
            self.finish_game(winner);
        }
        self.evaluate_armed(now);
    }

    fn on_effect(&mut self, effect: SequencerEffect) {
        match effect {
            SequencerEffect::PhaseEntered { .. } | SequencerEffect::ReleaseLog { .. } => {}
            SequencerEffect::Commit {
                participant,
                basis,
                movement,
            } => self.reconciler.commit(&participant, &basis, movement),
            SequencerEffect::Reveal {
                participant,
                basis,
                landing,
            } => {
                self.reconciler.finish_walk(&participant);
                if participant == self.local {
                    self.reveal_prompts(&basis, landing);
                }
            }
            SequencerEffect::Finished {
                participant,
                lane_idle,
            } => {
                self.reconciler.finish_walk(&participant);
                self.stalls.remove(&participant);
                if lane_idle {
                    self.reconciler.release(&participant);
                }
            }
            SequencerEffect::ForcedReset { participant } => {
                self.reconciler.release(&participant);
                if participant == self.local {
                    self.roll_in_flight = None;
                    self.outputs
                        .push(EngineOutput::Update(SessionUpdate::PromptsCleared));
                }
            }
        }
    }

    fn reveal_prompts(&mut self, basis: &CommitBasis, landing: Landing) {
        let snapshot = match basis {
            CommitBasis::Pinned(stamped) => Some(stamped.snapshot.clone()),
            CommitBasis::Latest => self.reconciler.latest().map(|s| s.snapshot.clone()),
        };
        let Some(snapshot) = snapshot else {
            return;
        };
        let turn = &snapshot.turn_state;

        let mut prompts = Vec::new();
        match landing {
            Landing::Card(text) => prompts.push(Prompt::CardDraw { text }),
            Landing::Payment { kind, amount } => {
                let amount = amount.or_else(|| {
                    turn.pending_payment
                        .as_ref()
                        .filter(|due| due.kind == kind)
                        .map(|due| due.amount)
                });
                if let Some(amount) = amount {
                    prompts.push(Prompt::PaymentDue { kind, amount });
                }
            }
            Landing::PropertyOffer | Landing::Quiet => {}
        }
        if let Some(offer) = &turn.pending_purchase {
            let name = snapshot
                .cell(offer.cell)
                .map(|cell| cell.name.clone())
                .unwrap_or_default();
            prompts.push(Prompt::PropertyOffer {
                cell: offer.cell,
                name,
                price: offer.price,
            });
        }
        if let Some(due) = &turn.pending_payment {
            let already = prompts
                .iter()
                .any(|p| matches!(p, Prompt::PaymentDue { .. }));
            if !already {
                prompts.push(Prompt::PaymentDue {
                    kind: due.kind,
                    amount: due.amount,
                });
            }
        }
        if turn.awaiting_wager {
            prompts.push(Prompt::Wager);
        }
        for prompt in prompts {
            self.prompt(prompt);
        }
    }

    fn evaluate_armed(&mut self, now: Instant) {
        let Some(snapshot) = self.reconciler.authoritative() else {
            return;
        };
        let gate = LocalGate {
            lane_idle: !self.sequencer.is_active(&self.local),
            roll_in_flight: self.roll_in_flight.is_some(),
        };
        match self.pre_actions.evaluate(snapshot, gate) {
            Evaluation::Wait => {}
            Evaluation::Fire { kind, command } => {
                if command == ClientCommand::Roll {
                    self.roll_in_flight = Some(now);
                }
                self.outputs.push(EngineOutput::Send(command));
                self.notify(Notice::PreActionFired { kind });
            }
            Evaluation::Discard { kind, reason } => {
                self.notify(Notice::PreActionDiscarded { kind, reason });
            }
        }
    }

    fn clear_armed(&mut self, reason: &str) {
        if let Some(pending) = self.pre_actions.disarm() {
            self.notify(Notice::PreActionDiscarded {
                kind: pending.kind,
                reason: Staleness::Cleared(reason.to_string()),
            });
        }
    }

    fn finish_game(&mut self, winner: Option<ParticipantId>) {
        if self.game_over {
            return;
        }
        log::info!(
            "Game over, winner: {}",
            winner.as_ref().map_or("none", ParticipantId::as_str)
        );
        self.game_over = true;
        self.roll_in_flight = None;
        if winner.is_some() {
            let view = self.reconciler.view_mut();
            view.winner.clone_from(&winner);
            view.revision += 1;
        }
        if let Some(pending) = self.pre_actions.disarm() {
            self.notify(Notice::PreActionDiscarded {
                kind: pending.kind,
                reason: Staleness::GameOver,
            });
        }
        self.prompt(Prompt::Victory { winner });
    }

    fn track_stalls(&mut self) {
        // Peek at forced resets before settle() consumes them.
        let effects = self.sequencer.drain_effects();
        for effect in &effects {
            if let SequencerEffect::ForcedReset { participant } = effect {
                let count = self.stalls.entry(participant.clone()).or_default();
                *count += 1;
                if *count >= STUCK_NOTICE_AFTER {
                    let participant = participant.clone();
                    self.notify(Notice::AnimationStuck { participant });
                }
            }
        }
        for effect in effects {
            self.on_effect(effect);
        }
    }

    fn lease_holder(&self) -> Option<ParticipantId> {
        self.authoritative()
            .and_then(Snapshot::current_participant)
            .cloned()
    }

    fn set_connectivity(&mut self, connectivity: Connectivity) {
        let view = self.reconciler.view_mut();
        if view.connectivity != connectivity {
            log::debug!("Connectivity {:?} -> {connectivity:?}", view.connectivity);
            view.connectivity = connectivity;
            view.revision += 1;
        }
    }

    fn notify(&mut self, notice: Notice) {
        self.outputs
            .push(EngineOutput::Update(SessionUpdate::Notice(notice)));
    }

    fn prompt(&mut self, prompt: Prompt) {
        self.outputs
            .push(EngineOutput::Update(SessionUpdate::Prompt(prompt)));
    }
}
