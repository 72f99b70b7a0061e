//! Animation sequencing.
//!
//! Every animated event runs through a fixed, ordered list of phases, each
//! with an explicit duration. The sequencer is purely time-driven: callers
//! pass `now` into [`Sequencer::tick`] and drain the resulting
//! [`SequencerEffect`]s, so the whole timeline can be exercised in tests by
//! handing it synthetic instants.
//!
//! Sequences are laned per participant. A lane runs one sequence at a time
//! and queues the rest in arrival order; lanes of different participants run
//! independently.

use super::reconciler::{CommitBasis, Stamped};
use crate::{
    config::PhaseTimings,
    game::entities::{Money, ParticipantId, PaymentKind},
    net::messages::{AbilityKind, AbilityTarget, DiceRolled, RollAction},
};
use enum_dispatch::enum_dispatch;
use std::collections::{BTreeMap, VecDeque};
use tokio::time::{Duration, Instant};

/// Visual phase of a sequence. Ordered: later phases compare greater.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Phase {
    #[default]
    Idle,
    Dealing,
    Rolling,
    Settling,
    Transitioning,
    Revealing,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Step {
    pub phase: Phase,
    pub duration: Duration,
}

impl Step {
    fn new(phase: Phase, duration: Duration) -> Self {
        Self { phase, duration }
    }
}

/// How the token gets from its shown cell to the committed one.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Movement {
    /// Walk this many cells, then jump if the committed cell differs.
    Walk(usize),
    Jump,
    Stay,
}

/// What a sequence discloses when it reaches [`Phase::Revealing`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Landing {
    Quiet,
    PropertyOffer,
    Payment {
        kind: PaymentKind,
        amount: Option<Money>,
    },
    Card(String),
}

/// A fixed choreography for one kind of animated event.
#[enum_dispatch]
pub trait Choreography {
    /// Participant whose lane runs the sequence.
    fn subject(&self) -> &ParticipantId;
    fn steps(&self, timings: &PhaseTimings) -> Vec<Step>;
    fn movement(&self) -> Movement;
    fn landing(&self) -> Landing {
        Landing::Quiet
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RollOutcome {
    Moved,
    ToJail,
    StillJailed,
    Skipped,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RollAnimation {
    pub subject: ParticipantId,
    pub dice: [u8; 2],
    pub outcome: RollOutcome,
    pub landing: Landing,
}

impl RollAnimation {
    pub fn from_event(event: &DiceRolled) -> Self {
        let outcome = match event.action {
            Some(RollAction::GoToJail) => RollOutcome::ToJail,
            Some(RollAction::StillJailed) => RollOutcome::StillJailed,
            Some(RollAction::SkippedTurn) => RollOutcome::Skipped,
            _ if event.total() == 0 => RollOutcome::Skipped,
            _ => RollOutcome::Moved,
        };
        let landing = match event.action {
            Some(RollAction::CanBuy) => Landing::PropertyOffer,
            Some(RollAction::PayRent) => Landing::Payment {
                kind: PaymentKind::Rent,
                amount: event.amount,
            },
            Some(RollAction::PayTax) => Landing::Payment {
                kind: PaymentKind::Tax,
                amount: event.amount,
            },
            Some(RollAction::Chance) => event
                .chance_card
                .clone()
                .map_or(Landing::Quiet, Landing::Card),
            _ => Landing::Quiet,
        };
        Self {
            subject: event.player_id.clone(),
            dice: event.dice,
            outcome,
            landing,
        }
    }

    fn moves(&self) -> bool {
        matches!(self.outcome, RollOutcome::Moved | RollOutcome::ToJail)
    }
}

impl Choreography for RollAnimation {
    fn subject(&self) -> &ParticipantId {
        &self.subject
    }

    fn steps(&self, timings: &PhaseTimings) -> Vec<Step> {
        let movement = if self.moves() {
            timings.movement
        } else {
            Duration::ZERO
        };
        vec![
            Step::new(Phase::Rolling, timings.roll_tumble),
            Step::new(Phase::Settling, timings.settle_pause),
            Step::new(Phase::Transitioning, movement),
            Step::new(Phase::Revealing, timings.reveal_hold),
        ]
    }

    fn movement(&self) -> Movement {
        match self.outcome {
            RollOutcome::Moved => {
                Movement::Walk(usize::from(self.dice[0]) + usize::from(self.dice[1]))
            }
            RollOutcome::ToJail => Movement::Jump,
            RollOutcome::StillJailed | RollOutcome::Skipped => Movement::Stay,
        }
    }

    fn landing(&self) -> Landing {
        self.landing.clone()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TeleportAnimation {
    pub subject: ParticipantId,
}

impl Choreography for TeleportAnimation {
    fn subject(&self) -> &ParticipantId {
        &self.subject
    }

    fn steps(&self, timings: &PhaseTimings) -> Vec<Step> {
        vec![
            Step::new(Phase::Transitioning, timings.movement),
            Step::new(Phase::Revealing, timings.reveal_hold),
        ]
    }

    fn movement(&self) -> Movement {
        Movement::Jump
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AbilityAnimation {
    pub subject: ParticipantId,
    /// Absent for the generic ability tag.
    pub kind: Option<AbilityKind>,
    pub target: Option<AbilityTarget>,
}

impl Choreography for AbilityAnimation {
    fn subject(&self) -> &ParticipantId {
        &self.subject
    }

    fn steps(&self, timings: &PhaseTimings) -> Vec<Step> {
        vec![
            Step::new(Phase::Dealing, timings.ability_reveal),
            Step::new(Phase::Transitioning, Duration::ZERO),
            Step::new(Phase::Revealing, timings.reveal_hold),
        ]
    }

    fn movement(&self) -> Movement {
        Movement::Stay
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CasinoAnimation {
    pub subject: ParticipantId,
    pub result: u8,
    pub won: bool,
    pub payout: Money,
}

impl Choreography for CasinoAnimation {
    fn subject(&self) -> &ParticipantId {
        &self.subject
    }

    fn steps(&self, timings: &PhaseTimings) -> Vec<Step> {
        vec![
            Step::new(Phase::Dealing, timings.casino_spin),
            Step::new(Phase::Settling, timings.settle_pause),
            Step::new(Phase::Transitioning, Duration::ZERO),
            Step::new(Phase::Revealing, timings.reveal_hold),
        ]
    }

    fn movement(&self) -> Movement {
        Movement::Stay
    }
}

/// Closed set of animated events.
#[enum_dispatch(Choreography)]
#[derive(Clone, Debug, PartialEq)]
pub enum Animation {
    Roll(RollAnimation),
    Teleport(TeleportAnimation),
    Ability(AbilityAnimation),
    Casino(CasinoAnimation),
}

/// Side effects the sequencer asks its owner to carry out, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum SequencerEffect {
    PhaseEntered {
        participant: ParticipantId,
        phase: Phase,
    },
    /// Log lines tied to the sequence may now be shown.
    ReleaseLog { participant: ParticipantId },
    /// The only point at which the participant's projection may advance.
    Commit {
        participant: ParticipantId,
        basis: CommitBasis,
        movement: Movement,
    },
    /// Movement is over; dependent prompts may open now.
    Reveal {
        participant: ParticipantId,
        basis: CommitBasis,
        landing: Landing,
    },
    /// A sequence completed. `lane_idle` is false when another one started
    /// right after it.
    Finished {
        participant: ParticipantId,
        lane_idle: bool,
    },
    /// The lane was cleared without completing.
    ForcedReset { participant: ParticipantId },
}

#[derive(Debug)]
struct Queued {
    animation: Animation,
    basis: Stamped,
    log_floor: usize,
}

#[derive(Debug)]
struct Running {
    job: Queued,
    steps: Vec<Step>,
    index: usize,
    started: Instant,
    phase_started: Instant,
    acked: bool,
    log_released: bool,
}

impl Running {
    fn step(&self) -> Step {
        self.steps[self.index]
    }

    fn gated(&self, await_render_ack: bool) -> bool {
        let step = self.step();
        await_render_ack && step.phase == Phase::Transitioning && !step.duration.is_zero() && !self.acked
    }
}

#[derive(Debug, Default)]
struct Lane {
    running: Option<Running>,
    pending: VecDeque<Queued>,
}

#[derive(Debug)]
pub struct Sequencer {
    timings: PhaseTimings,
    await_render_ack: bool,
    lanes: BTreeMap<ParticipantId, Lane>,
    effects: Vec<SequencerEffect>,
}

impl Sequencer {
    pub fn new(timings: PhaseTimings, await_render_ack: bool) -> Self {
        Self {
            timings,
            await_render_ack,
            lanes: BTreeMap::new(),
            effects: Vec::new(),
        }
    }

    /// Queue an animated event on its subject's lane. Starts immediately if
    /// the lane is idle.
    ///
    /// `basis` is the snapshot embedded in the event; `log_floor` is the
    /// number of log lines that were already visible before it arrived.
    pub fn enqueue(&mut self, animation: Animation, basis: Stamped, log_floor: usize, now: Instant) {
        let subject = animation.subject().clone();
        let job = Queued {
            animation,
            basis,
            log_floor,
        };
        let lane = self.lanes.entry(subject.clone()).or_default();
        if lane.running.is_some() {
            log::debug!(
                "Queueing animation for {subject} behind {} pending",
                lane.pending.len() + 1
            );
            lane.pending.push_back(job);
            return;
        }
        start(
            &subject,
            lane,
            job,
            now,
            &self.timings,
            &mut self.effects,
        );
        self.advance(&subject, now);
    }

    /// Advance every lane to `now`.
    pub fn tick(&mut self, now: Instant) {
        let subjects: Vec<ParticipantId> = self.lanes.keys().cloned().collect();
        for subject in subjects {
            self.advance(&subject, now);
        }
    }

    /// The render layer finished drawing the participant's movement.
    pub fn render_ack(&mut self, participant: &ParticipantId, now: Instant) {
        let Some(run) = self
            .lanes
            .get_mut(participant)
            .and_then(|lane| lane.running.as_mut())
        else {
            return;
        };
        if run.step().phase == Phase::Transitioning {
            run.acked = true;
            self.advance(participant, now);
        }
    }

    /// Drop the participant's running and queued sequences.
    pub fn force_reset(&mut self, participant: &ParticipantId) -> bool {
        match self.lanes.remove(participant) {
            Some(lane) if lane.running.is_some() || !lane.pending.is_empty() => {
                log::warn!("Animation lane for {participant} force-reset");
                self.effects.push(SequencerEffect::ForcedReset {
                    participant: participant.clone(),
                });
                true
            }
            _ => false,
        }
    }

    /// Force-reset every lane whose running sequence outlived the safety
    /// timeout. Returns the participants that were reset.
    pub fn cancel_stale(&mut self, now: Instant) -> Vec<ParticipantId> {
        let safety = self.timings.safety_timeout;
        let stale: Vec<ParticipantId> = self
            .lanes
            .iter()
            .filter(|(_, lane)| {
                lane.running
                    .as_ref()
                    .is_some_and(|run| now.saturating_duration_since(run.started) >= safety)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for participant in &stale {
            self.force_reset(participant);
        }
        stale
    }

    /// Force-reset every busy lane. Returns the participants that were reset.
    pub fn reset_all(&mut self) -> Vec<ParticipantId> {
        let subjects: Vec<ParticipantId> = self.lanes.keys().cloned().collect();
        subjects
            .into_iter()
            .filter(|participant| self.force_reset(participant))
            .collect()
    }

    pub fn drain_effects(&mut self) -> Vec<SequencerEffect> {
        std::mem::take(&mut self.effects)
    }

    pub fn phase_of(&self, participant: &ParticipantId) -> Phase {
        self.lanes
            .get(participant)
            .and_then(|lane| lane.running.as_ref())
            .map_or(Phase::Idle, |run| run.step().phase)
    }

    /// Phase of every busy lane.
    pub fn phases(&self) -> BTreeMap<ParticipantId, Phase> {
        self.lanes
            .iter()
            .filter_map(|(id, lane)| lane.running.as_ref().map(|run| (id.clone(), run.step().phase)))
            .collect()
    }

    pub fn is_active(&self, participant: &ParticipantId) -> bool {
        self.lanes
            .get(participant)
            .is_some_and(|lane| lane.running.is_some())
    }

    pub fn any_active(&self) -> bool {
        self.lanes.values().any(|lane| lane.running.is_some())
    }

    pub fn pending_len(&self, participant: &ParticipantId) -> usize {
        self.lanes
            .get(participant)
            .map_or(0, |lane| lane.pending.len())
    }

    /// Earliest instant at which a tick can change anything.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.lanes
            .values()
            .filter_map(|lane| lane.running.as_ref())
            .map(|run| {
                let safety = run.started + self.timings.safety_timeout;
                if run.gated(self.await_render_ack) {
                    safety
                } else {
                    safety.min(run.phase_started + run.step().duration)
                }
            })
            .min()
    }

    /// Start and length of the participant's movement phase, while in it.
    pub fn movement_window(&self, participant: &ParticipantId) -> Option<(Instant, Duration)> {
        let run = self.lanes.get(participant)?.running.as_ref()?;
        let step = run.step();
        (step.phase == Phase::Transitioning).then_some((run.phase_started, step.duration))
    }

    /// Time spent in the movement phase at `now` and its length, while in it.
    pub fn movement_elapsed(
        &self,
        participant: &ParticipantId,
        now: Instant,
    ) -> Option<(Duration, Duration)> {
        let (started, duration) = self.movement_window(participant)?;
        Some((now.saturating_duration_since(started).min(duration), duration))
    }

    /// Number of log lines that may be shown, or `None` if nothing is
    /// withheld.
    pub fn log_floor(&self) -> Option<usize> {
        self.lanes
            .values()
            .flat_map(|lane| {
                let running = lane
                    .running
                    .as_ref()
                    .filter(|run| !run.log_released)
                    .map(|run| run.job.log_floor);
                running
                    .into_iter()
                    .chain(lane.pending.iter().map(|job| job.log_floor))
            })
            .min()
    }

    fn advance(&mut self, participant: &ParticipantId, now: Instant) {
        let Self {
            timings,
            await_render_ack,
            lanes,
            effects,
        } = self;
        let Some(lane) = lanes.get_mut(participant) else {
            return;
        };

        loop {
            let Some(run) = lane.running.as_mut() else {
                break;
            };

            if now.saturating_duration_since(run.started) >= timings.safety_timeout {
                log::warn!(
                    "Animation for {participant} stuck in {:?}, forcing idle",
                    run.step().phase
                );
                lanes.remove(participant);
                effects.push(SequencerEffect::ForcedReset {
                    participant: participant.clone(),
                });
                return;
            }

            let step = run.step();
            let boundary = run.phase_started + step.duration;
            if now < boundary || run.gated(*await_render_ack) {
                break;
            }
            // An acknowledged movement ends when the ack arrives, not on schedule.
            let next_start = if *await_render_ack && step.phase == Phase::Transitioning {
                now.max(boundary)
            } else {
                boundary
            };

            run.index += 1;
            if run.index < run.steps.len() {
                run.phase_started = next_start;
                enter(participant, run, lane.pending.is_empty(), effects);
                continue;
            }

            lane.running = None;
            let next = lane.pending.pop_front();
            effects.push(SequencerEffect::Finished {
                participant: participant.clone(),
                lane_idle: next.is_none(),
            });
            log::debug!("Animation for {participant} finished");
            match next {
                Some(job) => start(participant, lane, job, next_start, timings, effects),
                None => {
                    lanes.remove(participant);
                    return;
                }
            }
        }
    }
}

fn start(
    participant: &ParticipantId,
    lane: &mut Lane,
    job: Queued,
    at: Instant,
    timings: &PhaseTimings,
    effects: &mut Vec<SequencerEffect>,
) {
    let steps = job.animation.steps(timings);
    if steps.is_empty() {
        effects.push(SequencerEffect::Finished {
            participant: participant.clone(),
            lane_idle: lane.pending.is_empty(),
        });
        return;
    }
    let mut run = Running {
        job,
        steps,
        index: 0,
        started: at,
        phase_started: at,
        acked: false,
        log_released: false,
    };
    enter(participant, &mut run, lane.pending.is_empty(), effects);
    lane.running = Some(run);
}

fn enter(
    participant: &ParticipantId,
    run: &mut Running,
    last_in_lane: bool,
    effects: &mut Vec<SequencerEffect>,
) {
    let phase = run.step().phase;
    log::debug!("Animation for {participant} entering {phase:?}");
    effects.push(SequencerEffect::PhaseEntered {
        participant: participant.clone(),
        phase,
    });

    if phase >= Phase::Settling && !run.log_released {
        run.log_released = true;
        effects.push(SequencerEffect::ReleaseLog {
            participant: participant.clone(),
        });
    }

    // Later events in the lane have already replaced the authoritative
    // snapshot; committing it here would skip their animations.
    let basis = if last_in_lane {
        CommitBasis::Latest
    } else {
        CommitBasis::Pinned(run.job.basis.clone())
    };

    match phase {
        Phase::Transitioning => effects.push(SequencerEffect::Commit {
            participant: participant.clone(),
            basis,
            movement: run.job.animation.movement(),
        }),
        Phase::Revealing => effects.push(SequencerEffect::Reveal {
            participant: participant.clone(),
            basis,
            landing: run.job.animation.landing(),
        }),
        _ => {}
    }
}
