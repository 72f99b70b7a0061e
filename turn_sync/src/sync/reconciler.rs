//! Authoritative and effective state.
//!
//! The [`Reconciler`] keeps the last snapshot the server pushed and the
//! projection the render layer is allowed to see. Participants with an
//! animation in flight are *held*: new snapshots still replace the
//! authoritative copy but leave the held participant's projection alone
//! until the sequencer commits it.

use super::{
    sequencer::Movement,
    view::{ChatLine, EffectiveView, ParticipantView, Transient},
};
use crate::game::entities::{ParticipantId, Snapshot, walk_path};
use std::{collections::BTreeSet, sync::Arc, time::Duration};

/// A snapshot tagged with its arrival order.
#[derive(Clone, Debug, PartialEq)]
pub struct Stamped {
    pub seq: u64,
    pub snapshot: Arc<Snapshot>,
}

/// Which snapshot a commit projects from.
#[derive(Clone, Debug, PartialEq)]
pub enum CommitBasis {
    /// Whatever is authoritative at commit time.
    Latest,
    /// The snapshot embedded in the event being animated. Used while later
    /// events for the same participant are still queued.
    Pinned(Stamped),
}

#[derive(Debug, Default)]
pub struct Reconciler {
    authoritative: Option<Stamped>,
    next_seq: u64,
    view: EffectiveView,
    held: BTreeSet<ParticipantId>,
    /// Arrival order of the snapshot the shared board fields came from.
    board_seq: u64,
    log_limit: Option<usize>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the authoritative snapshot and republish every projection
    /// that is not held.
    pub fn apply_snapshot(&mut self, snapshot: Snapshot) -> Stamped {
        let stamped = self.stamp(snapshot);
        let snapshot = Arc::clone(&stamped.snapshot);

        let known: Vec<ParticipantId> = self.view.participants.keys().cloned().collect();
        let incoming = snapshot.players.keys().cloned();
        let ids: BTreeSet<ParticipantId> = known.into_iter().chain(incoming).collect();
        for id in ids.iter().filter(|id| !self.held.contains(*id)) {
            self.view.project_participant(&snapshot, id);
        }

        if self.held.is_empty() {
            self.view.project_board(&snapshot);
            self.board_seq = stamped.seq;
        } else {
            log::debug!(
                "Snapshot {} applied; {} participant(s) held",
                stamped.seq,
                self.held.len()
            );
        }
        self.refresh_log();
        self.touch();
        stamped
    }

    /// Apply a discrete event. The subject of an animated event is held
    /// before its embedded snapshot is applied.
    pub fn apply_event(
        &mut self,
        snapshot: Option<Snapshot>,
        animated: Option<&ParticipantId>,
    ) -> Option<Stamped> {
        if let Some(subject) = animated {
            self.hold(subject);
        }
        snapshot.map(|snapshot| self.apply_snapshot(snapshot))
    }

    pub fn hold(&mut self, participant: &ParticipantId) {
        self.held.insert(participant.clone());
    }

    /// Stop holding the participant and snap them to the latest snapshot.
    pub fn release(&mut self, participant: &ParticipantId) {
        self.held.remove(participant);
        let Some(latest) = self.authoritative.clone() else {
            return;
        };
        self.view.project_participant(&latest.snapshot, participant);
        if self.held.is_empty() && latest.seq > self.board_seq {
            self.view.project_board(&latest.snapshot);
            self.board_seq = latest.seq;
        }
        self.touch();
    }

    /// Advance the participant's projection to `basis` and lay out the path
    /// the token takes to get there.
    pub fn commit(&mut self, participant: &ParticipantId, basis: &CommitBasis, movement: Movement) {
        let stamped = match basis {
            CommitBasis::Latest => match &self.authoritative {
                Some(latest) => latest.clone(),
                None => return,
            },
            CommitBasis::Pinned(stamped) => stamped.clone(),
        };
        let snapshot = &stamped.snapshot;

        let Some(target) = snapshot.participant(participant) else {
            self.view.participants.remove(participant);
            self.touch();
            return;
        };
        let from = self
            .view
            .participants
            .get(participant)
            .map_or(target.position, |shown| shown.state.position);
        let to = target.position;

        let mut path = match movement {
            Movement::Walk(steps) => walk_path(from, steps, snapshot.board_len()),
            Movement::Jump | Movement::Stay => Vec::new(),
        };
        if path.last().copied().unwrap_or(from) != to {
            path.push(to);
        }
        log::debug!("Committing {participant}: {from} -> {to} via {} cell(s)", path.len());

        let walk = (!path.is_empty()).then_some(Transient { path, step: 0 });
        self.view.participants.insert(
            participant.clone(),
            ParticipantView {
                state: target.clone(),
                walk,
            },
        );
        if stamped.seq >= self.board_seq {
            self.view.project_board(snapshot);
            self.board_seq = stamped.seq;
        }
        self.touch();
    }

    /// Move the token along its path, `elapsed` into a movement phase lasting
    /// `total`.
    pub fn set_walk_progress(&mut self, participant: &ParticipantId, elapsed: Duration, total: Duration) {
        let Some(walk) = self
            .view
            .participants
            .get_mut(participant)
            .and_then(|shown| shown.walk.as_mut())
        else {
            return;
        };
        let len = walk.path.len();
        let step = if total.is_zero() {
            len
        } else {
            let reached = elapsed.as_nanos() * len as u128 / total.as_nanos();
            usize::try_from(reached).unwrap_or(len)
        };
        let step = step.min(len.saturating_sub(1));
        if step != walk.step {
            walk.step = step;
            self.touch();
        }
    }

    /// Drop the in-flight walk so the token rests on its committed cell.
    pub fn finish_walk(&mut self, participant: &ParticipantId) {
        let finished = self
            .view
            .participants
            .get_mut(participant)
            .and_then(|shown| shown.walk.take())
            .is_some();
        if finished {
            self.touch();
        }
    }

    /// Replace everything with `snapshot`, regardless of what is held.
    pub fn resync(&mut self, snapshot: Snapshot) -> Stamped {
        log::info!("Resynchronizing from snapshot of turn {}", snapshot.turn_number);
        self.held.clear();
        self.view.participants.clear();
        self.apply_snapshot(snapshot)
    }

    /// Limit the visible log to its first `limit` lines; `None` shows all.
    pub fn set_log_limit(&mut self, limit: Option<usize>) {
        if self.log_limit != limit {
            self.log_limit = limit;
            if self.refresh_log() {
                self.touch();
            }
        }
    }

    pub fn push_chat(&mut self, line: ChatLine) {
        self.view.push_chat(line);
        self.touch();
    }

    pub fn authoritative(&self) -> Option<&Snapshot> {
        self.authoritative.as_ref().map(|s| s.snapshot.as_ref())
    }

    pub fn latest(&self) -> Option<&Stamped> {
        self.authoritative.as_ref()
    }

    pub fn authoritative_log_len(&self) -> usize {
        self.authoritative().map_or(0, |s| s.logs.len())
    }

    pub fn is_held(&self, participant: &ParticipantId) -> bool {
        self.held.contains(participant)
    }

    pub fn view(&self) -> &EffectiveView {
        &self.view
    }

    pub(crate) fn view_mut(&mut self) -> &mut EffectiveView {
        &mut self.view
    }

    fn stamp(&mut self, snapshot: Snapshot) -> Stamped {
        self.next_seq += 1;
        let stamped = Stamped {
            seq: self.next_seq,
            snapshot: Arc::new(snapshot),
        };
        self.authoritative = Some(stamped.clone());
        stamped
    }

    /// Returns whether the visible log changed.
    fn refresh_log(&mut self) -> bool {
        let logs = self
            .authoritative
            .as_ref()
            .map(|s| s.snapshot.logs.as_slice())
            .unwrap_or_default();
        let visible = &logs[..self.log_limit.unwrap_or(logs.len()).min(logs.len())];
        if self.view.log.as_slice() == visible {
            return false;
        }
        self.view.log = visible.to_vec();
        true
    }

    fn touch(&mut self) {
        self.view.revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entities::{GameStatus, ParticipantState};

    fn id(s: &str) -> ParticipantId {
        ParticipantId::new(s)
    }

    fn snapshot(positions: &[(&str, usize)], turn_number: u64) -> Snapshot {
        let mut snapshot = Snapshot {
            game_status: GameStatus::Active,
            turn_number,
            ..Default::default()
        };
        for (name, position) in positions {
            snapshot.player_order.push(id(name));
            snapshot.players.insert(
                id(name),
                ParticipantState {
                    id: id(name),
                    position: *position,
                    ..Default::default()
                },
            );
        }
        snapshot
    }

    // === Snapshot Tests ===

    #[test]
    fn test_snapshot_without_animation_publishes_immediately() {
        let mut rec = Reconciler::new();
        rec.apply_snapshot(snapshot(&[("a", 5), ("b", 0)], 1));
        assert_eq!(rec.view().position_of(&id("a")), Some(5));
        assert_eq!(rec.view().turn_number, 1);
    }

    #[test]
    fn test_held_participant_is_not_relocated() {
        let mut rec = Reconciler::new();
        rec.apply_snapshot(snapshot(&[("a", 5), ("b", 0)], 1));
        rec.apply_event(Some(snapshot(&[("a", 12), ("b", 0)], 1)), Some(&id("a")));
        rec.apply_snapshot(snapshot(&[("a", 20), ("b", 3)], 2));
        assert_eq!(rec.view().position_of(&id("a")), Some(5));
        assert_eq!(rec.view().position_of(&id("b")), Some(3));
        // Board fields wait until nobody is held.
        assert_eq!(rec.view().turn_number, 1);
    }

    #[test]
    fn test_participants_leave_and_join() {
        let mut rec = Reconciler::new();
        rec.apply_snapshot(snapshot(&[("a", 1), ("b", 2)], 1));
        rec.apply_snapshot(snapshot(&[("a", 1), ("c", 0)], 1));
        assert!(rec.view().participant(&id("b")).is_none());
        assert!(rec.view().participant(&id("c")).is_some());
    }

    // === Commit Tests ===

    #[test]
    fn test_commit_walks_to_latest() {
        let mut rec = Reconciler::new();
        rec.apply_snapshot(snapshot(&[("a", 5)], 1));
        rec.apply_event(Some(snapshot(&[("a", 12)], 1)), Some(&id("a")));
        rec.commit(&id("a"), &CommitBasis::Latest, Movement::Walk(7));

        let shown = rec.view().participant(&id("a")).unwrap();
        assert_eq!(shown.state.position, 12);
        assert_eq!(
            shown.walk.as_ref().unwrap().path,
            vec![6, 7, 8, 9, 10, 11, 12]
        );
        assert_eq!(rec.view().position_of(&id("a")), Some(6));

        rec.set_walk_progress(&id("a"), Duration::from_millis(500), Duration::from_secs(1));
        assert_eq!(rec.view().position_of(&id("a")), Some(9));
        rec.set_walk_progress(&id("a"), Duration::from_secs(1), Duration::from_secs(1));
        assert_eq!(rec.view().position_of(&id("a")), Some(12));
        rec.finish_walk(&id("a"));
        assert_eq!(rec.view().participant(&id("a")).unwrap().walk, None);
    }

    #[test]
    fn test_commit_appends_jump_when_walk_misses_target() {
        let mut rec = Reconciler::new();
        rec.apply_snapshot(snapshot(&[("a", 28)], 1));
        // Landed on go-to-jail at 30, ends at 10.
        rec.apply_event(Some(snapshot(&[("a", 10)], 1)), Some(&id("a")));
        rec.commit(&id("a"), &CommitBasis::Latest, Movement::Walk(2));
        let walk = rec.view().participant(&id("a")).unwrap().walk.clone().unwrap();
        assert_eq!(walk.path, vec![29, 30, 10]);
    }

    #[test]
    fn test_commit_wraps_board() {
        let mut rec = Reconciler::new();
        rec.apply_snapshot(snapshot(&[("a", 38)], 1));
        rec.apply_event(Some(snapshot(&[("a", 3)], 1)), Some(&id("a")));
        rec.commit(&id("a"), &CommitBasis::Latest, Movement::Walk(5));
        let walk = rec.view().participant(&id("a")).unwrap().walk.clone().unwrap();
        assert_eq!(walk.path, vec![39, 0, 1, 2, 3]);
    }

    #[test]
    fn test_pinned_commit_uses_event_snapshot() {
        let mut rec = Reconciler::new();
        rec.apply_snapshot(snapshot(&[("a", 0)], 1));
        let first = rec
            .apply_event(Some(snapshot(&[("a", 4)], 1)), Some(&id("a")))
            .unwrap();
        rec.apply_event(Some(snapshot(&[("a", 9)], 1)), Some(&id("a")));
        rec.commit(&id("a"), &CommitBasis::Pinned(first), Movement::Walk(4));
        assert_eq!(rec.view().participant(&id("a")).unwrap().state.position, 4);
    }

    #[test]
    fn test_release_projects_latest() {
        let mut rec = Reconciler::new();
        rec.apply_snapshot(snapshot(&[("a", 5)], 1));
        rec.apply_event(Some(snapshot(&[("a", 12)], 1)), Some(&id("a")));
        rec.apply_snapshot(snapshot(&[("a", 12)], 2));
        rec.release(&id("a"));
        assert!(!rec.is_held(&id("a")));
        assert_eq!(rec.view().position_of(&id("a")), Some(12));
        assert_eq!(rec.view().turn_number, 2);
    }

    // === Resync Tests ===

    #[test]
    fn test_resync_replaces_everything() {
        let mut rec = Reconciler::new();
        rec.apply_snapshot(snapshot(&[("a", 5)], 1));
        rec.apply_event(Some(snapshot(&[("a", 12)], 1)), Some(&id("a")));
        rec.commit(&id("a"), &CommitBasis::Latest, Movement::Walk(7));
        rec.resync(snapshot(&[("a", 17)], 3));
        let shown = rec.view().participant(&id("a")).unwrap();
        assert_eq!(shown.state.position, 17);
        assert_eq!(shown.walk, None);
        assert!(!rec.is_held(&id("a")));
        assert_eq!(rec.view().turn_number, 3);
    }

    // === Log Tests ===

    #[test]
    fn test_log_limit_withholds_tail() {
        let mut rec = Reconciler::new();
        let mut snap = snapshot(&[("a", 0)], 1);
        snap.logs = vec!["one".into(), "two".into(), "three".into()];
        rec.set_log_limit(Some(2));
        rec.apply_snapshot(snap);
        assert_eq!(rec.view().log, vec!["one", "two"]);
        rec.set_log_limit(None);
        assert_eq!(rec.view().log.len(), 3);
    }
}
