//! Resource wrapper around the pair-state store.
//!
//! Batches never write the matrix directly; they hand their results here so
//! the guards live in one place. Manual overrides shadow computed states, and
//! tokens mid-Sneak keep whatever states they had until the sneak resolves.

use ahash::AHashSet;
use bevy::prelude::Resource;
use perception_schema::{TokenId, VisibilityMatrix, VisibilityRecord, VisibilityState};

#[derive(Resource, Debug, Default)]
pub struct VisibilityMapService {
    matrix: VisibilityMatrix,
}

impl VisibilityMapService {
    pub fn state_between(&self, observer: TokenId, target: TokenId) -> VisibilityState {
        self.matrix.state_between(observer, target)
    }

    pub fn has_override(&self, observer: TokenId, target: TokenId) -> bool {
        self.matrix.has_override(observer, target)
    }

    /// Pins a host-supplied state for the pair until cleared.
    pub fn set_override(&mut self, observer: TokenId, target: TokenId, state: VisibilityState) {
        tracing::debug!(
            target: "umbra::visibility",
            observer = observer.0,
            target = target.0,
            state = %state,
            "override.set"
        );
        self.matrix.set_override(observer, target, state);
    }

    pub fn clear_override(&mut self, observer: TokenId, target: TokenId) -> bool {
        let cleared = self.matrix.clear_override(observer, target);
        if cleared {
            tracing::debug!(
                target: "umbra::visibility",
                observer = observer.0,
                target = target.0,
                "override.cleared"
            );
        }
        cleared
    }

    /// Applies one batch worth of computed states. Pairs whose target is
    /// sneak-guarded are left untouched; pairs under an override keep their
    /// pinned effective state. Returns how many effective states changed.
    pub fn apply_batch(
        &mut self,
        results: &[(TokenId, TokenId, VisibilityState)],
        sneak_guarded: &AHashSet<TokenId>,
    ) -> usize {
        let mut changed = 0usize;
        for (observer, target, state) in results {
            if sneak_guarded.contains(target) {
                continue;
            }
            if self.matrix.set_state(*observer, *target, *state) {
                changed += 1;
            }
        }
        changed
    }

    /// Drops every record touching the removed token.
    pub fn remove_token(&mut self, token: TokenId) {
        self.matrix.retain_tokens(|candidate| candidate != token);
    }

    pub fn clear(&mut self) {
        self.matrix.clear();
    }

    pub fn records(&self) -> Vec<VisibilityRecord> {
        self.matrix.to_records()
    }

    pub fn load_records(&mut self, records: &[VisibilityRecord]) {
        self.matrix = VisibilityMatrix::from_records(records);
    }

    pub fn stored_len(&self) -> usize {
        self.matrix.stored_len()
    }

    pub fn override_len(&self) -> usize {
        self.matrix.override_len()
    }

    pub fn count_by_state(&self) -> (usize, usize, usize) {
        self.matrix.count_by_state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_sneak() -> AHashSet<TokenId> {
        AHashSet::new()
    }

    #[test]
    fn apply_batch_counts_effective_changes() {
        let mut service = VisibilityMapService::default();
        let results = vec![
            (TokenId(1), TokenId(2), VisibilityState::Hidden),
            (TokenId(2), TokenId(1), VisibilityState::Observed),
        ];
        // Second entry restates the default, so only one change lands.
        assert_eq!(service.apply_batch(&results, &no_sneak()), 1);
        assert_eq!(service.apply_batch(&results, &no_sneak()), 0);
    }

    #[test]
    fn override_shadows_computed_state() {
        let mut service = VisibilityMapService::default();
        service.set_override(TokenId(1), TokenId(2), VisibilityState::Undetected);
        let changed = service.apply_batch(
            &[(TokenId(1), TokenId(2), VisibilityState::Observed)],
            &no_sneak(),
        );
        assert_eq!(changed, 0);
        assert_eq!(
            service.state_between(TokenId(1), TokenId(2)),
            VisibilityState::Undetected
        );

        // Clearing the override exposes the computed value from the batch.
        assert!(service.clear_override(TokenId(1), TokenId(2)));
        assert_eq!(
            service.state_between(TokenId(1), TokenId(2)),
            VisibilityState::Observed
        );
    }

    #[test]
    fn sneak_guard_blocks_writes_targeting_the_sneaker() {
        let mut service = VisibilityMapService::default();
        service.apply_batch(
            &[(TokenId(1), TokenId(9), VisibilityState::Hidden)],
            &no_sneak(),
        );

        let mut guarded = AHashSet::new();
        guarded.insert(TokenId(9));
        let changed = service.apply_batch(
            &[
                (TokenId(1), TokenId(9), VisibilityState::Observed),
                (TokenId(9), TokenId(1), VisibilityState::Concealed),
            ],
            &guarded,
        );
        // The sneaker as observer is still writable; as target it is pinned.
        assert_eq!(changed, 1);
        assert_eq!(
            service.state_between(TokenId(1), TokenId(9)),
            VisibilityState::Hidden
        );
        assert_eq!(
            service.state_between(TokenId(9), TokenId(1)),
            VisibilityState::Concealed
        );
    }

    #[test]
    fn remove_token_drops_both_directions() {
        let mut service = VisibilityMapService::default();
        service.apply_batch(
            &[
                (TokenId(1), TokenId(2), VisibilityState::Hidden),
                (TokenId(2), TokenId(1), VisibilityState::Concealed),
                (TokenId(1), TokenId(3), VisibilityState::Undetected),
            ],
            &no_sneak(),
        );
        service.remove_token(TokenId(2));
        assert_eq!(service.stored_len(), 1);
        assert_eq!(
            service.state_between(TokenId(1), TokenId(3)),
            VisibilityState::Undetected
        );
    }

    #[test]
    fn records_round_trip_through_snapshots() {
        let mut service = VisibilityMapService::default();
        service.apply_batch(
            &[(TokenId(5), TokenId(6), VisibilityState::Concealed)],
            &no_sneak(),
        );
        let records = service.records();

        let mut restored = VisibilityMapService::default();
        restored.load_records(&records);
        assert_eq!(
            restored.state_between(TokenId(5), TokenId(6)),
            VisibilityState::Concealed
        );
    }
}
