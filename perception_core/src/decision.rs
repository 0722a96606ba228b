//! The visibility decision ladder.
//!
//! One call answers "how well does this observer perceive this target" from
//! pre-resolved inputs. Rungs are tried in order and the first that applies
//! wins: sightless observers resolve purely on non-visual channels, then the
//! visual branch grades the target's illumination, then non-visual channels
//! rescue targets the eyes lost.
//!
//! Only the light at the target matters. An observer standing in pitch
//! darkness looking at a torchlit target sees it plainly.

use perception_schema::{LightLevel, LightSample, VisibilityState, HEIGHTENED_DARKNESS_RANK};

use crate::senses::SensingCapabilities;

/// Everything already resolved about one observer-target pair.
#[derive(Debug, Clone, Copy)]
pub struct PairContext {
    /// Center-to-center distance in feet.
    pub distance_ft: f32,
    /// Illumination at the target's position.
    pub target_light: LightSample,
    /// Whether sight walls leave at least one clear ray to the target.
    pub line_of_sight: bool,
    /// Whether sound walls or silence effects cut the pair off acoustically.
    pub sound_blocked: bool,
}

impl PairContext {
    pub fn clear_at(distance_ft: f32) -> Self {
        Self {
            distance_ft,
            target_light: LightSample::bright(),
            line_of_sight: true,
            sound_blocked: false,
        }
    }
}

/// Resolves the ladder for one ordered pair.
pub fn decide_visibility(caps: &SensingCapabilities, ctx: &PairContext) -> VisibilityState {
    if !caps.has_vision {
        return nonvisual_only(caps, ctx);
    }

    let visual = visual_state(caps, ctx);

    // Dazzled blurs an otherwise clear look when vision is the observer's
    // only precise channel that reaches the target.
    if visual == VisibilityState::Observed
        && caps.is_dazzled()
        && !has_usable_precise_nonvisual(caps, ctx)
    {
        return VisibilityState::Concealed;
    }

    match visual {
        VisibilityState::Observed | VisibilityState::Concealed => visual,
        VisibilityState::Hidden => {
            if has_usable_precise_nonvisual(caps, ctx) {
                VisibilityState::Observed
            } else {
                VisibilityState::Hidden
            }
        }
        VisibilityState::Undetected => nonvisual_only(caps, ctx),
    }
}

/// Resolution for observers whose eyes contribute nothing to this pair.
/// Precise channels pinpoint, imprecise ones localize, nothing means nothing.
fn nonvisual_only(caps: &SensingCapabilities, ctx: &PairContext) -> VisibilityState {
    if has_usable_precise_nonvisual(caps, ctx) {
        return VisibilityState::Observed;
    }
    if has_usable_imprecise(caps, ctx) {
        return VisibilityState::Hidden;
    }
    VisibilityState::Undetected
}

/// What the observer's eyes alone make of the target.
fn visual_state(caps: &SensingCapabilities, ctx: &PairContext) -> VisibilityState {
    if !ctx.line_of_sight || ctx.distance_ft > caps.max_visual_range() {
        return VisibilityState::Undetected;
    }

    let light = ctx.target_light;
    match light.level {
        LightLevel::Bright => VisibilityState::Observed,
        LightLevel::Dim => {
            if caps.has_low_light_vision() {
                VisibilityState::Observed
            } else {
                VisibilityState::Concealed
            }
        }
        LightLevel::Darkness => darkness_state(caps, light),
    }
}

fn darkness_state(caps: &SensingCapabilities, light: LightSample) -> VisibilityState {
    if !light.magical_darkness {
        return if caps.has_darkvision() {
            VisibilityState::Observed
        } else {
            VisibilityState::Hidden
        };
    }
    if caps.has_greater_darkvision() {
        return VisibilityState::Observed;
    }
    if caps.has_darkvision() {
        // Heightened ranks defeat ordinary darkvision partially; weaker
        // magical darkness does not defeat it at all.
        if light.darkness_rank >= HEIGHTENED_DARKNESS_RANK {
            VisibilityState::Concealed
        } else {
            VisibilityState::Observed
        }
    } else {
        VisibilityState::Hidden
    }
}

fn has_usable_precise_nonvisual(caps: &SensingCapabilities, ctx: &PairContext) -> bool {
    caps.precise_nonvisual_in_range(ctx.distance_ft)
        .any(|kind| !(kind.is_auditory() && ctx.sound_blocked))
}

fn has_usable_imprecise(caps: &SensingCapabilities, ctx: &PairContext) -> bool {
    caps.imprecise_in_range(ctx.distance_ft)
        .any(|kind| !(kind.is_auditory() && ctx.sound_blocked))
}

#[cfg(test)]
mod tests {
    use super::*;
    use perception_schema::{ConditionFlags, SenseKind, RANGE_UNLIMITED};

    fn sighted() -> SensingCapabilities {
        let mut caps = SensingCapabilities {
            has_vision: true,
            ..SensingCapabilities::default()
        };
        caps.precise.insert(SenseKind::Vision, RANGE_UNLIMITED);
        caps
    }

    fn with_precise(mut caps: SensingCapabilities, kind: SenseKind, range: f32) -> SensingCapabilities {
        caps.precise.insert(kind, range);
        caps
    }

    fn with_imprecise(
        mut caps: SensingCapabilities,
        kind: SenseKind,
        range: f32,
    ) -> SensingCapabilities {
        caps.imprecise.insert(kind, range);
        caps
    }

    fn blind() -> SensingCapabilities {
        SensingCapabilities {
            has_vision: false,
            conditions: ConditionFlags::BLINDED,
            ..SensingCapabilities::default()
        }
    }

    fn in_light(light: LightSample, distance_ft: f32) -> PairContext {
        PairContext {
            target_light: light,
            ..PairContext::clear_at(distance_ft)
        }
    }

    #[test]
    fn bright_light_with_sight_is_observed() {
        let state = decide_visibility(&sighted(), &PairContext::clear_at(30.0));
        assert_eq!(state, VisibilityState::Observed);
    }

    #[test]
    fn dim_light_needs_low_light_vision() {
        let ctx = in_light(LightSample::dim(), 30.0);
        assert_eq!(
            decide_visibility(&sighted(), &ctx),
            VisibilityState::Concealed
        );
        let low_light = with_precise(sighted(), SenseKind::LowLightVision, RANGE_UNLIMITED);
        assert_eq!(decide_visibility(&low_light, &ctx), VisibilityState::Observed);
    }

    #[test]
    fn plain_darkness_needs_darkvision() {
        let ctx = in_light(LightSample::darkness(), 30.0);
        assert_eq!(decide_visibility(&sighted(), &ctx), VisibilityState::Hidden);
        let darkvision = with_precise(sighted(), SenseKind::Darkvision, RANGE_UNLIMITED);
        assert_eq!(
            decide_visibility(&darkvision, &ctx),
            VisibilityState::Observed
        );
    }

    #[test]
    fn magical_darkness_rank_matrix() {
        let darkvision = with_precise(sighted(), SenseKind::Darkvision, RANGE_UNLIMITED);
        let greater = with_precise(sighted(), SenseKind::GreaterDarkvision, RANGE_UNLIMITED);

        let strong = in_light(LightSample::magical_darkness(5), 30.0);
        assert_eq!(decide_visibility(&sighted(), &strong), VisibilityState::Hidden);
        assert_eq!(
            decide_visibility(&darkvision, &strong),
            VisibilityState::Concealed
        );
        assert_eq!(decide_visibility(&greater, &strong), VisibilityState::Observed);

        // Magical but below rank 4: ordinary darkvision still wins.
        let weak = in_light(LightSample::magical_darkness(2), 30.0);
        assert_eq!(decide_visibility(&darkvision, &weak), VisibilityState::Observed);
        assert_eq!(decide_visibility(&sighted(), &weak), VisibilityState::Hidden);
    }

    #[test]
    fn observer_in_darkness_sees_lit_target() {
        // Only the target's illumination feeds the ladder; nothing about the
        // observer's own square appears in the context at all.
        let state = decide_visibility(&sighted(), &PairContext::clear_at(60.0));
        assert_eq!(state, VisibilityState::Observed);
    }

    #[test]
    fn blocked_sight_falls_back_to_nothing() {
        let ctx = PairContext {
            line_of_sight: false,
            ..PairContext::clear_at(30.0)
        };
        assert_eq!(
            decide_visibility(&sighted(), &ctx),
            VisibilityState::Undetected
        );
    }

    #[test]
    fn wall_blocked_vision_falls_back_to_hearing() {
        let caps = with_imprecise(sighted(), SenseKind::Hearing, 60.0);
        let ctx = PairContext {
            line_of_sight: false,
            ..PairContext::clear_at(40.0)
        };
        assert_eq!(decide_visibility(&caps, &ctx), VisibilityState::Hidden);
    }

    #[test]
    fn tremorsense_pierces_walls() {
        let caps = with_precise(sighted(), SenseKind::Tremorsense, 60.0);
        let ctx = PairContext {
            line_of_sight: false,
            ..PairContext::clear_at(30.0)
        };
        assert_eq!(decide_visibility(&caps, &ctx), VisibilityState::Observed);
    }

    #[test]
    fn ranged_visual_sense_gives_out_at_distance() {
        let mut caps = SensingCapabilities {
            has_vision: true,
            ..SensingCapabilities::default()
        };
        caps.precise.insert(SenseKind::Darkvision, 60.0);
        // Within range, darkness is no obstacle.
        assert_eq!(
            decide_visibility(&caps, &in_light(LightSample::darkness(), 50.0)),
            VisibilityState::Observed
        );
        // Beyond every visual range the eyes report nothing.
        assert_eq!(
            decide_visibility(&caps, &in_light(LightSample::darkness(), 90.0)),
            VisibilityState::Undetected
        );
    }

    #[test]
    fn blind_observer_with_precise_hearing_observes() {
        let caps = with_precise(blind(), SenseKind::Hearing, 60.0);
        assert_eq!(
            decide_visibility(&caps, &PairContext::clear_at(30.0)),
            VisibilityState::Observed
        );
    }

    #[test]
    fn blind_observer_with_imprecise_hearing_gets_hidden() {
        let caps = with_imprecise(blind(), SenseKind::Hearing, 60.0);
        assert_eq!(
            decide_visibility(&caps, &PairContext::clear_at(30.0)),
            VisibilityState::Hidden
        );
        // Imprecise senses never produce Observed, no matter how close.
        assert_eq!(
            decide_visibility(&caps, &PairContext::clear_at(1.0)),
            VisibilityState::Hidden
        );
    }

    #[test]
    fn blind_observer_out_of_range_is_undetected() {
        let caps = with_imprecise(blind(), SenseKind::Hearing, 20.0);
        assert_eq!(
            decide_visibility(&caps, &PairContext::clear_at(30.0)),
            VisibilityState::Undetected
        );
    }

    #[test]
    fn sound_block_gates_auditory_channels() {
        let caps = with_precise(blind(), SenseKind::Hearing, 60.0);
        let ctx = PairContext {
            sound_blocked: true,
            ..PairContext::clear_at(30.0)
        };
        assert_eq!(decide_visibility(&caps, &ctx), VisibilityState::Undetected);

        // A non-auditory channel is unaffected by the same block.
        let scent = with_imprecise(blind(), SenseKind::Scent, 60.0);
        assert_eq!(decide_visibility(&scent, &ctx), VisibilityState::Hidden);
    }

    #[test]
    fn echolocation_observes_through_darkness() {
        let caps = with_precise(blind(), SenseKind::Echolocation, 40.0);
        let ctx = in_light(LightSample::magical_darkness(6), 30.0);
        assert_eq!(decide_visibility(&caps, &ctx), VisibilityState::Observed);
    }

    #[test]
    fn precise_nonvisual_rescues_visual_hidden() {
        let caps = with_precise(sighted(), SenseKind::Tremorsense, 60.0);
        let ctx = in_light(LightSample::darkness(), 30.0);
        assert_eq!(decide_visibility(&caps, &ctx), VisibilityState::Observed);
    }

    #[test]
    fn dazzled_conceals_when_vision_is_the_only_precise_channel() {
        let mut caps = sighted();
        caps.conditions |= ConditionFlags::DAZZLED;
        assert_eq!(
            decide_visibility(&caps, &PairContext::clear_at(30.0)),
            VisibilityState::Concealed
        );
    }

    #[test]
    fn dazzled_ignored_when_another_precise_channel_reaches() {
        let mut caps = with_precise(sighted(), SenseKind::Echolocation, 40.0);
        caps.conditions |= ConditionFlags::DAZZLED;
        assert_eq!(
            decide_visibility(&caps, &PairContext::clear_at(30.0)),
            VisibilityState::Observed
        );
        // Out of echolocation range, vision is the only precise channel again.
        assert_eq!(
            decide_visibility(&caps, &PairContext::clear_at(60.0)),
            VisibilityState::Concealed
        );
    }

    #[test]
    fn dazzled_in_darkness_stays_hidden() {
        let mut caps = sighted();
        caps.conditions |= ConditionFlags::DAZZLED;
        let ctx = in_light(LightSample::darkness(), 30.0);
        assert_eq!(decide_visibility(&caps, &ctx), VisibilityState::Hidden);
    }
}
