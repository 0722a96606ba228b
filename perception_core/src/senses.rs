//! Normalizes actor sheets into the sense channels the decision ladder
//! consumes.
//!
//! Sheets declare senses loosely (missing acuity, missing ranges, feats
//! instead of sense lines, legacy flags). Everything is folded into one
//! `SensingCapabilities` value per token, with conditions already applied,
//! so the ladder never has to look back at the document.

use ahash::AHashMap;
use perception_schema::{Acuity, ConditionFlags, SenseKind, TokenId, RANGE_UNLIMITED};

use crate::actor_doc::ActorDoc;
use crate::perception_config::SenseConfig;

/// Everything the decision ladder needs to know about one observer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensingCapabilities {
    /// Whether any visual channel is usable at all.
    pub has_vision: bool,
    /// Precise sense ranges in feet, keyed by channel.
    pub precise: AHashMap<SenseKind, f32>,
    /// Imprecise sense ranges in feet, keyed by channel.
    pub imprecise: AHashMap<SenseKind, f32>,
    pub conditions: ConditionFlags,
}

impl SensingCapabilities {
    /// Longest usable visual range across all precise visual channels.
    pub fn max_visual_range(&self) -> f32 {
        self.precise
            .iter()
            .filter(|(kind, _)| kind.is_visual())
            .map(|(_, range)| *range)
            .fold(0.0, f32::max)
    }

    pub fn has_darkvision(&self) -> bool {
        self.precise.contains_key(&SenseKind::Darkvision)
            || self.precise.contains_key(&SenseKind::GreaterDarkvision)
    }

    pub fn has_greater_darkvision(&self) -> bool {
        self.precise.contains_key(&SenseKind::GreaterDarkvision)
    }

    pub fn has_low_light_vision(&self) -> bool {
        self.precise.contains_key(&SenseKind::LowLightVision) || self.has_darkvision()
    }

    pub fn is_dazzled(&self) -> bool {
        self.conditions.contains(ConditionFlags::DAZZLED)
    }

    /// Precise non-visual channels reaching at least `distance_ft`.
    pub fn precise_nonvisual_in_range(
        &self,
        distance_ft: f32,
    ) -> impl Iterator<Item = SenseKind> + '_ {
        self.precise
            .iter()
            .filter(move |(kind, range)| !kind.is_visual() && **range >= distance_ft)
            .map(|(kind, _)| *kind)
    }

    /// Imprecise channels reaching at least `distance_ft`.
    pub fn imprecise_in_range(&self, distance_ft: f32) -> impl Iterator<Item = SenseKind> + '_ {
        self.imprecise
            .iter()
            .filter(move |(_, range)| **range >= distance_ft)
            .map(|(kind, _)| *kind)
    }
}

/// Builds capabilities from a sheet. Pure; condition and effect state is read
/// off the same document snapshot.
pub fn resolve_capabilities(doc: &ActorDoc, config: &SenseConfig) -> SensingCapabilities {
    let mut caps = SensingCapabilities {
        has_vision: doc.has_vision(),
        ..SensingCapabilities::default()
    };

    for raw in doc.raw_senses() {
        let Some(kind) = SenseKind::from_slug(&raw.slug) else {
            tracing::debug!(
                target: "umbra::senses",
                slug = %raw.slug,
                "sense.unknown_slug skipped"
            );
            continue;
        };

        // Visual channels are precise by nature regardless of what the sheet
        // claims; everything else defaults to imprecise.
        let acuity = if kind.is_visual() {
            Acuity::Precise
        } else {
            raw.acuity
                .as_deref()
                .map(Acuity::from_str_lossy)
                .unwrap_or_default()
        };

        let range = match raw.range {
            Some(range) if range.is_finite() && range > 0.0 => range,
            _ if kind.is_visual() => RANGE_UNLIMITED,
            _ => {
                // A rangeless non-visual sense cannot reach anything.
                tracing::debug!(
                    target: "umbra::senses",
                    slug = %raw.slug,
                    "sense.missing_range dropped"
                );
                continue;
            }
        };

        match acuity {
            Acuity::Precise => upgrade_range(&mut caps.precise, kind, range),
            Acuity::Imprecise => upgrade_range(&mut caps.imprecise, kind, range),
            // Vague senses only hint that something exists; they never place
            // a creature on the ladder.
            Acuity::Vague => {}
        }
    }

    // Ordinary sight is implied unless the sheet declares it away.
    if caps.has_vision {
        caps.precise
            .entry(SenseKind::Vision)
            .or_insert(RANGE_UNLIMITED);
    }

    // Feats can grant darkvision without a sense line. Sense lines win when
    // both are present.
    for feat in doc.feat_slugs() {
        let kind = match feat.as_str() {
            "darkvision" => SenseKind::Darkvision,
            "greater-darkvision" => SenseKind::GreaterDarkvision,
            _ => continue,
        };
        caps.precise.entry(kind).or_insert(RANGE_UNLIMITED);
    }

    if doc.condition_active("blinded") {
        caps.conditions |= ConditionFlags::BLINDED;
    }
    if doc.condition_active("deafened") {
        caps.conditions |= ConditionFlags::DEAFENED;
    }
    if doc.condition_active("dazzled") {
        caps.conditions |= ConditionFlags::DAZZLED;
    }

    if caps.conditions.contains(ConditionFlags::BLINDED) {
        caps.precise.retain(|kind, _| !kind.is_visual());
        caps.imprecise.retain(|kind, _| !kind.is_visual());
        caps.has_vision = false;
    }

    if caps.conditions.contains(ConditionFlags::DEAFENED) {
        caps.precise.retain(|kind, _| !kind.is_auditory());
        caps.imprecise.retain(|kind, _| !kind.is_auditory());
    }

    // Echolocation rides on hearing, so deafened shuts it off too.
    if doc.echolocation_active() && !caps.conditions.contains(ConditionFlags::DEAFENED) {
        let range = doc
            .echolocation_range_override()
            .filter(|range| range.is_finite() && *range > 0.0)
            .unwrap_or(config.echolocation_range_ft);
        upgrade_range(&mut caps.precise, SenseKind::Echolocation, range);
    }

    caps
}

fn upgrade_range(map: &mut AHashMap<SenseKind, f32>, kind: SenseKind, range: f32) {
    let entry = map.entry(kind).or_insert(range);
    if range > *entry {
        *entry = range;
    }
}

#[derive(Debug, Clone)]
struct SenseCacheEntry {
    caps: SensingCapabilities,
    computed_at_ms: u64,
}

/// Per-token capability memo. Entries expire on a TTL and are dropped eagerly
/// when the host reports an effect or condition change for the token.
#[derive(Debug, Default)]
pub struct SenseCache {
    entries: AHashMap<TokenId, SenseCacheEntry>,
}

impl SenseCache {
    pub fn get(&self, token: TokenId, now_ms: u64, ttl_ms: u64) -> Option<&SensingCapabilities> {
        self.entries.get(&token).and_then(|entry| {
            if now_ms.saturating_sub(entry.computed_at_ms) <= ttl_ms {
                Some(&entry.caps)
            } else {
                None
            }
        })
    }

    pub fn insert(&mut self, token: TokenId, caps: SensingCapabilities, now_ms: u64) {
        self.entries.insert(
            token,
            SenseCacheEntry {
                caps,
                computed_at_ms: now_ms,
            },
        );
    }

    pub fn invalidate(&mut self, token: TokenId) {
        self.entries.remove(&token);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cache-aware resolve. Misses recompute from the document and fill the memo.
pub fn resolve_cached(
    cache: &mut SenseCache,
    token: TokenId,
    doc: &ActorDoc,
    config: &SenseConfig,
    now_ms: u64,
) -> SensingCapabilities {
    if let Some(hit) = cache.get(token, now_ms, config.cache_ttl_ms) {
        return hit.clone();
    }
    let caps = resolve_capabilities(doc, config);
    cache.insert(token, caps.clone(), now_ms);
    caps
}
