//! Plain data types shared between the perception runtime, host bridges, and
//! test tooling. No ECS or engine types here; everything is serde-friendly so
//! snapshots can cross process boundaries as JSON.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Range value meaning "no distance limit" for a sense.
pub const RANGE_UNLIMITED: f32 = f32::INFINITY;

/// Spell rank at which darkness counts as heightened: it reads as magical
/// even without an explicit flag and partially defeats regular darkvision.
pub const HEIGHTENED_DARKNESS_RANK: u8 = 4;

/// Stable identifier for a token on the scene. Survives despawn/respawn of the
/// runtime entity, so visibility records keyed by it stay valid across frames.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct TokenId(pub u64);

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "token:{}", self.0)
    }
}

/// How well an observer perceives a target, ordered from best to worst.
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityState {
    /// Fully perceived. The default for any pair without a stored record.
    #[default]
    Observed = 0,
    /// Perceived but fuzzy; attacks against the target suffer a miss chance.
    Concealed = 1,
    /// General location known, exact position not.
    Hidden = 2,
    /// Observer has no idea the target is there.
    Undetected = 3,
}

impl VisibilityState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decodes a wire value. Unknown discriminants fall back to `Observed`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => VisibilityState::Concealed,
            2 => VisibilityState::Hidden,
            3 => VisibilityState::Undetected,
            _ => VisibilityState::Observed,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            VisibilityState::Observed => "observed",
            VisibilityState::Concealed => "concealed",
            VisibilityState::Hidden => "hidden",
            VisibilityState::Undetected => "undetected",
        }
    }

    /// True when the observer at least knows the target's exact position.
    pub fn is_pinpointed(self) -> bool {
        matches!(self, VisibilityState::Observed | VisibilityState::Concealed)
    }
}

impl std::fmt::Display for VisibilityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Sense channels the decision ladder understands. Anything a creature sheet
/// declares outside this set is ignored by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SenseKind {
    Vision,
    Darkvision,
    GreaterDarkvision,
    LowLightVision,
    Hearing,
    Echolocation,
    Tremorsense,
    Scent,
    Lifesense,
}

impl SenseKind {
    pub const ALL: [SenseKind; 9] = [
        SenseKind::Vision,
        SenseKind::Darkvision,
        SenseKind::GreaterDarkvision,
        SenseKind::LowLightVision,
        SenseKind::Hearing,
        SenseKind::Echolocation,
        SenseKind::Tremorsense,
        SenseKind::Scent,
        SenseKind::Lifesense,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            SenseKind::Vision => "vision",
            SenseKind::Darkvision => "darkvision",
            SenseKind::GreaterDarkvision => "greater-darkvision",
            SenseKind::LowLightVision => "low-light-vision",
            SenseKind::Hearing => "hearing",
            SenseKind::Echolocation => "echolocation",
            SenseKind::Tremorsense => "tremorsense",
            SenseKind::Scent => "scent",
            SenseKind::Lifesense => "lifesense",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug {
            "vision" | "sight" => Some(SenseKind::Vision),
            "darkvision" => Some(SenseKind::Darkvision),
            "greater-darkvision" | "greaterdarkvision" => Some(SenseKind::GreaterDarkvision),
            "low-light-vision" | "lowlightvision" => Some(SenseKind::LowLightVision),
            "hearing" => Some(SenseKind::Hearing),
            "echolocation" => Some(SenseKind::Echolocation),
            "tremorsense" => Some(SenseKind::Tremorsense),
            "scent" => Some(SenseKind::Scent),
            "lifesense" => Some(SenseKind::Lifesense),
            _ => None,
        }
    }

    /// Visual senses are the ones the blinded condition shuts off and the only
    /// ones the lighting branch of the decision ladder consults.
    pub fn is_visual(self) -> bool {
        matches!(
            self,
            SenseKind::Vision
                | SenseKind::Darkvision
                | SenseKind::GreaterDarkvision
                | SenseKind::LowLightVision
        )
    }

    /// Auditory senses are the ones deafened shuts off and sound-blocking
    /// walls interrupt.
    pub fn is_auditory(self) -> bool {
        matches!(self, SenseKind::Hearing | SenseKind::Echolocation)
    }
}

/// Precision of a sense. Only precise senses can produce `Observed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Acuity {
    Precise,
    #[default]
    Imprecise,
    Vague,
}

impl Acuity {
    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "precise" => Acuity::Precise,
            "vague" => Acuity::Vague,
            _ => Acuity::Imprecise,
        }
    }
}

/// One normalized sense line from a creature sheet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SenseEntry {
    pub kind: SenseKind,
    pub acuity: Acuity,
    /// Range in feet. `RANGE_UNLIMITED` for vision-tier senses without one.
    pub range: f32,
}

bitflags::bitflags! {
    /// Perception-relevant condition bits extracted from an actor document.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ConditionFlags: u8 {
        const BLINDED = 1 << 0;
        const DEAFENED = 1 << 1;
        const DAZZLED = 1 << 2;
    }
}

/// Illumination bands, from darkest to brightest.
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum LightLevel {
    Darkness = 0,
    Dim = 1,
    #[default]
    Bright = 2,
}

/// Illumination at a single point, including whether any darkness there is
/// magical and at what spell rank it was cast.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LightSample {
    pub level: LightLevel,
    pub magical_darkness: bool,
    pub darkness_rank: u8,
}

impl LightSample {
    pub fn bright() -> Self {
        LightSample {
            level: LightLevel::Bright,
            magical_darkness: false,
            darkness_rank: 0,
        }
    }

    pub fn dim() -> Self {
        LightSample {
            level: LightLevel::Dim,
            magical_darkness: false,
            darkness_rank: 0,
        }
    }

    pub fn darkness() -> Self {
        LightSample {
            level: LightLevel::Darkness,
            magical_darkness: false,
            darkness_rank: 0,
        }
    }

    pub fn magical_darkness(rank: u8) -> Self {
        LightSample {
            level: LightLevel::Darkness,
            magical_darkness: true,
            darkness_rank: rank,
        }
    }

    pub fn is_darkness(&self) -> bool {
        self.level == LightLevel::Darkness
    }
}

impl Default for LightSample {
    fn default() -> Self {
        LightSample::bright()
    }
}

/// How a wall treats a ray crossing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BlockMode {
    /// Does not interact with the ray at all.
    #[default]
    None = 0,
    /// A single crossing blocks.
    Normal = 1,
    /// Blocks only once a ray has crossed two distinct walls of this mode.
    Limited = 2,
}

impl BlockMode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => BlockMode::Normal,
            2 => BlockMode::Limited,
            _ => BlockMode::None,
        }
    }
}

/// Door state for wall segments that are doors. An open door never blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DoorState {
    #[default]
    NotADoor = 0,
    Closed = 1,
    Open = 2,
}

/// Which side of a one-way wall blocks. `Both` is the ordinary two-way wall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WallSide {
    #[default]
    Both = 0,
    Left = 1,
    Right = 2,
}

/// Flat record form of one visibility map entry. JSON object keys must be
/// strings, so the pair-keyed map serializes through a list of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityRecord {
    pub observer: u64,
    pub target: u64,
    pub state: u8,
}

/// Sparse per-pair visibility store. Pairs without an entry are `Observed`.
/// Manual overrides live beside computed states and always win on read.
#[derive(Debug, Clone, Default)]
pub struct VisibilityMatrix {
    states: AHashMap<(TokenId, TokenId), VisibilityState>,
    overrides: AHashMap<(TokenId, TokenId), VisibilityState>,
}

impl VisibilityMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Effective state for the ordered pair, override first, then computed,
    /// then the `Observed` default.
    pub fn state_between(&self, observer: TokenId, target: TokenId) -> VisibilityState {
        let key = (observer, target);
        self.overrides
            .get(&key)
            .or_else(|| self.states.get(&key))
            .copied()
            .unwrap_or_default()
    }

    pub fn has_override(&self, observer: TokenId, target: TokenId) -> bool {
        self.overrides.contains_key(&(observer, target))
    }

    /// Stores a computed state. Returns true when the effective state for the
    /// pair actually changed. Storing `Observed` clears the entry instead of
    /// keeping a default-valued record around.
    pub fn set_state(
        &mut self,
        observer: TokenId,
        target: TokenId,
        state: VisibilityState,
    ) -> bool {
        let before = self.state_between(observer, target);
        let key = (observer, target);
        if state == VisibilityState::Observed {
            self.states.remove(&key);
        } else {
            self.states.insert(key, state);
        }
        self.state_between(observer, target) != before
    }

    /// Pins an override for the pair. Overrides survive recomputation until
    /// explicitly cleared.
    pub fn set_override(&mut self, observer: TokenId, target: TokenId, state: VisibilityState) {
        self.overrides.insert((observer, target), state);
    }

    /// Removes an override. Returns true when one was present.
    pub fn clear_override(&mut self, observer: TokenId, target: TokenId) -> bool {
        self.overrides.remove(&(observer, target)).is_some()
    }

    /// Drops every record touching a token that no longer exists.
    pub fn retain_tokens(&mut self, alive: impl Fn(TokenId) -> bool) {
        self.states
            .retain(|(observer, target), _| alive(*observer) && alive(*target));
        self.overrides
            .retain(|(observer, target), _| alive(*observer) && alive(*target));
    }

    pub fn clear(&mut self) {
        self.states.clear();
        self.overrides.clear();
    }

    pub fn stored_len(&self) -> usize {
        self.states.len()
    }

    pub fn override_len(&self) -> usize {
        self.overrides.len()
    }

    /// Counts of stored non-default states as (concealed, hidden, undetected).
    pub fn count_by_state(&self) -> (usize, usize, usize) {
        let mut concealed = 0usize;
        let mut hidden = 0usize;
        let mut undetected = 0usize;
        for state in self.states.values() {
            match state {
                VisibilityState::Concealed => concealed += 1,
                VisibilityState::Hidden => hidden += 1,
                VisibilityState::Undetected => undetected += 1,
                VisibilityState::Observed => {}
            }
        }
        (concealed, hidden, undetected)
    }

    /// Flattens computed states into wire records. Overrides are intentionally
    /// excluded; they are host-side decorations, not computed results.
    pub fn to_records(&self) -> Vec<VisibilityRecord> {
        let mut records: Vec<VisibilityRecord> = self
            .states
            .iter()
            .map(|((observer, target), state)| VisibilityRecord {
                observer: observer.0,
                target: target.0,
                state: state.as_u8(),
            })
            .collect();
        records.sort_by_key(|record| (record.observer, record.target));
        records
    }

    pub fn from_records(records: &[VisibilityRecord]) -> Self {
        let mut matrix = VisibilityMatrix::new();
        for record in records {
            matrix.set_state(
                TokenId(record.observer),
                TokenId(record.target),
                VisibilityState::from_u8(record.state),
            );
        }
        matrix
    }
}

/// Lowercases and hyphenates a display name the way sheet item slugs are
/// written, so "Greater Darkvision" matches the slug "greater-darkvision".
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_was_hyphen = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}
