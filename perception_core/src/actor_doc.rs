//! Read-only adapter over host actor documents.
//!
//! Hosts hand us actor sheets as loosely shaped JSON. Every lookup the
//! pipeline performs against that JSON goes through this adapter and returns
//! an `Option` or a closed-world default, so a malformed or partial sheet
//! degrades to "sense absent" / "condition inactive" instead of failing the
//! batch.

use perception_schema::slugify;
use serde_json::Value;

/// Flag namespace this pipeline owns on actor documents.
pub const FLAG_SCOPE: &str = "umbra";

const ECHOLOCATION_EFFECT_SLUG: &str = "effect-echolocation";
const SILENCE_EFFECT_SLUG: &str = "effect-silence";

/// One sense line as declared on the sheet, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSense {
    pub slug: String,
    pub acuity: Option<String>,
    pub range: Option<f32>,
}

/// Wrapper around a raw actor document.
#[derive(Debug, Clone, Default)]
pub struct ActorDoc {
    raw: Value,
}

impl ActorDoc {
    pub fn new(raw: Value) -> Self {
        Self { raw }
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self {
            raw: serde_json::from_str(json)?,
        })
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// The actor category, e.g. "character", "npc", "loot", "hazard".
    pub fn actor_type(&self) -> Option<&str> {
        self.raw.get("type").and_then(Value::as_str)
    }

    fn system(&self) -> Option<&Value> {
        self.raw.get("system")
    }

    fn items(&self) -> Option<&Vec<Value>> {
        self.raw.get("items").and_then(Value::as_array)
    }

    /// Whether the creature has ordinary sight at all. Sheets that do not
    /// say default to sighted.
    pub fn has_vision(&self) -> bool {
        self.system()
            .and_then(|system| system.get("perception"))
            .and_then(|perception| perception.get("vision"))
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    /// Declared sense lines in whichever of the two sheet shapes is present:
    /// an array of `{type, acuity, range}` objects under
    /// `system.perception.senses`, or a map of slug to details under
    /// `system.traits.senses`.
    pub fn raw_senses(&self) -> Vec<RawSense> {
        let Some(system) = self.system() else {
            return Vec::new();
        };

        let declared = system
            .get("perception")
            .and_then(|perception| perception.get("senses"))
            .or_else(|| system.get("traits").and_then(|traits| traits.get("senses")));

        match declared {
            Some(Value::Array(entries)) => entries.iter().filter_map(raw_sense_from_entry).collect(),
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(slug, details)| raw_sense_from_map_entry(slug, details))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Checks a condition through every shape hosts store them in: a direct
    /// map entry, a slug list, then condition items. Absent everywhere means
    /// inactive.
    pub fn condition_active(&self, slug: &str) -> bool {
        if let Some(conditions) = self.system().and_then(|system| system.get("conditions")) {
            match conditions {
                Value::Object(map) => {
                    if let Some(entry) = map.get(slug) {
                        return match entry {
                            Value::Bool(active) => *active,
                            Value::Object(details) => details
                                .get("active")
                                .and_then(Value::as_bool)
                                .unwrap_or(true),
                            Value::Null => false,
                            _ => true,
                        };
                    }
                }
                Value::Array(list) => {
                    if list
                        .iter()
                        .filter_map(Value::as_str)
                        .any(|entry| entry == slug)
                    {
                        return true;
                    }
                }
                _ => {}
            }
        }

        self.has_item_with_slug("condition", slug)
    }

    /// Scans embedded items for one of the given type carrying the slug,
    /// falling back to a slugified item name when no slug field is present.
    pub fn has_item_with_slug(&self, item_type: &str, slug: &str) -> bool {
        let Some(items) = self.items() else {
            return false;
        };
        items.iter().any(|item| {
            item.get("type").and_then(Value::as_str) == Some(item_type)
                && item_slug(item).as_deref() == Some(slug)
        })
    }

    /// Slugs of every feat item on the sheet.
    pub fn feat_slugs(&self) -> Vec<String> {
        let Some(items) = self.items() else {
            return Vec::new();
        };
        items
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("feat"))
            .filter_map(item_slug)
            .collect()
    }

    /// Reads a boolean out of this pipeline's flag scope.
    pub fn flag_bool(&self, key: &str) -> Option<bool> {
        self.scoped_flag(key).and_then(Value::as_bool)
    }

    pub fn flag_f32(&self, key: &str) -> Option<f32> {
        self.scoped_flag(key)
            .and_then(Value::as_f64)
            .map(|value| value as f32)
    }

    fn scoped_flag(&self, key: &str) -> Option<&Value> {
        self.raw
            .get("flags")
            .and_then(|flags| flags.get(FLAG_SCOPE))
            .and_then(|scope| scope.get(key))
    }

    /// Whether echolocation is currently switched on. The effect item is the
    /// source of truth; the legacy boolean flag is honored for sheets that
    /// predate the item.
    pub fn echolocation_active(&self) -> bool {
        self.has_item_with_slug("effect", ECHOLOCATION_EFFECT_SLUG)
            || self.flag_bool("echolocation").unwrap_or(false)
    }

    /// Flag-supplied echolocation range, for sheets using the legacy flag.
    pub fn echolocation_range_override(&self) -> Option<f32> {
        self.flag_f32("echolocationRange")
    }

    /// Whether a silence effect suppresses all sound around this actor.
    pub fn silence_active(&self) -> bool {
        self.has_item_with_slug("effect", SILENCE_EFFECT_SLUG)
    }

    /// Whether the token is mid-Sneak and its visibility states are pinned.
    pub fn sneak_active(&self) -> bool {
        self.flag_bool("sneakActive").unwrap_or(false)
    }

    /// Dead or at zero hit points. Sheets without hit points (hazards, loot)
    /// are never defeated by this test.
    pub fn defeated(&self) -> bool {
        if self.condition_active("dead") {
            return true;
        }
        self.system()
            .and_then(|system| system.get("attributes"))
            .and_then(|attributes| attributes.get("hp"))
            .and_then(|hp| hp.get("value"))
            .and_then(Value::as_f64)
            .map(|value| value <= 0.0)
            .unwrap_or(false)
    }
}

fn raw_sense_from_entry(entry: &Value) -> Option<RawSense> {
    let slug = entry
        .get("type")
        .or_else(|| entry.get("slug"))
        .and_then(Value::as_str)?;
    Some(RawSense {
        slug: slug.to_string(),
        acuity: entry
            .get("acuity")
            .and_then(Value::as_str)
            .map(str::to_string),
        range: entry
            .get("range")
            .and_then(Value::as_f64)
            .map(|range| range as f32),
    })
}

fn raw_sense_from_map_entry(slug: &str, details: &Value) -> Option<RawSense> {
    match details {
        Value::Object(_) => Some(RawSense {
            slug: slug.to_string(),
            acuity: details
                .get("acuity")
                .and_then(Value::as_str)
                .map(str::to_string),
            range: details
                .get("range")
                .or_else(|| details.get("value"))
                .and_then(Value::as_f64)
                .map(|range| range as f32),
        }),
        Value::Number(range) => Some(RawSense {
            slug: slug.to_string(),
            acuity: None,
            range: range.as_f64().map(|value| value as f32),
        }),
        Value::Null => None,
        _ => Some(RawSense {
            slug: slug.to_string(),
            acuity: None,
            range: None,
        }),
    }
}

fn item_slug(item: &Value) -> Option<String> {
    if let Some(slug) = item
        .get("system")
        .and_then(|system| system.get("slug"))
        .and_then(Value::as_str)
    {
        return Some(slug.to_string());
    }
    if let Some(slug) = item.get("slug").and_then(Value::as_str) {
        return Some(slug.to_string());
    }
    item.get("name")
        .and_then(Value::as_str)
        .map(slugify)
        .filter(|slug| !slug.is_empty())
}
