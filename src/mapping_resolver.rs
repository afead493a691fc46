//! Normalization of user-configured card mappings.
//!
//! Whatever the configuration store persisted is merged over a canonical
//! skeleton, so mappings saved by older versions (or half-filled by an editor)
//! always come out complete. Resolving is idempotent.

use crate::error::{CardSection, MappingIssue};
use crate::feeder_config::{number_from_value, EquipmentClass};
use serde_derive::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Version stamped on every resolved mapping.
///
/// Version 1 mappings had no `sourceEquipment` per slot; they resolve to `relay`.
pub const MAPPING_SCHEMA_VERSION: u32 = 2;
pub const SLOTS_PER_SECTION: usize = 4;
pub const DEFAULT_SLOT_COUNT: usize = SLOTS_PER_SECTION;
pub const CUSTOM_TITLE_ID: &str = "custom";

const TITLES: &[(&str, &str)] = &[
    ("potencia", "Potência"),
    ("corrente", "Corrente"),
    ("tensao", "Tensão"),
    ("energia", "Energia"),
    ("frequencia", "Frequência"),
    ("fator_potencia", "Fator de Potência"),
];

/// Display title for a title id, empty when unknown.
pub fn title_for(title_id: &str) -> &'static str {
    TITLES
        .iter()
        .find(|(id, _)| *id == title_id)
        .map_or("", |(_, title)| title)
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSlot {
    pub enabled: bool,
    pub label: String,
    pub source_address: Option<u16>,
    pub source_equipment: EquipmentClass,
    pub formula: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardMappingSide {
    pub title_id: String,
    pub custom_title: String,
    /// Always within `1..=SLOTS_PER_SECTION`.
    pub slot_count: usize,
    /// Always exactly `SLOTS_PER_SECTION` entries.
    pub slots: Vec<MetricSlot>,
}

impl Default for CardMappingSide {
    fn default() -> Self {
        Self {
            title_id: String::new(),
            custom_title: String::new(),
            slot_count: DEFAULT_SLOT_COUNT,
            slots: vec![MetricSlot::default(); SLOTS_PER_SECTION],
        }
    }
}

impl CardMappingSide {
    pub fn title(&self) -> String {
        if self.title_id == CUSTOM_TITLE_ID {
            self.custom_title.trim().to_string()
        } else {
            title_for(&self.title_id).to_string()
        }
    }

    /// The first `slot_count` slots, the ones shown on the card.
    pub fn visible_slots(&self) -> &[MetricSlot] {
        &self.slots[..self.slot_count.min(self.slots.len())]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardMapping {
    pub schema_version: u32,
    pub top: CardMappingSide,
    pub bottom: CardMappingSide,
}

impl Default for CardMapping {
    fn default() -> Self {
        Self {
            schema_version: MAPPING_SCHEMA_VERSION,
            top: CardMappingSide::default(),
            bottom: CardMappingSide::default(),
        }
    }
}

impl CardMapping {
    pub fn side(&self, section: CardSection) -> &CardMappingSide {
        match section {
            CardSection::Top => &self.top,
            CardSection::Bottom => &self.bottom,
        }
    }
}

/// Normalizes a persisted mapping, dropping the list of corrections made.
pub fn resolve(raw: &Value) -> CardMapping {
    resolve_with_issues(raw).0
}

/// Normalizes a persisted mapping and reports every correction made on the way.
pub fn resolve_with_issues(raw: &Value) -> (CardMapping, Vec<MappingIssue>) {
    let mut issues = Vec::new();
    let mut merged = skeleton();
    match raw {
        Value::Null => {}
        Value::Object(_) => deep_merge(&mut merged, raw),
        _ => issues.push(MappingIssue::NotAnObject),
    }

    let top = resolve_side(CardSection::Top, &merged["top"], &mut issues);
    let bottom = resolve_side(CardSection::Bottom, &merged["bottom"], &mut issues);
    let mapping = CardMapping {
        schema_version: MAPPING_SCHEMA_VERSION,
        top,
        bottom,
    };
    (mapping, issues)
}

fn skeleton() -> Value {
    let slot = json!({
        "enabled": false,
        "label": "",
        "sourceAddress": null,
        "sourceEquipment": "relay",
        "formula": "",
    });
    let side = json!({
        "titleId": "",
        "customTitle": "",
        "slotCount": DEFAULT_SLOT_COUNT,
        "slots": vec![slot; SLOTS_PER_SECTION],
    });
    json!({
        "schemaVersion": MAPPING_SCHEMA_VERSION,
        "top": side.clone(),
        "bottom": side,
    })
}

/// Overlays `overlay` onto `base`. Objects merge key-wise, arrays index-wise
/// (never growing `base`), nulls leave `base` untouched, anything else replaces.
fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (Value::Array(base), Value::Array(overlay)) => {
            for (existing, value) in base.iter_mut().zip(overlay) {
                deep_merge(existing, value);
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

fn resolve_side(section: CardSection, raw: &Value, issues: &mut Vec<MappingIssue>) -> CardMappingSide {
    let empty = Map::new();
    let raw = raw.as_object().unwrap_or(&empty);

    let mut title_id = text(raw.get("titleId"));
    let custom_title = raw
        .get("customTitle")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if !title_id.is_empty() && title_id != CUSTOM_TITLE_ID && title_for(&title_id).is_empty() {
        issues.push(MappingIssue::UnknownTitle {
            section,
            title_id: std::mem::take(&mut title_id),
        });
    }

    let slot_count = match raw.get("slotCount").and_then(number_from_value) {
        Some(count) => {
            let clamped = count.floor().clamp(1.0, SLOTS_PER_SECTION as f64) as usize;
            if count != clamped as f64 {
                issues.push(MappingIssue::SlotCountClamped {
                    section,
                    from: count,
                    to: clamped,
                });
            }
            clamped
        }
        None => {
            issues.push(MappingIssue::InvalidSlotCount { section });
            DEFAULT_SLOT_COUNT
        }
    };

    let raw_slots = raw.get("slots").and_then(Value::as_array);
    let slots = (0..SLOTS_PER_SECTION)
        .map(|index| {
            let slot = raw_slots.and_then(|slots| slots.get(index));
            resolve_slot(section, index, slot, issues)
        })
        .collect();

    CardMappingSide {
        title_id,
        custom_title,
        slot_count,
        slots,
    }
}

fn resolve_slot(
    section: CardSection,
    index: usize,
    raw: Option<&Value>,
    issues: &mut Vec<MappingIssue>,
) -> MetricSlot {
    let Some(raw) = raw.and_then(Value::as_object) else {
        return MetricSlot::default();
    };

    let source_address = match raw.get("sourceAddress") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(value) => {
            let address = number_from_value(value)
                .filter(|n| n.fract() == 0.0 && (0.0..=u16::MAX as f64).contains(n))
                .map(|n| n as u16);
            if address.is_none() {
                issues.push(MappingIssue::InvalidSourceAddress {
                    section,
                    slot: index,
                });
            }
            address
        }
    };

    let equipment = text(raw.get("sourceEquipment"));
    let source_equipment = EquipmentClass::parse(&equipment).unwrap_or_else(|| {
        if !equipment.is_empty() {
            issues.push(MappingIssue::UnknownEquipment {
                section,
                slot: index,
                value: equipment.clone(),
            });
        }
        EquipmentClass::Relay
    });

    let mut formula = text(raw.get("formula"));
    if formula.is_empty() {
        formula = text(raw.get("formulaExpression"));
    }

    MetricSlot {
        enabled: raw.get("enabled").and_then(Value::as_bool).unwrap_or(false),
        label: text(raw.get("label")),
        source_address,
        source_equipment,
        formula,
    }
}

fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}
