use crate::error::CardSection;
use crate::feeder_config::FeederConfig;
use crate::formula::Formula;
use crate::mapping_resolver::{resolve_with_issues, CardMappingSide, MetricSlot};
use crate::register_store::FeederSnapshots;
use crate::value_formatter::{format_value, ERROR_MARKER, PLACEHOLDER};
use serde_derive::{Deserialize, Serialize};

/// One rendered cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayValue {
    pub label: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplaySide {
    pub title: String,
    pub slots: Vec<DisplayValue>,
}

/// Both sections of a feeder card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeederCard {
    pub feeder_id: String,
    pub name: String,
    pub top: DisplaySide,
    pub bottom: DisplaySide,
}

/// Computes one card section from the current snapshots. Pure; call again whenever
/// a snapshot or the mapping changes.
pub fn build_side(snapshots: &FeederSnapshots, side: &CardMappingSide) -> DisplaySide {
    DisplaySide {
        title: side.title(),
        slots: side
            .visible_slots()
            .iter()
            .map(|slot| DisplayValue {
                label: slot.label.clone(),
                text: slot_text(snapshots, slot),
            })
            .collect(),
    }
}

fn slot_text(snapshots: &FeederSnapshots, slot: &MetricSlot) -> String {
    let address = match slot.source_address {
        Some(address) if slot.enabled => address,
        _ => return PLACEHOLDER.to_string(),
    };
    let Some(register) = snapshots
        .get(slot.source_equipment)
        .and_then(|snapshot| snapshot.find(address))
    else {
        return ERROR_MARKER.to_string();
    };
    let value = Formula::parse(&slot.formula)
        .and_then(|formula| formula.eval(register.raw_value as f64))
        .ok();
    format_value(value)
}

/// Resolves the feeder's mapping and builds both sections of its card.
pub fn build_card(feeder: &FeederConfig, snapshots: &FeederSnapshots) -> FeederCard {
    let (mapping, issues) = resolve_with_issues(&feeder.mapping);
    for issue in &issues {
        tracing::debug!(feeder = %feeder.id, %issue, "mapping normalized");
    }
    FeederCard {
        feeder_id: feeder.id.clone(),
        name: feeder.name.clone(),
        top: build_side(snapshots, mapping.side(CardSection::Top)),
        bottom: build_side(snapshots, mapping.side(CardSection::Bottom)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping_resolver::resolve;
    use crate::register_reader::to_raw_registers;
    use crate::register_store::RegisterSnapshot;
    use serde_json::json;
    use std::time::SystemTime;

    fn snapshot(start: u16, words: &[u16]) -> RegisterSnapshot {
        RegisterSnapshot {
            registers: to_raw_registers(start, words),
            sequence: 1,
            read_at: SystemTime::now(),
        }
    }

    fn relay_snapshots() -> FeederSnapshots {
        FeederSnapshots {
            relay: Some(snapshot(100, &[10, 20, 30])),
            analyzer: None,
        }
    }

    #[test]
    fn test_enabled_slot_applies_formula() {
        let mapping = resolve(&json!({
            "top": {
                "titleId": "corrente",
                "slotCount": 1,
                "slots": [{ "enabled": true, "label": "Ia", "sourceAddress": 101, "formula": "x*2" }]
            }
        }));
        let side = build_side(&relay_snapshots(), &mapping.top);

        assert_eq!(side.title, "Corrente");
        assert_eq!(
            side.slots,
            vec![DisplayValue {
                label: "Ia".to_string(),
                text: "40,00".to_string()
            }]
        );
    }

    #[test]
    fn test_missing_address_in_snapshot_is_error() {
        let mapping = resolve(&json!({
            "top": { "slotCount": 1, "slots": [{ "enabled": true, "sourceAddress": 999 }] }
        }));
        let side = build_side(&relay_snapshots(), &mapping.top);
        assert_eq!(side.slots[0].text, ERROR_MARKER);
    }

    #[test]
    fn test_slot_states_are_independent() {
        let mapping = resolve(&json!({
            "bottom": {
                "slotCount": 4,
                "slots": [
                    { "enabled": false, "sourceAddress": 100 },
                    { "enabled": true, "label": "broken", "sourceAddress": 100, "formula": "x/0" },
                    { "enabled": true, "label": "no address" },
                    { "enabled": true, "label": "raw", "sourceAddress": 102 }
                ]
            }
        }));
        let side = build_side(&relay_snapshots(), &mapping.bottom);
        let texts: Vec<&str> = side.slots.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec![PLACEHOLDER, ERROR_MARKER, PLACEHOLDER, "30,00"]);
    }

    #[test]
    fn test_slot_reads_its_own_equipment() {
        let mapping = resolve(&json!({
            "top": {
                "slotCount": 2,
                "slots": [
                    { "enabled": true, "sourceAddress": 5, "sourceEquipment": "analyzer", "formula": "x / 10" },
                    { "enabled": true, "sourceAddress": 5 }
                ]
            }
        }));
        let snapshots = FeederSnapshots {
            relay: None,
            analyzer: Some(snapshot(0, &[0, 0, 0, 0, 0, 2305])),
        };
        let side = build_side(&snapshots, &mapping.top);
        assert_eq!(side.slots[0].text, "230,50");
        // No relay snapshot yet.
        assert_eq!(side.slots[1].text, ERROR_MARKER);
    }

    #[test]
    fn test_build_card_uses_slot_count() {
        let feeder = FeederConfig {
            id: "AL-01".to_string(),
            name: "Alimentador 1".to_string(),
            mapping: json!({
                "top": { "slotCount": 7 },
                "bottom": { "slotCount": 0, "titleId": "custom", "customTitle": " Reserva " }
            }),
            ..Default::default()
        };
        let card = build_card(&feeder, &FeederSnapshots::default());

        assert_eq!(card.top.slots.len(), 4);
        assert!(card.top.slots.iter().all(|s| s.text == PLACEHOLDER));
        assert_eq!(card.bottom.slots.len(), 1);
        assert_eq!(card.bottom.title, "Reserva");
        assert_eq!(card.feeder_id, "AL-01");
    }
}
