//! Field-level merge of a client patch into block metadata.

use serde_json::{Map, Value};

use dayplan_db::models::{BlockMetadata, BlockRole};

use crate::error::PlanError;

/// Keys that identify the owner or the row; never accepted from clients.
const IDENTITY_KEYS: &[&str] = &["id", "user_id", "userId", "plan_id", "planId"];

/// Keys the scheduler owns.
const RESERVED_KEYS: &[&str] = &["role", "chain_view_only"];

const GATE_CONDITIONS: &str = "gate_conditions";

/// Merge `patch` into `metadata`.
///
/// Unknown keys merge shallowly into `extra`, a `null` value removes a
/// key, and `gate_conditions` replaces the checklist of an exit-gate
/// block. Nothing is modified when the patch is rejected.
pub fn merge_metadata_patch(metadata: &mut BlockMetadata, patch: &Value) -> Result<(), PlanError> {
    let Value::Object(fields) = patch else {
        return Err(PlanError::InvalidMetadataPatch(
            "patch must be a JSON object".to_owned(),
        ));
    };
    if let Some(key) = find_identity_key(fields) {
        return Err(PlanError::IdentityFieldRejected(key));
    }
    if let Some(key) = fields.keys().find(|k| RESERVED_KEYS.contains(&k.as_str())) {
        return Err(PlanError::InvalidMetadataPatch(format!(
            "{key:?} is managed by the scheduler"
        )));
    }

    let gate_update = match fields.get(GATE_CONDITIONS) {
        None => None,
        Some(value) => Some(parse_gate_conditions(&metadata.role, value)?),
    };

    if let (Some(conditions), BlockRole::ExitGate { gate_conditions, .. }) =
        (gate_update, &mut metadata.role)
    {
        *gate_conditions = conditions;
    }
    for (key, value) in fields {
        if key == GATE_CONDITIONS {
            continue;
        }
        if value.is_null() {
            metadata.extra.remove(key);
        } else {
            metadata.extra.insert(key.clone(), value.clone());
        }
    }
    Ok(())
}

/// Identity keys at any depth of the patch.
fn find_identity_key(fields: &Map<String, Value>) -> Option<String> {
    for (key, value) in fields {
        if IDENTITY_KEYS.contains(&key.as_str()) {
            return Some(key.clone());
        }
        let nested = match value {
            Value::Object(inner) => find_identity_key(inner),
            Value::Array(items) => items.iter().find_map(|item| match item {
                Value::Object(inner) => find_identity_key(inner),
                _ => None,
            }),
            _ => None,
        };
        if nested.is_some() {
            return nested;
        }
    }
    None
}

fn parse_gate_conditions(role: &BlockRole, value: &Value) -> Result<Vec<String>, PlanError> {
    if !matches!(role, BlockRole::ExitGate { .. }) {
        return Err(PlanError::InvalidMetadataPatch(
            "gate_conditions only apply to exit-gate blocks".to_owned(),
        ));
    }
    if value.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(value.clone()).map_err(|_| {
        PlanError::InvalidMetadataPatch("gate_conditions must be a list of strings".to_owned())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exit_gate() -> BlockMetadata {
        BlockMetadata::with_role(
            BlockRole::ExitGate {
                chain_id: "chain-a".into(),
                step_id: "chain-a-travel-there".into(),
                anchor_id: "a".into(),
                is_required: true,
                can_skip_when_late: false,
                gate_conditions: vec!["keys".into()],
            },
            true,
        )
    }

    #[test]
    fn merges_without_clobbering_siblings() {
        let mut meta = BlockMetadata::plain();
        meta.extra.insert("note".into(), json!("bring charger"));
        merge_metadata_patch(&mut meta, &json!({"mood": "focused"})).unwrap();
        assert_eq!(meta.extra["note"], json!("bring charger"));
        assert_eq!(meta.extra["mood"], json!("focused"));
    }

    #[test]
    fn null_removes_key() {
        let mut meta = BlockMetadata::plain();
        meta.extra.insert("note".into(), json!("x"));
        merge_metadata_patch(&mut meta, &json!({"note": null})).unwrap();
        assert!(!meta.extra.contains_key("note"));
    }

    #[test]
    fn rejects_identity_fields_anywhere() {
        let mut meta = BlockMetadata::plain();
        for patch in [
            json!({"user_id": "mallory"}),
            json!({"plan_id": "x"}),
            json!({"nested": {"userId": "mallory"}}),
            json!({"list": [{"id": 1}]}),
        ] {
            let err = merge_metadata_patch(&mut meta, &patch).unwrap_err();
            assert_eq!(err.code(), "IDENTITY_FIELD_REJECTED", "{patch}");
        }
        assert!(meta.extra.is_empty());
    }

    #[test]
    fn rejects_reserved_and_non_objects() {
        let mut meta = BlockMetadata::plain();
        for patch in [json!({"role": {"type": "plain"}}), json!({"chain_view_only": true}), json!([1, 2]), json!("x")] {
            let err = merge_metadata_patch(&mut meta, &patch).unwrap_err();
            assert_eq!(err.code(), "INVALID_METADATA_PATCH", "{patch}");
        }
    }

    #[test]
    fn gate_conditions_on_exit_gate() {
        let mut meta = exit_gate();
        merge_metadata_patch(&mut meta, &json!({"gate_conditions": ["keys", "umbrella"], "note": "rain"}))
            .unwrap();
        let BlockRole::ExitGate { gate_conditions, .. } = &meta.role else {
            panic!("role changed");
        };
        assert_eq!(gate_conditions, &vec!["keys".to_owned(), "umbrella".to_owned()]);
        assert_eq!(meta.extra["note"], json!("rain"));
        assert!(!meta.extra.contains_key(GATE_CONDITIONS));
    }

    #[test]
    fn gate_conditions_rejected_elsewhere() {
        let mut meta = BlockMetadata::plain();
        let err = merge_metadata_patch(&mut meta, &json!({"gate_conditions": ["keys"]})).unwrap_err();
        assert_eq!(err.code(), "INVALID_METADATA_PATCH");

        let mut meta = exit_gate();
        let err = merge_metadata_patch(&mut meta, &json!({"gate_conditions": [1]})).unwrap_err();
        assert_eq!(err.code(), "INVALID_METADATA_PATCH");
    }
}
