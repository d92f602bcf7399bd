//! JSON-Patch admission: well-formedness checks, reserved-path rejection,
//! and application against the memory blocks.
//!
//! The accepted dialect is the RFC 6902 subset
//! `add/remove/replace/move/copy/test`, with `from` required for move/copy
//! and `value` required for add/replace/test. Patches address `blocks`
//! directly; the top-level `/version` and `/updated_at` names are reserved
//! for the engine and may not appear as an operation target.

use json_patch::Patch;
use serde_json::Value;

use crate::error::VaultError;
use crate::model::RESERVED_BLOCK_KEYS;

/// Operation targets the engine refuses to touch.
pub const RESERVED_PATCH_PATHS: [&str; 2] = ["/version", "/updated_at"];

const KNOWN_OPS: [&str; 6] = ["add", "remove", "replace", "move", "copy", "test"];

/// Validates structure and reserved paths, returning the parsed patch.
///
/// # Errors
///
/// Returns [`VaultError::BadRequest`] for anything that is not a well-formed
/// JSON-Patch array in the accepted dialect, or that names a reserved path.
pub fn parse_patch(raw: &Value) -> Result<Patch, VaultError> {
    let ops = raw
        .as_array()
        .ok_or_else(|| VaultError::bad_request("patch must be a JSON array"))?;

    for (index, op) in ops.iter().enumerate() {
        let obj = op.as_object().ok_or_else(|| {
            VaultError::bad_request(format!("patch op {index} must be an object"))
        })?;

        let op_name = obj
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| VaultError::bad_request(format!("patch op {index} is missing 'op'")))?;
        if !KNOWN_OPS.contains(&op_name) {
            return Err(VaultError::bad_request(format!(
                "patch op {index} has unsupported op {op_name:?}"
            )));
        }

        let path = obj.get("path").and_then(Value::as_str).ok_or_else(|| {
            VaultError::bad_request(format!("patch op {index} is missing 'path'"))
        })?;
        check_reserved(index, path)?;

        if matches!(op_name, "move" | "copy") {
            let from = obj.get("from").and_then(Value::as_str).ok_or_else(|| {
                VaultError::bad_request(format!("patch op {index} ({op_name}) requires 'from'"))
            })?;
            check_reserved(index, from)?;
        }

        if matches!(op_name, "add" | "replace" | "test") && !obj.contains_key("value") {
            return Err(VaultError::bad_request(format!(
                "patch op {index} ({op_name}) requires 'value'"
            )));
        }
    }

    // The structural pass above does not validate pointer syntax; the typed
    // parse does.
    serde_json::from_value(raw.clone())
        .map_err(|e| VaultError::bad_request(format!("malformed JSON-Patch: {e}")))
}

fn check_reserved(index: usize, pointer: &str) -> Result<(), VaultError> {
    if RESERVED_PATCH_PATHS.contains(&pointer) {
        return Err(VaultError::bad_request(format!(
            "patch op {index} targets reserved path {pointer}"
        )));
    }
    Ok(())
}

/// Applies `patch` to a deep copy of `blocks` and enforces the post-patch
/// shape.
///
/// # Errors
///
/// Returns [`VaultError::PatchApply`] when an operation fails against the
/// document (missing path, failed `test`, and so on) or when a reserved
/// block key is no longer present afterwards.
pub fn apply_to_blocks(blocks: &Value, patch: &Patch) -> Result<Value, VaultError> {
    let mut next = blocks.clone();
    json_patch::patch(&mut next, patch)
        .map_err(|e| VaultError::PatchApply(e.to_string()))?;
    ensure_blocks_shape(&next)?;
    Ok(next)
}

/// Requires `blocks` to be an object that still carries every reserved key.
///
/// # Errors
///
/// Returns [`VaultError::PatchApply`] on a shape violation.
pub fn ensure_blocks_shape(blocks: &Value) -> Result<(), VaultError> {
    let obj = blocks
        .as_object()
        .ok_or_else(|| VaultError::PatchApply("blocks must be a JSON object".to_string()))?;
    for key in RESERVED_BLOCK_KEYS {
        if !obj.contains_key(key) {
            return Err(VaultError::PatchApply(format!(
                "reserved block {key:?} must remain present"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;
    use crate::model::Memory;

    fn blocks() -> Value {
        Memory::initial("2026-01-01T00:00:00.000Z").blocks
    }

    #[test]
    fn accepts_all_six_ops() {
        let patch = json!([
            {"op": "add", "path": "/identity/name", "value": "Alice"},
            {"op": "replace", "path": "/identity/name", "value": "Bob"},
            {"op": "copy", "from": "/identity/name", "path": "/identity/alias"},
            {"op": "move", "from": "/identity/alias", "path": "/identity/aka"},
            {"op": "test", "path": "/identity/aka", "value": "Bob"},
            {"op": "remove", "path": "/identity/aka"},
        ]);
        let parsed = parse_patch(&patch).unwrap();
        let next = apply_to_blocks(&blocks(), &parsed).unwrap();
        assert_eq!(next["identity"], json!({"name": "Bob"}));
    }

    #[test]
    fn rejects_non_array_patch() {
        let err = parse_patch(&json!({"op": "add"})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn rejects_unknown_op() {
        let err = parse_patch(&json!([{"op": "merge", "path": "/x", "value": 1}])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn rejects_missing_value_for_add_replace_test() {
        for op in ["add", "replace", "test"] {
            let err = parse_patch(&json!([{"op": op, "path": "/x"}])).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::BadRequest, "op {op}");
        }
    }

    #[test]
    fn rejects_missing_from_for_move_copy() {
        for op in ["move", "copy"] {
            let err = parse_patch(&json!([{"op": op, "path": "/x"}])).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::BadRequest, "op {op}");
        }
    }

    #[test]
    fn rejects_reserved_paths() {
        for path in RESERVED_PATCH_PATHS {
            let err =
                parse_patch(&json!([{"op": "replace", "path": path, "value": 9}])).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::BadRequest, "path {path}");
        }
        let err = parse_patch(
            &json!([{"op": "copy", "from": "/version", "path": "/identity/v"}]),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn rejects_invalid_pointer_syntax() {
        let err =
            parse_patch(&json!([{"op": "add", "path": "no-slash", "value": 1}])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn missing_target_is_patch_apply() {
        let parsed = parse_patch(&json!([
            {"op": "replace", "path": "/identity/absent", "value": 1}
        ]))
        .unwrap();
        let err = apply_to_blocks(&blocks(), &parsed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PatchApply);
    }

    #[test]
    fn failed_test_is_patch_apply() {
        let parsed = parse_patch(&json!([
            {"op": "add", "path": "/identity/name", "value": "Alice"},
            {"op": "test", "path": "/identity/name", "value": "Mallory"},
        ]))
        .unwrap();
        let err = apply_to_blocks(&blocks(), &parsed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PatchApply);
    }

    #[test]
    fn removing_a_reserved_block_is_patch_apply() {
        let parsed = parse_patch(&json!([{"op": "remove", "path": "/rules"}])).unwrap();
        let err = apply_to_blocks(&blocks(), &parsed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PatchApply);
    }

    #[test]
    fn replacing_whole_document_must_keep_shape() {
        let parsed =
            parse_patch(&json!([{"op": "replace", "path": "", "value": {"identity": {}}}]))
                .unwrap();
        let err = apply_to_blocks(&blocks(), &parsed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PatchApply);
    }

    #[test]
    fn extra_top_level_keys_are_allowed() {
        let parsed =
            parse_patch(&json!([{"op": "add", "path": "/scratch", "value": [1, 2, 3]}])).unwrap();
        let next = apply_to_blocks(&blocks(), &parsed).unwrap();
        assert_eq!(next["scratch"], json!([1, 2, 3]));
    }

    #[test]
    fn application_does_not_mutate_the_input() {
        let original = blocks();
        let parsed =
            parse_patch(&json!([{"op": "add", "path": "/identity/name", "value": "A"}])).unwrap();
        let _ = apply_to_blocks(&original, &parsed).unwrap();
        assert_eq!(original, blocks());
    }
}
