//! Merging module documents into a base world document.
//!
//! A module is a partial world document: some nodes, maybe a start or a new
//! faction. Merging folds every module's nodes, starts, factions, advanced
//! tags, and tag aliases into the base, then runs the merged result through
//! the normal content load so nothing invalid is ever written out.
//!
//! Nodes may be authored as an object keyed by id or as a list of entries
//! carrying an `id` field. Node ids must be globally unique; catalogs
//! deduplicate; aliases may repeat only with an identical mapping.

use patchwork_core::{ContentError, WorldModel};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from module merging.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("base world: {0}")]
    Base(String),

    #[error("{module}: {reason}")]
    Module { module: String, reason: String },

    #[error("merged world failed validation: {0}")]
    Invalid(#[from] ContentError),
}

fn module_error(module: &str, reason: impl Into<String>) -> MergeError {
    MergeError::Module {
        module: module.to_string(),
        reason: reason.into(),
    }
}

// ============================================================================
// Directory driver
// ============================================================================

/// Merge every `*.json` module under `modules_dir` (in name order) into the
/// base document at `base_path`. The merged document has passed full content
/// validation when this returns; the number of merged modules rides along.
pub fn merge_from_dir(base_path: &Path, modules_dir: &Path) -> Result<(Value, usize), MergeError> {
    let mut base = read_json(base_path)?;

    let mut module_files: Vec<PathBuf> = fs::read_dir(modules_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    module_files.sort();

    for path in &module_files {
        let module = read_json(path)?;
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("module")
            .to_string();
        merge_document(&mut base, &module, &name)?;
        tracing::debug!(module = %name, "merged");
    }

    WorldModel::load_str(&serde_json::to_string(&base)?)?;
    Ok((base, module_files.len()))
}

fn read_json(path: &Path) -> Result<Value, MergeError> {
    let content = fs::read_to_string(path).map_err(|source| MergeError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| MergeError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

// ============================================================================
// Document merge
// ============================================================================

/// Fold one module document into the base document.
pub fn merge_document(base: &mut Value, module: &Value, name: &str) -> Result<(), MergeError> {
    let nodes = module_nodes(module, name)?;
    let base_nodes = object_entry(base, "nodes")?;
    for (id, payload) in nodes {
        if base_nodes.contains_key(&id) {
            return Err(module_error(
                name,
                format!("node '{id}' already exists in the base world"),
            ));
        }
        base_nodes.insert(id, payload);
    }

    if let Some(starts) = module.get("starts") {
        let starts = starts
            .as_array()
            .ok_or_else(|| module_error(name, "'starts' must be a list"))?
            .clone();
        array_entry(base, "starts")?.extend(starts);
    }

    for key in ["factions", "advanced_tags"] {
        let Some(values) = module.get(key) else {
            continue;
        };
        let values = values
            .as_array()
            .ok_or_else(|| module_error(name, format!("'{key}' must be a list")))?
            .clone();
        let target = array_entry(base, key)?;
        for value in values {
            if !target.contains(&value) {
                target.push(value);
            }
        }
    }

    if let Some(aliases) = module.get("tag_aliases") {
        let aliases = aliases
            .as_object()
            .ok_or_else(|| module_error(name, "'tag_aliases' must be an object"))?;
        let target = object_entry(base, "tag_aliases")?;
        for (alias, canonical) in aliases {
            match target.get(alias) {
                Some(existing) if existing != canonical => {
                    return Err(module_error(
                        name,
                        format!("alias '{alias}' conflicts with an existing mapping"),
                    ));
                }
                Some(_) => {}
                None => {
                    target.insert(alias.clone(), canonical.clone());
                }
            }
        }
    }

    Ok(())
}

/// A module's nodes as (id, payload) pairs. Accepts the object form keyed
/// by id and the list form where each entry carries its own `id` field.
fn module_nodes(module: &Value, name: &str) -> Result<Vec<(String, Value)>, MergeError> {
    let Some(raw) = module.get("nodes") else {
        return Ok(Vec::new());
    };

    let mut nodes: Vec<(String, Value)> = Vec::new();
    let mut seen: Vec<&str> = Vec::new();
    match raw {
        Value::Object(map) => {
            for (id, payload) in map {
                nodes.push((id.clone(), payload.clone()));
            }
        }
        Value::Array(entries) => {
            for (idx, entry) in entries.iter().enumerate() {
                let entry = entry.as_object().ok_or_else(|| {
                    module_error(name, format!("node entry {} must be an object", idx + 1))
                })?;
                let id = entry
                    .get("id")
                    .and_then(|v| v.as_str())
                    .filter(|id| !id.trim().is_empty())
                    .ok_or_else(|| {
                        module_error(name, format!("node entry {} is missing an 'id'", idx + 1))
                    })?;
                if seen.contains(&id) {
                    return Err(module_error(
                        name,
                        format!("node '{id}' defined multiple times"),
                    ));
                }
                seen.push(id);
                let mut payload = entry.clone();
                payload.remove("id");
                nodes.push((id.to_string(), Value::Object(payload)));
            }
        }
        _ => {
            return Err(module_error(
                name,
                "'nodes' must be an object or a list of node entries",
            ));
        }
    }
    Ok(nodes)
}

// ============================================================================
// Base document access
// ============================================================================

fn base_object(base: &mut Value) -> Result<&mut Map<String, Value>, MergeError> {
    base.as_object_mut()
        .ok_or_else(|| MergeError::Base("document must be a JSON object".to_string()))
}

fn object_entry<'a>(
    base: &'a mut Value,
    key: &str,
) -> Result<&'a mut Map<String, Value>, MergeError> {
    let entry = base_object(base)?
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    entry
        .as_object_mut()
        .ok_or_else(|| MergeError::Base(format!("'{key}' must be an object")))
}

fn array_entry<'a>(base: &'a mut Value, key: &str) -> Result<&'a mut Vec<Value>, MergeError> {
    let entry = base_object(base)?
        .entry(key.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    entry
        .as_array_mut()
        .ok_or_else(|| MergeError::Base(format!("'{key}' must be a list")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> Value {
        json!({
            "title": "Patchwork Isles",
            "factions": ["Tide Wardens"],
            "advanced_tags": [],
            "tag_aliases": { "Diplomat": "Envoy" },
            "starts": [{ "id": "dock", "node": "dock" }],
            "nodes": {
                "dock": { "text": "Water.", "choices": [{ "label": "Wait", "node": "dock" }] }
            }
        })
    }

    #[test]
    fn test_merge_object_form_nodes() {
        let mut world = base();
        let module = json!({
            "nodes": {
                "reef": { "text": "Coral.", "ending": "Reefbound" }
            }
        });
        merge_document(&mut world, &module, "reef.json").expect("merge");
        assert!(world["nodes"].get("reef").is_some());
        assert!(world["nodes"].get("dock").is_some());
    }

    #[test]
    fn test_merge_list_form_nodes_strips_id() {
        let mut world = base();
        let module = json!({
            "nodes": [
                { "id": "reef", "text": "Coral.", "ending": "Reefbound" }
            ]
        });
        merge_document(&mut world, &module, "reef.json").expect("merge");
        let reef = world["nodes"].get("reef").expect("merged node");
        assert!(reef.get("id").is_none(), "id key moves into the map key");
        assert_eq!(reef["text"], "Coral.");
    }

    #[test]
    fn test_duplicate_node_across_documents_is_rejected() {
        let mut world = base();
        let module = json!({ "nodes": { "dock": { "text": "Clone." } } });
        let err = merge_document(&mut world, &module, "clash.json").unwrap_err();
        assert!(matches!(
            err,
            MergeError::Module { module, reason }
                if module == "clash.json" && reason.contains("'dock'")
        ));
    }

    #[test]
    fn test_duplicate_node_within_module_is_rejected() {
        let mut world = base();
        let module = json!({
            "nodes": [
                { "id": "reef", "text": "One." },
                { "id": "reef", "text": "Two." }
            ]
        });
        let err = merge_document(&mut world, &module, "twice.json").unwrap_err();
        assert!(matches!(
            err,
            MergeError::Module { reason, .. } if reason.contains("multiple times")
        ));
    }

    #[test]
    fn test_starts_append_and_catalogs_dedup() {
        let mut world = base();
        let module = json!({
            "starts": [{ "id": "reef", "node": "reef" }],
            "factions": ["Tide Wardens", "Root Assembly"],
            "advanced_tags": ["Ghostwise"],
            "nodes": { "reef": { "text": "Coral.", "ending": "Reefbound" } }
        });
        merge_document(&mut world, &module, "reef.json").expect("merge");

        assert_eq!(world["starts"].as_array().map(|s| s.len()), Some(2));
        assert_eq!(
            world["factions"],
            json!(["Tide Wardens", "Root Assembly"]),
            "existing faction is not duplicated"
        );
        assert_eq!(world["advanced_tags"], json!(["Ghostwise"]));
    }

    #[test]
    fn test_alias_conflicts_are_rejected() {
        let mut world = base();
        let same = json!({ "tag_aliases": { "Diplomat": "Envoy" } });
        merge_document(&mut world, &same, "same.json").expect("identical mapping is fine");

        let conflicting = json!({ "tag_aliases": { "Diplomat": "Herald" } });
        let err = merge_document(&mut world, &conflicting, "conflict.json").unwrap_err();
        assert!(matches!(
            err,
            MergeError::Module { reason, .. } if reason.contains("alias 'Diplomat'")
        ));
    }

    #[test]
    fn test_merge_from_dir_validates_result() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let base_path = dir.path().join("world.json");
        let modules_dir = dir.path().join("modules");
        std::fs::create_dir(&modules_dir).expect("modules dir");

        std::fs::write(&base_path, base().to_string()).expect("write base");
        // The module's choice targets a node nobody defines.
        std::fs::write(
            modules_dir.join("broken.json"),
            json!({
                "nodes": {
                    "reef": { "text": "Coral.", "choices": [{ "label": "Dive", "node": "abyss" }] }
                }
            })
            .to_string(),
        )
        .expect("write module");

        let err = merge_from_dir(&base_path, &modules_dir).unwrap_err();
        assert!(matches!(err, MergeError::Invalid(_)), "got {err:?}");
    }

    #[test]
    fn test_merge_from_dir_happy_path() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let base_path = dir.path().join("world.json");
        let modules_dir = dir.path().join("modules");
        std::fs::create_dir(&modules_dir).expect("modules dir");

        std::fs::write(&base_path, base().to_string()).expect("write base");
        std::fs::write(
            modules_dir.join("reef.json"),
            json!({
                "nodes": { "reef": { "text": "Coral.", "ending": "Reefbound" } },
                "starts": [{ "id": "reef", "node": "reef" }]
            })
            .to_string(),
        )
        .expect("write module");

        let (merged, count) = merge_from_dir(&base_path, &modules_dir).expect("merge");
        assert_eq!(count, 1);
        assert!(merged["nodes"].get("reef").is_some());
    }
}
