//! Loading and validation of the base model, the entity list, and the
//! scenario catalogue.
//!
//! Everything here runs before a validation run is opened, so any error is
//! fatal and leaves the store untouched.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};
use valsuite_model::{EntityKey, ScenarioKey};

#[derive(Debug, Error)]
pub enum InputError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid input {path}: {message}")]
    Invalid { path: PathBuf, message: String },

    #[error("unknown entities requested: {}", .0.join(", "))]
    UnknownEntities(Vec<String>),

    #[error("unknown scenarios requested: {}", .0.join(", "))]
    UnknownScenarios(Vec<String>),
}

impl InputError {
    fn invalid(path: &Path, message: impl Into<String>) -> Self {
        InputError::Invalid {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}

/// Where the inputs live on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InputPaths {
    pub model: PathBuf,
    pub entities: PathBuf,
    pub scenarios_dir: PathBuf,
}

impl Default for InputPaths {
    fn default() -> Self {
        Self {
            model: PathBuf::from("model.json"),
            entities: PathBuf::from("countries/list_of_countries.json"),
            scenarios_dir: PathBuf::from("scenario-templates"),
        }
    }
}

/// Optional subsets of the entity and scenario catalogues. Empty means all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub entities: Vec<String>,
    pub scenarios: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub key: EntityKey,
    pub name: String,
}

/// One named override of a scenario: every address receives `value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub paths: Vec<String>,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioDocument {
    pub key: ScenarioKey,
    pub name: Option<String>,
    pub description: Option<String>,
    /// In document order.
    pub parameters: Vec<Parameter>,
}

impl ScenarioDocument {
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Fully validated inputs for one invocation.
#[derive(Debug, Clone)]
pub struct InputSet {
    pub model: Value,
    pub entities: Vec<Entity>,
    pub scenarios: Vec<ScenarioDocument>,
}

impl InputSet {
    pub fn load(paths: &InputPaths, selection: &Selection) -> Result<Self, InputError> {
        let model = read_json(&paths.model)?;
        let entities = select_entities(load_entities(&paths.entities)?, &selection.entities)?;
        let scenarios =
            select_scenarios(load_scenarios(&paths.scenarios_dir)?, &selection.scenarios)?;

        info!(
            entities = entities.len(),
            scenarios = scenarios.len(),
            "loaded validation inputs"
        );
        Ok(Self {
            model,
            entities,
            scenarios,
        })
    }

    pub fn entity_keys(&self) -> Vec<EntityKey> {
        self.entities.iter().map(|e| e.key.clone()).collect()
    }

    pub fn scenario_keys(&self) -> Vec<ScenarioKey> {
        self.scenarios.iter().map(|s| s.key.clone()).collect()
    }

    pub fn scenario(&self, key: &ScenarioKey) -> Option<&ScenarioDocument> {
        self.scenarios.iter().find(|s| &s.key == key)
    }
}

fn read_json(path: &Path) -> Result<Value, InputError> {
    let text = fs::read_to_string(path).map_err(|source| InputError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| InputError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Deserialize)]
struct EntityFile {
    #[serde(alias = "countries")]
    entities: Vec<EntityEntry>,
}

#[derive(Debug, Deserialize)]
struct EntityEntry {
    #[serde(alias = "iso3")]
    key: Option<String>,
    name: Option<String>,
}

pub fn load_entities(path: &Path) -> Result<Vec<Entity>, InputError> {
    let raw = read_json(path)?;
    let file: EntityFile = serde_json::from_value(raw).map_err(|source| InputError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    if file.entities.is_empty() {
        return Err(InputError::invalid(path, "entity list is empty"));
    }

    let mut seen = HashSet::new();
    let mut entities = Vec::with_capacity(file.entities.len());
    for (index, entry) in file.entities.into_iter().enumerate() {
        let key = entry
            .key
            .ok_or_else(|| InputError::invalid(path, format!("entry {index} has no key")))
            .and_then(|k| {
                EntityKey::new(k)
                    .map_err(|e| InputError::invalid(path, format!("entry {index}: {e}")))
            })?;
        if !seen.insert(key.clone()) {
            warn!(entity = %key, "duplicate entity ignored");
            continue;
        }
        let name = entry.name.unwrap_or_else(|| key.to_string());
        entities.push(Entity { key, name });
    }
    Ok(entities)
}

pub fn load_scenarios(dir: &Path) -> Result<Vec<ScenarioDocument>, InputError> {
    let listing = fs::read_dir(dir).map_err(|source| InputError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in listing {
        let entry = entry.map_err(|source| InputError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();

    if files.is_empty() {
        return Err(InputError::invalid(dir, "no scenario files found"));
    }

    files.iter().map(|path| load_scenario(path)).collect()
}

pub fn load_scenario(path: &Path) -> Result<ScenarioDocument, InputError> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| InputError::invalid(path, "scenario file name is not valid UTF-8"))?;
    let key = ScenarioKey::new(stem).map_err(|e| InputError::invalid(path, e.to_string()))?;

    let raw = read_json(path)?;
    let Value::Object(mut doc) = raw else {
        return Err(InputError::invalid(path, "scenario must be a JSON object"));
    };

    let Some(Value::Object(params)) = doc.remove("parameters") else {
        return Err(InputError::invalid(
            path,
            "scenario must contain a 'parameters' object",
        ));
    };

    let parameters = params
        .into_iter()
        .map(|(name, config)| parse_parameter(path, name, config))
        .collect::<Result<Vec<_>, _>>()?;

    debug!(scenario = %key, parameters = parameters.len(), "loaded scenario");
    Ok(ScenarioDocument {
        key,
        name: text_field(&doc, "name"),
        description: text_field(&doc, "description"),
        parameters,
    })
}

fn text_field(doc: &Map<String, Value>, field: &str) -> Option<String> {
    doc.get(field).and_then(Value::as_str).map(str::to_string)
}

fn parse_parameter(path: &Path, name: String, config: Value) -> Result<Parameter, InputError> {
    let Value::Object(mut config) = config else {
        return Err(InputError::invalid(
            path,
            format!("parameter '{name}' must be an object"),
        ));
    };
    let Some(value) = config.remove("value") else {
        return Err(InputError::invalid(
            path,
            format!("parameter '{name}' has no 'value'"),
        ));
    };
    let paths = match config.remove("paths") {
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                _ => Err(InputError::invalid(
                    path,
                    format!("parameter '{name}' has a non-string path"),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => {
            return Err(InputError::invalid(
                path,
                format!("parameter '{name}' needs a 'paths' list"),
            ));
        }
    };
    Ok(Parameter { name, paths, value })
}

fn select_entities(all: Vec<Entity>, wanted: &[String]) -> Result<Vec<Entity>, InputError> {
    if wanted.is_empty() {
        return Ok(all);
    }
    let wanted: Vec<&str> = wanted.iter().map(|w| w.trim()).collect();
    let unknown: Vec<String> = wanted
        .iter()
        .filter(|w| !all.iter().any(|e| e.key.as_str() == **w))
        .map(|w| w.to_string())
        .collect();
    if !unknown.is_empty() {
        return Err(InputError::UnknownEntities(unknown));
    }
    Ok(all
        .into_iter()
        .filter(|e| wanted.contains(&e.key.as_str()))
        .collect())
}

fn select_scenarios(
    all: Vec<ScenarioDocument>,
    wanted: &[String],
) -> Result<Vec<ScenarioDocument>, InputError> {
    if wanted.is_empty() {
        return Ok(all);
    }
    let wanted: Vec<&str> = wanted
        .iter()
        .map(|w| w.trim().trim_end_matches(".json"))
        .collect();
    let unknown: Vec<String> = wanted
        .iter()
        .filter(|w| !all.iter().any(|s| s.key.as_str() == **w))
        .map(|w| w.to_string())
        .collect();
    if !unknown.is_empty() {
        return Err(InputError::UnknownScenarios(unknown));
    }
    Ok(all
        .into_iter()
        .filter(|s| wanted.contains(&s.key.as_str()))
        .collect())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn write(dir: &Path, name: &str, value: &Value) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(&path, serde_json::to_string_pretty(value).expect("json")).expect("write");
        path
    }

    fn fixture() -> (TempDir, InputPaths) {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        write(root, "model.json", &json!({"nodes": []}));
        write(
            root,
            "countries/list_of_countries.json",
            &json!({"countries": [
                {"name": "Kenya", "iso3": "KEN"},
                {"name": "Uganda", "iso3": "UGA"},
                {"name": "Kenya again", "iso3": "KEN"}
            ]}),
        );
        let scenario = |label: &str| {
            json!({
                "name": label,
                "parameters": {
                    "Country": {"paths": ["$.country"], "value": "XXX"},
                    "Coverage": {"paths": ["$.nodes[*].coverage"], "value": 0.5}
                }
            })
        };
        write(root, "scenarios/b_scale.json", &scenario("Scale"));
        write(root, "scenarios/a_base.json", &scenario("Base"));
        write(root, "scenarios/notes.txt", &json!("ignored"));

        let paths = InputPaths {
            model: root.join("model.json"),
            entities: root.join("countries/list_of_countries.json"),
            scenarios_dir: root.join("scenarios"),
        };
        (dir, paths)
    }

    #[test]
    fn loads_full_catalogue_in_file_order() {
        let (_dir, paths) = fixture();
        let inputs = InputSet::load(&paths, &Selection::default()).expect("inputs");

        let entities: Vec<_> = inputs.entities.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(entities, ["KEN", "UGA"]);
        assert_eq!(inputs.entities[0].name, "Kenya");

        let scenarios: Vec<_> = inputs.scenarios.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(scenarios, ["a_base", "b_scale"]);

        let names: Vec<_> = inputs.scenarios[0]
            .parameters
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, ["Country", "Coverage"]);
    }

    #[test]
    fn accepts_entities_shape() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(
            dir.path(),
            "entities.json",
            &json!({"entities": [{"key": "north", "name": "North"}, {"key": "south"}]}),
        );
        let entities = load_entities(&path).expect("entities");
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[1].name, "south");
    }

    #[test]
    fn selection_filters_and_rejects_unknown_keys() {
        let (_dir, paths) = fixture();
        let selection = Selection {
            entities: vec!["UGA".into()],
            scenarios: vec!["b_scale.json".into()],
        };
        let inputs = InputSet::load(&paths, &selection).expect("inputs");
        assert_eq!(inputs.entity_keys().len(), 1);
        assert_eq!(inputs.scenario_keys()[0].as_str(), "b_scale");

        let err = InputSet::load(
            &paths,
            &Selection {
                entities: vec!["UGA".into(), "ZZZ".into()],
                scenarios: vec![],
            },
        )
        .expect_err("unknown entity");
        assert!(matches!(err, InputError::UnknownEntities(ref keys) if keys == &["ZZZ"]));

        let err = InputSet::load(
            &paths,
            &Selection {
                entities: vec![],
                scenarios: vec!["missing".into()],
            },
        )
        .expect_err("unknown scenario");
        assert!(matches!(err, InputError::UnknownScenarios(_)));
    }

    #[test]
    fn malformed_and_missing_inputs_are_errors() {
        let (dir, paths) = fixture();
        fs::write(&paths.model, "{ not json").expect("write");
        assert!(matches!(
            InputSet::load(&paths, &Selection::default()),
            Err(InputError::Json { .. })
        ));

        let missing = InputPaths {
            model: dir.path().join("nope.json"),
            ..paths.clone()
        };
        assert!(matches!(
            InputSet::load(&missing, &Selection::default()),
            Err(InputError::Io { .. })
        ));
    }

    #[test]
    fn scenario_without_parameters_is_invalid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(dir.path(), "s.json", &json!({"name": "x"}));
        assert!(matches!(load_scenario(&path), Err(InputError::Invalid { .. })));

        let path = write(
            dir.path(),
            "t.json",
            &json!({"parameters": {"Country": {"value": "KEN"}}}),
        );
        assert!(matches!(load_scenario(&path), Err(InputError::Invalid { .. })));
    }

    #[test]
    fn empty_entity_list_is_invalid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(dir.path(), "e.json", &json!({"entities": []}));
        assert!(matches!(load_entities(&path), Err(InputError::Invalid { .. })));
    }
}
