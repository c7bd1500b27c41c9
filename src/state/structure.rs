//! Static structural description loaded at link-ready

use crate::error::{AmiError, AmiResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionSpec {
    pub name: String,
    pub tech: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSpec {
    pub name: String,
    /// Extension ids allowed to log into the queue
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrunkSpec {
    pub name: String,
    pub tech: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParkingSpec {
    pub name: String,
    pub lot: Option<String>,
    pub timeout: u64,
}

/// Categorization of extensions, queues, trunks and parkings.
///
/// ```json
/// {
///   "extensions": { "201": { "name": "Alice", "tech": "pjsip" } },
///   "queues": { "600": { "name": "Support", "members": ["201"] } },
///   "trunks": { "2001": { "name": "Provider", "tech": "pjsip" } },
///   "parkings": { "71": { "name": "Parking 71", "timeout": 45 } },
///   "meetme_conf_code": "987"
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructureDescription {
    pub extensions: BTreeMap<String, ExtensionSpec>,
    pub queues: BTreeMap<String, QueueSpec>,
    pub trunks: BTreeMap<String, TrunkSpec>,
    pub parkings: BTreeMap<String, ParkingSpec>,
    pub meetme_conf_code: String,
}

impl StructureDescription {
    pub fn from_json(text: &str) -> AmiResult<Self> {
        let desc: Self = serde_json::from_str(text)?;
        desc.validate()?;
        Ok(desc)
    }

    /// Queue members must be known extensions and nothing may be both extension and trunk.
    pub fn validate(&self) -> AmiResult<()> {
        for (queue_id, queue) in &self.queues {
            for member in &queue.members {
                if !self
                    .extensions
                    .contains_key(member)
                {
                    return Err(AmiError::Structure {
                        message: format!(
                            "queue {} lists member {} which is not an extension",
                            queue_id, member
                        ),
                    });
                }
            }
        }
        if let Some(id) = self
            .trunks
            .keys()
            .find(|id| {
                self.extensions
                    .contains_key(*id)
            })
        {
            return Err(AmiError::Structure {
                message: format!("{} is declared both as extension and trunk", id),
            });
        }
        Ok(())
    }
}

/// Where the structural description comes from.
///
/// Called on every link-ready, so a file source picks up edits made while the link was down.
pub trait StructureSource: Send + Sync {
    fn load(&self) -> AmiResult<StructureDescription>;
}

impl StructureSource for StructureDescription {
    fn load(&self) -> AmiResult<StructureDescription> {
        Ok(self.clone())
    }
}

/// JSON file on disk
#[derive(Debug, Clone)]
pub struct JsonFileStructure {
    path: PathBuf,
}

impl JsonFileStructure {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StructureSource for JsonFileStructure {
    fn load(&self) -> AmiResult<StructureDescription> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| AmiError::Structure {
            message: format!("{}: {}", e, self.path.display()),
        })?;
        StructureDescription::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "extensions": { "201": { "name": "Alice", "tech": "pjsip" }, "202": { "name": "Bob" } },
        "queues": { "600": { "name": "Support", "members": ["201"] } },
        "trunks": { "2001": { "name": "Provider", "tech": "pjsip" } },
        "parkings": { "71": { "name": "Parking 71", "timeout": 45 } },
        "meetme_conf_code": "987"
    }"#;

    #[test]
    fn test_parse_sample() {
        let desc = StructureDescription::from_json(SAMPLE).unwrap();
        assert_eq!(desc.extensions.len(), 2);
        assert_eq!(desc.queues["600"].members, vec!["201".to_string()]);
        assert_eq!(desc.parkings["71"].timeout, 45);
        assert_eq!(desc.meetme_conf_code, "987");
        assert_eq!(desc.extensions["202"].tech, "");
    }

    #[test]
    fn test_unknown_queue_member_rejected() {
        let err = StructureDescription::from_json(
            r#"{ "queues": { "600": { "members": ["999"] } } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, AmiError::Structure { .. }));
    }

    #[test]
    fn test_bad_json_is_json_error() {
        assert!(matches!(
            StructureDescription::from_json("{ not json"),
            Err(AmiError::Json(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let src = JsonFileStructure::new("/nonexistent/structure.json");
        assert!(matches!(src.load(), Err(AmiError::Structure { .. })));
    }
}
