//! # Resource Descriptors
//!
//! A descriptor wraps one release's `datapackage.json` manifest. It is
//! validated once at construction and never mutated afterwards.

use std::borrow::Cow;
use std::sync::LazyLock;

use bytes::Bytes;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{DatastoreError, Result, ValidationError};
use crate::resource::{PartitionFilters, ResourceKey};

/// Name under which a release's manifest is published and cached.
pub const DESCRIPTOR_NAME: &str = "datapackage.json";

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-a-z0-9._/]+$").expect("resource name pattern is valid"));

/// One entry of the manifest's `resources` array.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceEntry {
    pub name: String,
    pub path: Option<String>,
    /// Recorded origin of a locally cached copy; wins over `path`.
    pub remote_url: Option<String>,
    pub parts: Map<String, Value>,
    pub hash: Option<String>,
}

impl ResourceEntry {
    /// Fetch location: `remote_url` when set, otherwise `path`.
    pub fn location(&self) -> Option<&str> {
        self.remote_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .or(self.path.as_deref())
    }

    /// True when every filter equals the stringified partition value.
    ///
    /// Missing partitions stringify as `None`, so a `"None"` filter matches them.
    pub fn matches(&self, filters: &PartitionFilters) -> bool {
        filters
            .iter()
            .all(|(key, expected)| partition_str(self.parts.get(key)) == expected.as_str())
    }

    /// Declared md5 digest, accepting both `md5:<hex>` and bare hex.
    pub fn md5(&self) -> Option<&str> {
        let hash = self.hash.as_deref()?;
        match hash.split_once(':') {
            Some(("md5", digest)) => Some(digest),
            Some(_) => None,
            None => Some(hash),
        }
    }
}

fn partition_str(value: Option<&Value>) -> Cow<'_, str> {
    match value {
        None | Some(Value::Null) => Cow::Borrowed("None"),
        Some(Value::String(s)) => Cow::Borrowed(s),
        Some(Value::Bool(true)) => Cow::Borrowed("True"),
        Some(Value::Bool(false)) => Cow::Borrowed("False"),
        Some(other) => Cow::Owned(other.to_string()),
    }
}

/// Validated manifest of a single dataset release.
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    dataset: String,
    release_id: String,
    document: Value,
    resources: Vec<ResourceEntry>,
}

impl ResourceDescriptor {
    /// Validate `document` and wrap it. All structural problems are reported together.
    pub fn new(
        document: Value,
        dataset: impl Into<String>,
        release_id: impl Into<String>,
    ) -> std::result::Result<Self, ValidationError> {
        let dataset = dataset.into();
        let release_id = release_id.into();

        match validate(&document) {
            Ok(resources) => Ok(Self {
                dataset,
                release_id,
                document,
                resources,
            }),
            Err(issues) => Err(ValidationError {
                dataset,
                release_id,
                issues,
            }),
        }
    }

    /// Parse and validate raw manifest bytes.
    pub fn from_slice(
        bytes: &[u8],
        dataset: impl Into<String>,
        release_id: impl Into<String>,
    ) -> std::result::Result<Self, ValidationError> {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(document) => Self::new(document, dataset, release_id),
            Err(e) => Err(ValidationError {
                dataset: dataset.into(),
                release_id: release_id.into(),
                issues: vec![format!("document is not valid JSON: {e}")],
            }),
        }
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn release_id(&self) -> &str {
        &self.release_id
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn resources(&self) -> &[ResourceEntry] {
        &self.resources
    }

    /// Key under which this descriptor itself is cached.
    pub fn descriptor_key(&self) -> ResourceKey {
        ResourceKey::new(&self.dataset, &self.release_id, DESCRIPTOR_NAME)
    }

    /// Resolved fetch location of the first resource called `name`.
    pub fn resource_location(&self, name: &str) -> Result<&str> {
        self.resources
            .iter()
            .find(|res| res.name == name)
            .and_then(ResourceEntry::location)
            .ok_or_else(|| {
                DatastoreError::NotFound(format!(
                    "Resource {name} not found for {}/{}",
                    self.dataset, self.release_id
                ))
            })
    }

    /// Lazily yields keys of entries matching `name` (if given) and every filter,
    /// in manifest order.
    pub fn matching_resources<'a>(
        &'a self,
        name: Option<&'a str>,
        filters: &'a PartitionFilters,
    ) -> impl Iterator<Item = ResourceKey> + 'a {
        self.resources
            .iter()
            .filter(move |res| name.is_none_or(|name| res.name == name))
            .filter(move |res| res.matches(filters))
            .map(|res| ResourceKey::new(&self.dataset, &self.release_id, &res.name))
    }

    /// Sorted-key, 4-space indented JSON. Identical content always yields identical bytes.
    pub fn canonical_json(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        canonicalize(&self.document).serialize(&mut serializer)?;
        // serde_json only ever emits UTF-8
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    pub fn canonical_bytes(&self) -> Result<Bytes> {
        self.canonical_json().map(Bytes::from)
    }
}

// Rebuild every object with its keys inserted in sorted order so the output does not
// depend on whether serde_json preserves insertion order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn validate(document: &Value) -> std::result::Result<Vec<ResourceEntry>, Vec<String>> {
    let mut issues = Vec::new();

    let Some(root) = document.as_object() else {
        return Err(vec!["descriptor must be a JSON object".to_string()]);
    };

    if let Some(name) = root.get("name") {
        match name.as_str() {
            Some(name) if NAME_PATTERN.is_match(name) => {}
            Some(name) => issues.push(format!(
                "package name {name:?} does not match {}",
                NAME_PATTERN.as_str()
            )),
            None => issues.push("package name must be a string".to_string()),
        }
    }

    let resources = match root.get("resources") {
        None => {
            issues.push("missing required property \"resources\"".to_string());
            return Err(issues);
        }
        Some(Value::Array(items)) if items.is_empty() => {
            issues.push("\"resources\" must contain at least one resource".to_string());
            return Err(issues);
        }
        Some(Value::Array(items)) => items,
        Some(_) => {
            issues.push("\"resources\" must be an array".to_string());
            return Err(issues);
        }
    };

    let mut entries = Vec::with_capacity(resources.len());
    for (index, res) in resources.iter().enumerate() {
        match parse_entry(index, res, &mut issues) {
            Some(entry) => entries.push(entry),
            None => continue,
        }
    }

    if issues.is_empty() {
        Ok(entries)
    } else {
        Err(issues)
    }
}

fn parse_entry(index: usize, res: &Value, issues: &mut Vec<String>) -> Option<ResourceEntry> {
    let Some(obj) = res.as_object() else {
        issues.push(format!("resources[{index}] must be an object"));
        return None;
    };
    let before = issues.len();

    let name = match obj.get("name") {
        Some(Value::String(name)) => {
            if !NAME_PATTERN.is_match(name) {
                issues.push(format!(
                    "resources[{index}].name {name:?} does not match {}",
                    NAME_PATTERN.as_str()
                ));
            }
            name.clone()
        }
        Some(_) => {
            issues.push(format!("resources[{index}].name must be a string"));
            String::new()
        }
        None => {
            issues.push(format!("resources[{index}] is missing required property \"name\""));
            String::new()
        }
    };

    let mut optional_string = |field: &str| match obj.get(field) {
        None => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            issues.push(format!("resources[{index}].{field} must be a string"));
            None
        }
    };
    let path = optional_string("path");
    let remote_url = optional_string("remote_url");
    let hash = optional_string("hash");

    if path.is_none() && remote_url.as_deref().is_none_or(str::is_empty) {
        issues.push(format!(
            "resources[{index}] must declare a \"path\" or \"remote_url\""
        ));
    }

    let parts = match obj.get("parts") {
        None => Map::new(),
        Some(Value::Object(parts)) => {
            for (key, value) in parts {
                if value.is_object() || value.is_array() {
                    issues.push(format!(
                        "resources[{index}].parts.{key} must be a scalar value"
                    ));
                }
            }
            parts.clone()
        }
        Some(_) => {
            issues.push(format!("resources[{index}].parts must be an object"));
            Map::new()
        }
    };

    (issues.len() == before).then_some(ResourceEntry {
        name,
        path,
        remote_url,
        parts,
        hash,
    })
}
