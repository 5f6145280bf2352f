//! Property bags and the protocol's value/diff model.
//!
//! Property bags are string-keyed JSON mappings exchanged with provider
//! plugins. During preview, values that will only be known after apply are
//! carried as per-kind unknown sentinels, encoded inside a bag as a
//! single-key object `{"$unknown": "<sentinel>"}` so they can never be
//! mistaken for a real value of that kind.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A string-keyed bag of resource property values.
pub type PropertyMap = serde_json::Map<String, Value>;

/// Key wrapping an unknown sentinel inside a property bag.
pub const UNKNOWN_KEY: &str = "$unknown";

/// Reserved output key listing property names filled from schema defaults
/// rather than supplied by the caller. Appears in `check`/`check_config`
/// outputs.
pub const DEFAULTS_KEY: &str = "__defaults";

/// Reserved output key carrying opaque provider metadata (a JSON-shaped
/// string). May appear in `create`/`update` outputs.
pub const META_KEY: &str = "__meta";

/// Sentinel for an unknown bool value.
pub const UNKNOWN_BOOL_VALUE: &str = "1c4a061d-8072-4f0a-a4cb-0ff28b88e66e";
/// Sentinel for an unknown number value.
pub const UNKNOWN_NUMBER_VALUE: &str = "3eeb2bf0-c639-47a8-9e75-3b44932eb421";
/// Sentinel for an unknown string value.
pub const UNKNOWN_STRING_VALUE: &str = "04da6b54-80e4-46f7-96ec-b56ff0331ba9";
/// Sentinel for an unknown array value.
pub const UNKNOWN_ARRAY_VALUE: &str = "6a19a0b0-7e62-4c92-b797-7f8e31da9cc2";
/// Sentinel for an unknown asset value.
pub const UNKNOWN_ASSET_VALUE: &str = "030794c1-ac77-496b-92df-f27374a8bd58";
/// Sentinel for an unknown archive value.
pub const UNKNOWN_ARCHIVE_VALUE: &str = "e48ece36-62e2-4504-bad9-02848725956a";
/// Sentinel for an unknown object value.
pub const UNKNOWN_OBJECT_VALUE: &str = "dd056dcd-154b-4c76-9bd3-c8f88648b5ff";
/// Sentinel for an unknown null value.
pub const UNKNOWN_NULL_VALUE: &str = "";

/// A property value whose concrete value will only be known after apply,
/// tagged with the kind of value it will eventually hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnknownValue {
    /// An unknown bool.
    Bool,
    /// An unknown number.
    Number,
    /// An unknown string.
    String,
    /// An unknown ordered sequence.
    Array,
    /// An unknown asset.
    Asset,
    /// An unknown archive.
    Archive,
    /// An unknown string-keyed mapping.
    Object,
    /// An unknown value of no particular kind.
    Null,
}

impl UnknownValue {
    /// The sentinel string for this kind.
    pub fn sentinel(&self) -> &'static str {
        match self {
            Self::Bool => UNKNOWN_BOOL_VALUE,
            Self::Number => UNKNOWN_NUMBER_VALUE,
            Self::String => UNKNOWN_STRING_VALUE,
            Self::Array => UNKNOWN_ARRAY_VALUE,
            Self::Asset => UNKNOWN_ASSET_VALUE,
            Self::Archive => UNKNOWN_ARCHIVE_VALUE,
            Self::Object => UNKNOWN_OBJECT_VALUE,
            Self::Null => UNKNOWN_NULL_VALUE,
        }
    }

    /// Look up the kind for a sentinel string.
    pub fn from_sentinel(sentinel: &str) -> Option<Self> {
        match sentinel {
            UNKNOWN_BOOL_VALUE => Some(Self::Bool),
            UNKNOWN_NUMBER_VALUE => Some(Self::Number),
            UNKNOWN_STRING_VALUE => Some(Self::String),
            UNKNOWN_ARRAY_VALUE => Some(Self::Array),
            UNKNOWN_ASSET_VALUE => Some(Self::Asset),
            UNKNOWN_ARCHIVE_VALUE => Some(Self::Archive),
            UNKNOWN_OBJECT_VALUE => Some(Self::Object),
            UNKNOWN_NULL_VALUE => Some(Self::Null),
            _ => None,
        }
    }

    /// Encode this unknown as a property-bag value.
    pub fn to_value(self) -> Value {
        let mut wrapper = PropertyMap::new();
        wrapper.insert(UNKNOWN_KEY.to_string(), Value::String(self.sentinel().to_string()));
        Value::Object(wrapper)
    }

    /// Decode a property-bag value into an unknown, if it is one.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.len() != 1 {
            return None;
        }
        let sentinel = obj.get(UNKNOWN_KEY)?.as_str()?;
        Self::from_sentinel(sentinel)
    }
}

impl From<UnknownValue> for Value {
    fn from(unknown: UnknownValue) -> Self {
        unknown.to_value()
    }
}

/// Whether a property-bag value is an encoded unknown sentinel.
pub fn value_is_unknown(value: &Value) -> bool {
    UnknownValue::from_value(value).is_some()
}

/// The keys of a bag whose top-level values are unknown sentinels, in bag
/// order. Nested unknowns are plugin-defined and passed through untouched.
pub fn bag_unknown_keys(bag: &PropertyMap) -> Vec<String> {
    bag.iter()
        .filter(|(_, value)| value_is_unknown(value))
        .map(|(key, _)| key.clone())
        .collect()
}

/// Classification of a single property's change, including whether the
/// change forces resource replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum DiffKind {
    /// The property was added.
    Add,
    /// The property was added and the resource must be replaced.
    AddReplace,
    /// The property was deleted.
    Delete,
    /// The property was deleted and the resource must be replaced.
    DeleteReplace,
    /// The property was changed in place.
    Update,
    /// The property was changed and the resource must be replaced.
    UpdateReplace,
}

impl DiffKind {
    /// Whether this change forces resource replacement.
    pub fn is_replace(&self) -> bool {
        matches!(self, Self::AddReplace | Self::DeleteReplace | Self::UpdateReplace)
    }

    /// The replace-forcing variant of this kind.
    pub fn as_replace(self) -> Self {
        match self {
            Self::Add | Self::AddReplace => Self::AddReplace,
            Self::Delete | Self::DeleteReplace => Self::DeleteReplace,
            Self::Update | Self::UpdateReplace => Self::UpdateReplace,
        }
    }
}

impl From<DiffKind> for i32 {
    fn from(kind: DiffKind) -> Self {
        match kind {
            DiffKind::Add => 0,
            DiffKind::AddReplace => 1,
            DiffKind::Delete => 2,
            DiffKind::DeleteReplace => 3,
            DiffKind::Update => 4,
            DiffKind::UpdateReplace => 5,
        }
    }
}

impl TryFrom<i32> for DiffKind {
    type Error = String;

    fn try_from(code: i32) -> std::result::Result<Self, String> {
        match code {
            0 => Ok(Self::Add),
            1 => Ok(Self::AddReplace),
            2 => Ok(Self::Delete),
            3 => Ok(Self::DeleteReplace),
            4 => Ok(Self::Update),
            5 => Ok(Self::UpdateReplace),
            other => Err(format!("unknown diff kind code: {}", other)),
        }
    }
}

/// A single validation problem reported by `check`/`check_config`.
///
/// Failures are data, not errors: ordinary validation problems come back as
/// a list of these, while raised errors are reserved for protocol-level
/// faults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckFailure {
    /// Path of the offending property; may be empty for resource-level
    /// problems.
    #[serde(rename = "Property")]
    pub property: String,
    /// Human-readable reason the property was rejected.
    #[serde(rename = "Reason")]
    pub reason: String,
}

impl CheckFailure {
    /// Create a new failure record.
    pub fn new(property: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            reason: reason.into(),
        }
    }
}

/// Detail about one changed property within a [`DiffResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDiff {
    /// The kind of change.
    #[serde(rename = "Kind")]
    pub kind: DiffKind,
    /// Whether the diff is to an input property rather than an output.
    #[serde(rename = "InputDiff")]
    pub input_diff: bool,
}

/// The outcome of a `diff`/`diff_config` comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DiffResult {
    /// Number of changed properties.
    #[serde(rename = "Changes")]
    pub changes: usize,
    /// Changed properties whose change forces resource replacement.
    #[serde(rename = "ReplaceKeys")]
    pub replace_keys: Vec<String>,
    /// Properties that did not change.
    #[serde(rename = "StableKeys")]
    pub stable_keys: Vec<String>,
    /// All changed properties, replace-forcing or not.
    #[serde(rename = "ChangedKeys")]
    pub changed_keys: Vec<String>,
    /// Per-property change detail.
    #[serde(rename = "DetailedDiff")]
    pub detailed_diff: BTreeMap<String, PropertyDiff>,
    /// Whether any replacement requires delete-then-create ordering instead
    /// of create-then-delete.
    #[serde(rename = "DeleteBeforeReplace")]
    pub delete_before_replace: bool,
}

impl DiffResult {
    /// A diff recording no changes, with every key stable.
    pub fn unchanged(stable_keys: Vec<String>) -> Self {
        Self {
            stable_keys,
            ..Default::default()
        }
    }

    /// Whether any changed property forces replacement.
    pub fn requires_replacement(&self) -> bool {
        !self.replace_keys.is_empty()
    }
}

/// The outcome of a `create` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateResult {
    /// Provider-assigned resource id; empty for previews.
    #[serde(rename = "ID")]
    pub id: String,
    /// Canonicalized resulting property bag.
    #[serde(rename = "Properties")]
    pub properties: PropertyMap,
    /// 0 on success; nonzero is a partial failure the caller may tolerate.
    #[serde(rename = "Status")]
    pub status: i32,
}

/// The outcome of a `read` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadResult {
    /// Resource id; empty when the resource no longer exists.
    #[serde(rename = "ID")]
    pub id: String,
    /// Input properties, as identified by the provider.
    #[serde(rename = "Inputs")]
    pub inputs: PropertyMap,
    /// Live output properties; empty when the resource no longer exists.
    #[serde(rename = "Outputs")]
    pub outputs: PropertyMap,
    /// 0 on success; nonzero is a partial failure the caller may tolerate.
    #[serde(rename = "Status")]
    pub status: i32,
}

/// The outcome of an `update` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateResult {
    /// Resource id.
    #[serde(rename = "ID")]
    pub id: String,
    /// Canonicalized resulting property bag.
    #[serde(rename = "Properties")]
    pub properties: PropertyMap,
    /// 0 on success; nonzero is a partial failure the caller may tolerate.
    #[serde(rename = "Status")]
    pub status: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_value_round_trip() {
        for unknown in [
            UnknownValue::Bool,
            UnknownValue::Number,
            UnknownValue::String,
            UnknownValue::Array,
            UnknownValue::Asset,
            UnknownValue::Archive,
            UnknownValue::Object,
            UnknownValue::Null,
        ] {
            let value = unknown.to_value();
            assert_eq!(UnknownValue::from_value(&value), Some(unknown));
            assert!(value_is_unknown(&value));
        }
    }

    #[test]
    fn test_real_values_are_not_unknown() {
        assert!(!value_is_unknown(&json!("04da6b54")));
        assert!(!value_is_unknown(&json!(true)));
        assert!(!value_is_unknown(&json!({"key": "value"})));
        // A wrapper-shaped object with a non-sentinel payload is a real value.
        assert!(!value_is_unknown(&json!({"$unknown": "not-a-sentinel"})));
        // Extra keys disqualify the wrapper.
        let mut wrapper = PropertyMap::new();
        wrapper.insert(
            UNKNOWN_KEY.to_string(),
            Value::String(UNKNOWN_STRING_VALUE.to_string()),
        );
        wrapper.insert("extra".to_string(), json!(1));
        assert!(!value_is_unknown(&Value::Object(wrapper)));
    }

    #[test]
    fn test_unknown_survives_bag_serialization() {
        let mut bag = PropertyMap::new();
        bag.insert("bucket".to_string(), UnknownValue::String.to_value());
        bag.insert("content".to_string(), json!("Hello, world!"));

        let encoded = serde_json::to_string(&bag).unwrap();
        let decoded: PropertyMap = serde_json::from_str(&encoded).unwrap();

        assert_eq!(
            UnknownValue::from_value(&decoded["bucket"]),
            Some(UnknownValue::String)
        );
        assert_eq!(bag_unknown_keys(&decoded), vec!["bucket".to_string()]);
    }

    #[test]
    fn test_diff_kind_codes() {
        assert_eq!(i32::from(DiffKind::Add), 0);
        assert_eq!(i32::from(DiffKind::Update), 4);
        assert_eq!(i32::from(DiffKind::UpdateReplace), 5);
        assert_eq!(DiffKind::try_from(3).unwrap(), DiffKind::DeleteReplace);
        assert!(DiffKind::try_from(6).is_err());
    }

    #[test]
    fn test_diff_kind_replace() {
        assert!(!DiffKind::Update.is_replace());
        assert!(DiffKind::UpdateReplace.is_replace());
        assert_eq!(DiffKind::Add.as_replace(), DiffKind::AddReplace);
        assert_eq!(DiffKind::Delete.as_replace(), DiffKind::DeleteReplace);
    }

    #[test]
    fn test_diff_result_wire_names() {
        let mut detailed = BTreeMap::new();
        detailed.insert(
            "content".to_string(),
            PropertyDiff {
                kind: DiffKind::Update,
                input_diff: false,
            },
        );
        let result = DiffResult {
            changes: 1,
            replace_keys: vec![],
            stable_keys: vec!["bucket".to_string()],
            changed_keys: vec!["content".to_string()],
            detailed_diff: detailed,
            delete_before_replace: false,
        };

        let encoded = serde_json::to_value(&result).unwrap();
        assert_eq!(
            encoded,
            json!({
                "Changes": 1,
                "ReplaceKeys": [],
                "StableKeys": ["bucket"],
                "ChangedKeys": ["content"],
                "DetailedDiff": {"content": {"Kind": 4, "InputDiff": false}},
                "DeleteBeforeReplace": false,
            })
        );
    }

    #[test]
    fn test_check_failure_wire_names() {
        let failure = CheckFailure::new("bucket", "missing required property");
        let encoded = serde_json::to_value(&failure).unwrap();
        assert_eq!(
            encoded,
            json!({"Property": "bucket", "Reason": "missing required property"})
        );
    }

    #[test]
    fn test_create_result_wire_names() {
        let result = CreateResult {
            id: "obj-1".to_string(),
            properties: PropertyMap::new(),
            status: 0,
        };
        let encoded = serde_json::to_value(&result).unwrap();
        assert_eq!(encoded, json!({"ID": "obj-1", "Properties": {}, "Status": 0}));
    }
}
