//! Canonical resource identity strings.
//!
//! Every resource a provider plugin operates on is identified by a URN of the
//! form `urn:pulumi:{stack}::{project}::{type}::{name}`. Fields that are not
//! known (or not relevant to a call) carry the blank sentinel `_` rather than
//! an empty string, so a rendered URN always has all five segments.
//!
//! # Example
//!
//! ```
//! use pulumi_plugin_host::Urn;
//!
//! let urn = Urn::named("aws:s3/bucketObject:BucketObject", "my-name").unwrap();
//! assert_eq!(
//!     urn.to_string(),
//!     "urn:pulumi:_::_::aws:s3/bucketObject:BucketObject::my-name"
//! );
//!
//! let parsed = Urn::parse(&urn.to_string()).unwrap();
//! assert_eq!(parsed, urn);
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// The sentinel rendered for URN fields that have no concrete value.
pub const BLANK: &str = "_";

const URN_PREFIX: &str = "urn:pulumi";

static FULL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^urn:pulumi:(?P<stack>[a-zA-Z0-9_\-/]+?)::(?P<project>[a-zA-Z0-9_\-/]+?)::(?P<type>[a-zA-Z0-9_\-/:]+?)::(?P<name>[a-zA-Z0-9_\-/]+?)$",
    )
    .expect("valid full URN pattern")
});

// Short form omitting stack and project.
static SHORT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^urn:pulumi:(?P<type>[a-zA-Z0-9_\-/:]+?)::(?P<name>[a-zA-Z0-9_\-/]+?)$")
        .expect("valid short URN pattern")
});

/// An immutable, canonical resource identity.
///
/// Two URNs are equal iff all four normalized fields are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Urn {
    type_token: String,
    name: String,
    stack: String,
    project: String,
}

impl Urn {
    /// Build a URN from a type token alone; name, stack, and project are blank.
    ///
    /// If `type_token` is itself a full or short URN string, it is reparsed
    /// and the blank fields inherit the parsed values.
    pub fn new(type_token: impl Into<String>) -> Result<Self> {
        Self::normalize(type_token.into(), BLANK.into(), BLANK.into(), BLANK.into())
    }

    /// Build a URN from a type token and a resource name.
    pub fn named(type_token: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        Self::normalize(type_token.into(), name.into(), BLANK.into(), BLANK.into())
    }

    /// Build a URN with every field specified.
    pub fn full(
        type_token: impl Into<String>,
        name: impl Into<String>,
        stack: impl Into<String>,
        project: impl Into<String>,
    ) -> Result<Self> {
        Self::normalize(type_token.into(), name.into(), stack.into(), project.into())
    }

    /// Parse a URN string in either the full 4-field form or the short
    /// `type::name` form (stack and project default to blank).
    ///
    /// Fails with [`Error::InvalidUrn`] when neither pattern matches.
    pub fn parse(text: &str) -> Result<Self> {
        if let Some(caps) = FULL_PATTERN.captures(text) {
            return Ok(Self {
                type_token: caps["type"].to_string(),
                name: caps["name"].to_string(),
                stack: caps["stack"].to_string(),
                project: caps["project"].to_string(),
            });
        }

        if let Some(caps) = SHORT_PATTERN.captures(text) {
            return Ok(Self {
                type_token: caps["type"].to_string(),
                name: caps["name"].to_string(),
                stack: BLANK.to_string(),
                project: BLANK.to_string(),
            });
        }

        Err(Error::InvalidUrn(text.to_string()))
    }

    // When the type token carries the urn:pulumi prefix, reparse it and fill
    // any field still blank from the parse result; the type is always taken
    // from the parse.
    fn normalize(type_token: String, name: String, stack: String, project: String) -> Result<Self> {
        if !type_token.starts_with(URN_PREFIX) {
            return Ok(Self {
                type_token,
                name,
                stack,
                project,
            });
        }

        let parsed = Self::parse(&type_token)?;
        let inherit = |own: String, parsed: String| if own == BLANK { parsed } else { own };
        Ok(Self {
            type_token: parsed.type_token,
            name: inherit(name, parsed.name),
            stack: inherit(stack, parsed.stack),
            project: inherit(project, parsed.project),
        })
    }

    /// The resource type token (e.g. `aws:s3/bucketObject:BucketObject`).
    pub fn type_token(&self) -> &str {
        &self.type_token
    }

    /// The resource name, or [`BLANK`].
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The stack, or [`BLANK`].
    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// The project, or [`BLANK`].
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Render the canonical 5-segment form. Blank fields render as `_`,
    /// never as an empty string.
    pub fn render(&self) -> String {
        format!(
            "urn:pulumi:{}::{}::{}::{}",
            self.stack, self.project, self.type_token, self.name
        )
    }

    /// A copy of this URN with the type token replaced.
    ///
    /// Field replacement is literal; prefix inheritance only happens at
    /// construction time.
    pub fn with_type(&self, type_token: impl Into<String>) -> Self {
        Self {
            type_token: type_token.into(),
            ..self.clone()
        }
    }

    /// A copy of this URN with the name replaced.
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// A copy of this URN with the stack replaced.
    pub fn with_stack(&self, stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            ..self.clone()
        }
    }

    /// A copy of this URN with the project replaced.
    pub fn with_project(&self, project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            ..self.clone()
        }
    }
}

impl std::fmt::Display for Urn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

impl std::str::FromStr for Urn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Urn {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.render())
    }
}

impl<'de> Deserialize<'de> for Urn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}
