//! `InstanceId` and `ObjectName` (spec §3).

use std::borrow::Cow;
use std::fmt;

/// Opaque identifier for a logical target database, used as a partition
/// key throughout the schema and snapshot layers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for InstanceId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// A `{schema}.{name}` object reference, case-insensitive, defaulting the
/// schema to `dbo` and stripping bracket quoting.
///
/// Normalisation rules (spec §3):
/// - `[schema].[name]` and `schema.name` are equivalent.
/// - A bare `name` becomes `dbo.name`.
/// - Comparison and hashing are case-insensitive on both parts.
#[derive(Debug, Clone)]
pub struct ObjectName {
    schema: String,
    name: String,
}

impl ObjectName {
    /// Parse and normalise a possibly bracket-quoted, possibly unqualified
    /// object reference.
    pub fn normalise(raw: &str) -> Self {
        let stripped = strip_brackets(raw.trim());
        match stripped.split_once('.') {
            Some((schema, name)) => Self {
                schema: strip_brackets(schema).to_string(),
                name: strip_brackets(name).to_string(),
            },
            None => Self {
                schema: "dbo".to_string(),
                name: stripped.to_string(),
            },
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The canonical `schema.name` form, lower-cased for use as a cache key.
    pub fn cache_key(&self) -> String {
        format!("{}.{}", self.schema.to_ascii_lowercase(), self.name.to_ascii_lowercase())
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

impl PartialEq for ObjectName {
    fn eq(&self, other: &Self) -> bool {
        self.schema.eq_ignore_ascii_case(&other.schema) && self.name.eq_ignore_ascii_case(&other.name)
    }
}
impl Eq for ObjectName {}

fn strip_brackets(s: &str) -> Cow<'_, str> {
    let s = s.trim();
    if s.starts_with('[') && s.ends_with(']') && s.len() >= 2 {
        Cow::Borrowed(&s[1..s.len() - 1])
    } else {
        Cow::Borrowed(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalises_bare_name_to_dbo() {
        let n = ObjectName::normalise("usp_Get_User");
        assert_eq!(n.schema(), "dbo");
        assert_eq!(n.name(), "usp_Get_User");
    }

    #[test]
    fn strips_bracket_quoting() {
        let n = ObjectName::normalise("[core].[usp_Core_Get_User]");
        assert_eq!(n.schema(), "core");
        assert_eq!(n.name(), "usp_Core_Get_User");
    }

    #[test]
    fn case_insensitive_equality() {
        let a = ObjectName::normalise("Core.Usp_Get_User");
        let b = ObjectName::normalise("[core].[usp_get_user]");
        assert_eq!(a, b);
        assert_eq!(a.cache_key(), b.cache_key());
    }
}
