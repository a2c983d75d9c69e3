//! Stored-procedure and TVP schema records (spec §3).

use std::time::Instant;

/// Parameter direction as declared on the stored procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ParameterDirection {
    In,
    Out,
    InOut,
    Return,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SpParameter {
    pub name: String,
    pub udt_type_name: Option<String>,
    pub size: i32,
    pub sql_type: String,
    pub direction: ParameterDirection,
    pub precision: u8,
    pub scale: u8,
    pub is_nullable: bool,
    pub has_default: bool,
}

/// `versionToken == 0` means "object not found" everywhere it appears.
pub const VERSION_NOT_FOUND: i64 = 0;

#[derive(Debug, Clone)]
pub struct SpSchema {
    pub name: String,
    pub version_token: i64,
    pub last_checked_at: Instant,
    pub parameters: Vec<SpParameter>,
}

impl SpSchema {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version_token: VERSION_NOT_FOUND,
            last_checked_at: Instant::now(),
            parameters: Vec::new(),
        }
    }

    pub fn is_found(&self) -> bool {
        self.version_token != VERSION_NOT_FOUND
    }

    pub fn find_parameter(&self, name: &str) -> Option<&SpParameter> {
        self.parameters.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TvpColumn {
    pub name: String,
    /// Precomputed case-insensitive hash of `name`; invariant:
    /// `name_hash == hash(name, caseInsensitive)`.
    pub name_hash: u64,
    pub max_length: i32,
    pub ordinal: usize,
    pub sql_type: String,
    pub precision: u8,
    pub scale: u8,
    pub is_identity: bool,
    pub is_computed: bool,
    pub is_nullable: bool,
}

impl TvpColumn {
    pub fn new(
        name: impl Into<String>,
        ordinal: usize,
        sql_type: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let name_hash = case_insensitive_hash(&name);
        Self {
            name,
            name_hash,
            max_length: -1,
            ordinal,
            sql_type: sql_type.into(),
            precision: 0,
            scale: 0,
            is_identity: false,
            is_computed: false,
            is_nullable: true,
        }
    }
}

/// Case-insensitive xxh3 hash used for `TvpColumn::name_hash` and the
/// span-keyed snapshot lookup (spec §4.6, §4.9).
pub fn case_insensitive_hash(s: &str) -> u64 {
    let lower: smallvec::SmallVec<[u8; 64]> = s.bytes().map(|b| b.to_ascii_lowercase()).collect();
    xxhash_rust::xxh3::xxh3_64(&lower)
}

#[derive(Debug, Clone)]
pub struct TvpSchema {
    pub name: String,
    pub version_token: i64,
    pub last_checked_at: Instant,
    pub columns: Vec<TvpColumn>,
}

impl TvpSchema {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version_token: VERSION_NOT_FOUND,
            last_checked_at: Instant::now(),
            columns: Vec::new(),
        }
    }

    pub fn is_found(&self) -> bool {
        self.version_token != VERSION_NOT_FOUND
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_hash_is_case_insensitive() {
        let a = case_insensitive_hash("UserName");
        let b = case_insensitive_hash("username");
        assert_eq!(a, b);
    }

    #[test]
    fn name_hash_differs_for_different_names() {
        assert_ne!(case_insensitive_hash("UserName"), case_insensitive_hash("Email"));
    }
}
