//! Entities that own an ABID, and drift detection between an entity's
//! stored identifier and the one its current fields would derive.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{derive, Abid};
use crate::error::ArchiveError;

/// An entity whose identifier is derived from its own fields.
pub trait AbidSource {
    /// Three-letter type prefix.
    const PREFIX: &'static str;
    /// When true, source fields may change after issue without raising a conflict.
    const DRIFT_ALLOWED: bool = false;

    fn abid_ts_src(&self) -> DateTime<Utc>;
    fn abid_uri_src(&self) -> String;
    fn abid_subtype_src(&self) -> String;
    fn abid_rand_src(&self) -> String;

    /// The identifier issued at creation.
    fn stored_abid(&self) -> &Abid;

    /// Identifier the entity's current fields derive to.
    fn derive_abid(&self, salt: &str) -> Abid {
        derive(
            Self::PREFIX,
            self.abid_ts_src(),
            &self.abid_uri_src(),
            &self.abid_subtype_src(),
            &self.abid_rand_src(),
            salt,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbidComponent {
    Prefix,
    Timestamp,
    Uri,
    Subtype,
    Rand,
}

impl AbidComponent {
    pub const ALL: [AbidComponent; 5] = [
        AbidComponent::Prefix,
        AbidComponent::Timestamp,
        AbidComponent::Uri,
        AbidComponent::Subtype,
        AbidComponent::Rand,
    ];

    /// Name of the source attribute feeding this component.
    pub fn source_attr(&self) -> &'static str {
        match self {
            Self::Prefix => "PREFIX",
            Self::Timestamp => "abid_ts_src",
            Self::Uri => "abid_uri_src",
            Self::Subtype => "abid_subtype_src",
            Self::Rand => "abid_rand_src",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentMismatch {
    pub component: AbidComponent,
    pub stored: String,
    pub derived: String,
}

/// Which components of a stored identifier no longer match its sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    pub stored: Abid,
    pub derived: Abid,
    pub mismatches: Vec<ComponentMismatch>,
}

impl ConflictReport {
    pub fn changed_sources(&self) -> Vec<&'static str> {
        self.mismatches
            .iter()
            .map(|m| m.component.source_attr())
            .collect()
    }
}

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stored {} no longer matches derived {}; changed: ",
            self.stored, self.derived
        )?;
        for (i, m) in self.mismatches.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(
                f,
                "{} ({} -> {})",
                m.component.source_attr(),
                m.stored,
                m.derived
            )?;
        }
        Ok(())
    }
}

/// Compare the stored identifier with a fresh derivation.
///
/// Returns `None` when every component matches.
pub fn verify<E: AbidSource>(entity: &E, salt: &str) -> Option<ConflictReport> {
    let stored = entity.stored_abid().clone();
    let derived = entity.derive_abid(salt);
    if stored == derived {
        return None;
    }

    let (sp, dp) = (stored.parts(), derived.parts());
    let mismatches = AbidComponent::ALL
        .iter()
        .filter(|c| sp.component(**c) != dp.component(**c))
        .map(|c| ComponentMismatch {
            component: *c,
            stored: sp.component(*c).to_string(),
            derived: dp.component(*c).to_string(),
        })
        .collect();

    Some(ConflictReport {
        stored,
        derived,
        mismatches,
    })
}

/// Refuse to persist an entity whose sources drifted from its identifier.
pub fn guard_mutation<E: AbidSource>(entity: &E, salt: &str) -> Result<(), ArchiveError> {
    if E::DRIFT_ALLOWED {
        return Ok(());
    }
    match verify(entity, salt) {
        Some(report) => Err(ArchiveError::IdentifierConflict(report)),
        None => Ok(()),
    }
}

/// Issue a new identifier from the entity's current sources.
pub fn reissue<E: AbidSource>(entity: &E, salt: &str) -> Abid {
    entity.derive_abid(salt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct Note {
        id: Abid,
        created_at: DateTime<Utc>,
        key: String,
    }

    impl AbidSource for Note {
        const PREFIX: &'static str = "nte";

        fn abid_ts_src(&self) -> DateTime<Utc> {
            self.created_at
        }
        fn abid_uri_src(&self) -> String {
            self.key.clone()
        }
        fn abid_subtype_src(&self) -> String {
            "note".to_string()
        }
        fn abid_rand_src(&self) -> String {
            "fixed".to_string()
        }
        fn stored_abid(&self) -> &Abid {
            &self.id
        }
    }

    struct LooseNote(Note);

    impl AbidSource for LooseNote {
        const PREFIX: &'static str = "nte";
        const DRIFT_ALLOWED: bool = true;

        fn abid_ts_src(&self) -> DateTime<Utc> {
            self.0.created_at
        }
        fn abid_uri_src(&self) -> String {
            self.0.key.clone()
        }
        fn abid_subtype_src(&self) -> String {
            "note".to_string()
        }
        fn abid_rand_src(&self) -> String {
            "fixed".to_string()
        }
        fn stored_abid(&self) -> &Abid {
            &self.0.id
        }
    }

    fn note(key: &str) -> Note {
        let created_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut n = Note {
            id: derive("nte", created_at, key, "note", "fixed", "salt"),
            created_at,
            key: key.to_string(),
        };
        n.id = n.derive_abid("salt");
        n
    }

    #[test]
    fn test_verify_clean() {
        assert!(verify(&note("a"), "salt").is_none());
    }

    #[test]
    fn test_verify_reports_changed_component() {
        let mut n = note("a");
        n.key = "b".to_string();

        let report = verify(&n, "salt").unwrap();
        assert_eq!(report.changed_sources(), vec!["abid_uri_src"]);
        assert_eq!(report.stored, n.id);
        assert!(report.to_string().contains("abid_uri_src"));
    }

    #[test]
    fn test_guard_refuses_drift() {
        let mut n = note("a");
        n.key = "b".to_string();
        assert!(matches!(
            guard_mutation(&n, "salt"),
            Err(ArchiveError::IdentifierConflict(_))
        ));
    }

    #[test]
    fn test_guard_allows_drift_when_opted_in() {
        let mut n = note("a");
        n.key = "b".to_string();
        assert!(guard_mutation(&LooseNote(n), "salt").is_ok());
    }

    #[test]
    fn test_reissue_clears_conflict() {
        let mut n = note("a");
        n.key = "b".to_string();
        n.id = reissue(&n, "salt");
        assert!(verify(&n, "salt").is_none());
    }
}
