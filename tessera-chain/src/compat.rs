use std::fmt;

use tessera_filter_types::fragment::{FilterFragment, FragmentKind};

/// Advisory finding about a fragment being added next to existing ones. Never a rejection,
/// the caller decides whether to remove the superseded fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompatibilityNote {
    /// The incoming fragment logically replaces an existing one of `superseded` kind.
    Supersedes { superseded: FragmentKind },
    /// An existing fragment of `by` kind already covers what the incoming one expresses.
    SupersededBy { by: FragmentKind },
    /// A structurally equal fragment is already in the chain.
    Duplicate,
}

impl fmt::Display for CompatibilityNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompatibilityNote::Supersedes { superseded } => {
                write!(f, "supersedes existing {superseded} fragment")
            }
            CompatibilityNote::SupersededBy { by } => {
                write!(f, "superseded by existing {by} fragment")
            }
            CompatibilityNote::Duplicate => write!(f, "duplicate of an existing fragment"),
        }
    }
}

/// (kind that supersedes, kind that is superseded)
const SUPERSEDES: &[(FragmentKind, FragmentKind)] =
    &[(FragmentKind::MaterializedView, FragmentKind::FidList)];

pub fn validate_compatibility(
    existing: &[FilterFragment],
    incoming: &FilterFragment,
) -> Vec<CompatibilityNote> {
    let mut notes = Vec::new();

    for fragment in existing {
        if fragment == incoming {
            notes.push(CompatibilityNote::Duplicate);
        }

        for (winner, loser) in SUPERSEDES {
            if incoming.kind() == *winner && fragment.kind() == *loser {
                notes.push(CompatibilityNote::Supersedes { superseded: *loser });
            }
            if incoming.kind() == *loser && fragment.kind() == *winner {
                notes.push(CompatibilityNote::SupersededBy { by: *winner });
            }
        }
    }

    notes.dedup();
    notes
}
