use serde::Serialize;

use crate::roster::{normalize_identifier, Roster, RosterRecord};

/// Why a candidate was refused. A normal outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    CodeNotFound,
}

impl RejectionReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectionReason::CodeNotFound => "CODE_NOT_FOUND",
        }
    }

    /// Text shown to the visitor. A degraded roster reads the same as a wrong code.
    pub fn message(&self) -> &'static str {
        match self {
            RejectionReason::CodeNotFound => "Código no encontrado o error de conexión.",
        }
    }
}

/// Look a candidate up in the roster. Pure: no I/O, no side effects.
///
/// The candidate is normalized like stored identifiers; the first record in source order
/// with an equal identifier wins. A degraded roster has no records and so always refuses.
pub fn authenticate(candidate: &str, roster: &Roster) -> Result<RosterRecord, RejectionReason> {
    let wanted = normalize_identifier(candidate);
    if wanted.is_empty() {
        return Err(RejectionReason::CodeNotFound);
    }
    roster
        .records()
        .iter()
        .find(|r| r.identifier == wanted)
        .cloned()
        .ok_or(RejectionReason::CodeNotFound)
}
