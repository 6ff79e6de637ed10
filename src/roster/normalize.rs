use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use super::{RawTable, Roster, RosterError, RosterRecord};

/// Header that must be present after normalization.
pub const IDENTIFIER_COLUMN: &str = "codigo";

/// Accepted display-name headers, in order of preference.
pub const DISPLAY_NAME_COLUMNS: &[&str] = &["nombres", "nombre", "name"];

/// Canonical form of an identifier: trimmed, then upper-cased.
/// Applied to stored identifiers and to submitted candidates alike.
pub fn normalize_identifier(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Lower-case, trim and drop combining accents, so `"Código "` and `"codigo"` unify.
pub fn normalize_header(raw: &str) -> String {
    raw.trim()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Build a roster from raw text cells. A missing identifier column yields `MalformedSchema`.
///
/// Rows keep source order; duplicate identifiers are kept as-is, so lookups see the first one.
/// Rows whose identifier cell is blank are skipped. Short rows read missing cells as empty.
pub fn normalize_table(table: &RawTable) -> Result<Roster, RosterError> {
    let headers: Vec<String> = table.headers.iter().map(|h| normalize_header(h)).collect();

    let Some(id_idx) = headers.iter().position(|h| h == IDENTIFIER_COLUMN) else {
        return Err(RosterError::MalformedSchema { expected: IDENTIFIER_COLUMN.to_string(), found: headers });
    };
    let name_idx = DISPLAY_NAME_COLUMNS
        .iter()
        .find_map(|want| headers.iter().position(|h| h == want));

    let mut records = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        let identifier = normalize_identifier(row.get(id_idx).map(String::as_str).unwrap_or(""));
        if identifier.is_empty() {
            continue;
        }
        let display_name = name_idx
            .and_then(|i| row.get(i))
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        records.push(RosterRecord { identifier, display_name });
    }
    Ok(Roster::well_formed(records, headers))
}
