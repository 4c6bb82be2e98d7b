//! Best-effort reading of zone names out of free-form console text.
//!
//! Nothing here may fail a reconciliation run: unreadable owners fall back
//! to defaults in the caller.

use crate::types::RemoteZoneSnapshot;

/// Wrapping characters stripped from bare (unquoted) tokens.
const TRIM: &[char] = &['\'', '`', '(', ')', '[', ']', '{', '}', ':', ';'];

/// Every name in `reply` that starts with `prefix`, in order of appearance.
///
/// Double-quoted text is taken whole, so quoted names may contain spaces.
/// Elsewhere names end at whitespace or a comma.  Any other character,
/// non-ASCII included, belongs to the name.
pub fn parse_zone_names(reply: &str, prefix: &str) -> RemoteZoneSnapshot {
    let mut candidates: Vec<&str> = Vec::new();
    for line in reply.lines() {
        for (i, segment) in line.split('"').enumerate() {
            if i % 2 == 1 {
                candidates.push(segment.trim());
            } else {
                candidates.extend(
                    segment
                        .split(|c: char| c.is_whitespace() || c == ',')
                        .map(|token| token.trim_matches(TRIM)),
                );
            }
        }
    }
    RemoteZoneSnapshot::new(
        candidates
            .into_iter()
            .filter(|name| name.len() > prefix.len() && name.starts_with(prefix)),
    )
}

/// Owner encoded in a zone name: `<prefix><owner>` or
/// `<prefix><unix time>_<owner>`.
pub fn owner_from_zone_name(name: &str, prefix: &str) -> Option<String> {
    let rest = name.strip_prefix(prefix)?;
    let owner = match rest.split_once('_') {
        Some((stamp, owner))
            if !stamp.is_empty() && stamp.chars().all(|c| c.is_ascii_digit()) =>
        {
            owner
        }
        _ => rest,
    };
    (!owner.is_empty()).then(|| owner.to_string())
}
