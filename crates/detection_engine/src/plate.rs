/// Canonical comparison key for a plate: uppercase, no whitespace.
///
/// Every plate lookup goes through this so that "ab 123" and "AB123" resolve
/// to the same vehicle, guest and lock key. Punctuation is kept as read.
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}
