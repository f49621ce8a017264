const LEADING_BLANKS: [char; 4] = [' ', '\t', '\r', '\n'];

/// Canonical phone form used to correlate candidates across campaigns and
/// the hiring pipeline: digits only, with a `+` kept when it leads the input.
pub fn normalize_phone(raw: &str) -> String {
    let trimmed = raw.trim_start_matches(LEADING_BLANKS);
    let mut normalized = String::with_capacity(trimmed.len());

    if trimmed.starts_with('+') {
        normalized.push('+');
    }
    normalized.extend(trimmed.chars().filter(|c| c.is_ascii_digit()));

    if normalized == "+" {
        String::new()
    } else {
        normalized
    }
}

/// Postgres expression computing [`normalize_phone`] over `column`.
/// Symbol-only values yield NULL where the Rust form is empty, so neither
/// ever equals a non-empty lookup key.
pub fn sql_normalized_phone(column: &str) -> String {
    format!(
        r"NULLIF(CASE WHEN ltrim({column}, E' \t\r\n') LIKE '+%' THEN '+' ELSE '' END || regexp_replace({column}, '[^0-9]', '', 'g'), '+')"
    )
}
