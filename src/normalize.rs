use compact_str::CompactString;

/// Normalize a candidate token before comparison.
///
/// Removes all whitespace (surrounding and internal), converts full-width
/// decimal digits (U+FF10..=U+FF19) to ASCII, and upper-cases ASCII
/// letters. Total function: unparseable input is returned normalized and
/// simply fails to match later.
pub fn normalize_token(raw: &str) -> CompactString {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '\u{FF10}'..='\u{FF19}' => {
                // Full-width digit block is contiguous, parallel to ASCII
                char::from_u32('0' as u32 + (c as u32 - 0xFF10)).unwrap_or(c)
            }
            _ => c.to_ascii_uppercase(),
        })
        .collect()
}
