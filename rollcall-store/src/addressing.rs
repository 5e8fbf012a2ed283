//! Zero-based in-memory coordinates ↔ the backing service's one-based,
//! lettered A1 notation.
//!
//! Column letters are bijective base 26: `A`..`Z`, then `AA`..`AZ`, `BA`..,
//! `ZZ`, `AAA`. A plain `'A' + n` translation breaks past column Z and
//! silently targets the wrong column, so every range the adapter sends goes
//! through [`column_letter`].

use std::fmt;

/// `0 → "A"`, `25 → "Z"`, `26 → "AA"`, `701 → "ZZ"`, `702 → "AAA"`.
pub fn column_letter(zero_based: usize) -> String {
    let mut n = zero_based + 1;
    let mut out = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Inverse of [`column_letter`]. Case-insensitive; `None` for empty or
/// non-alphabetic input.
pub fn column_index(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }
    let mut n: usize = 0;
    for ch in letters.chars() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        let digit = (ch.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        n = n.checked_mul(26)?.checked_add(digit)?;
    }
    Some(n - 1)
}

/// Top-left anchor of a rectangular write, in zero-based coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellRange {
    pub title: String,
    pub row: usize,
    pub col: usize,
}

impl CellRange {
    pub fn new(title: impl Into<String>, row: usize, col: usize) -> Self {
        Self {
            title: title.into(),
            row,
            col,
        }
    }

    /// Anchor at `A1` of `title`.
    pub fn origin(title: impl Into<String>) -> Self {
        Self::new(title, 0, 0)
    }

    /// `'Rush Index'!H3`, with embedded quotes doubled.
    pub fn to_a1(&self) -> String {
        format!(
            "'{}'!{}{}",
            self.title.replace('\'', "''"),
            column_letter(self.col),
            self.row + 1
        )
    }

    /// Parse `'Title'!B3`, `Title!B3`, or a bare title (anchored at `A1`).
    pub fn parse(a1: &str) -> Option<CellRange> {
        let (title, cell) = if let Some(rest) = a1.strip_prefix('\'') {
            let mut title = String::new();
            let mut chars = rest.char_indices().peekable();
            let mut end = None;
            while let Some((i, ch)) = chars.next() {
                if ch == '\'' {
                    if matches!(chars.peek(), Some((_, '\''))) {
                        title.push('\'');
                        chars.next();
                    } else {
                        end = Some(i + 1);
                        break;
                    }
                } else {
                    title.push(ch);
                }
            }
            let tail = &rest[end?..];
            match tail.strip_prefix('!') {
                Some(cell) => (title, Some(cell)),
                None if tail.is_empty() => (title, None),
                None => return None,
            }
        } else {
            match a1.rsplit_once('!') {
                Some((title, cell)) => (title.to_string(), Some(cell)),
                None => (a1.to_string(), None),
            }
        };
        if title.is_empty() {
            return None;
        }

        let Some(cell) = cell else {
            return Some(CellRange::origin(title));
        };
        let split = cell.find(|c: char| c.is_ascii_digit())?;
        let (letters, digits) = cell.split_at(split);
        let col = column_index(letters)?;
        let row: usize = digits.parse().ok()?;
        if row == 0 {
            return None;
        }
        Some(CellRange::new(title, row - 1, col))
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, "A")]
    #[case(7, "H")]
    #[case(25, "Z")]
    #[case(26, "AA")]
    #[case(27, "AB")]
    #[case(51, "AZ")]
    #[case(52, "BA")]
    #[case(701, "ZZ")]
    #[case(702, "AAA")]
    fn letters_are_bijective_base_26(#[case] index: usize, #[case] letters: &str) {
        assert_eq!(column_letter(index), letters);
        assert_eq!(column_index(letters), Some(index));
    }

    #[test]
    fn column_index_rejects_garbage() {
        assert_eq!(column_index(""), None);
        assert_eq!(column_index("A1"), None);
        assert_eq!(column_index("b"), Some(1));
    }

    #[test]
    fn a1_quotes_titles() {
        assert_eq!(CellRange::new("Rush Index", 2, 7).to_a1(), "'Rush Index'!H3");
        assert_eq!(CellRange::new("Bob's Tab", 0, 26).to_a1(), "'Bob''s Tab'!AA1");
    }

    #[rstest]
    #[case("'Rush Index'!H3", CellRange::new("Rush Index", 2, 7))]
    #[case("'Bob''s Tab'!AA1", CellRange::new("Bob's Tab", 0, 26))]
    #[case("Sigma!E10", CellRange::new("Sigma", 9, 4))]
    #[case("Sigma", CellRange::origin("Sigma"))]
    #[case("'Recruits - Fall'", CellRange::origin("Recruits - Fall"))]
    fn parse_accepts_service_forms(#[case] raw: &str, #[case] expected: CellRange) {
        assert_eq!(CellRange::parse(raw), Some(expected));
    }

    #[rstest]
    #[case("'Sigma")]
    #[case("'Sigma'x")]
    #[case("Sigma!A0")]
    #[case("Sigma!3")]
    #[case("")]
    fn parse_rejects_malformed(#[case] raw: &str) {
        assert_eq!(CellRange::parse(raw), None);
    }
}
