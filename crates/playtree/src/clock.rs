//! The two textual time grammars shared by the playlist dialects, plus the
//! repeat-count literal.
//!
//! The clock literal is `[[hh:]mm:]ss[.fract]` — fewer fields shift meaning
//! to the right, and the fraction is read at millisecond scale. The SMIL
//! clock value adds `indefinite` and the timecount form (`1.5h`, `2min`,
//! `30s`, `250ms`, bare digits meaning seconds), whose fractional part
//! cascades into the next smaller unit.

use crate::error::{PlaytreeError, PlaytreeResult};

/// A resolved duration. Absence of a `Dur` altogether means "unspecified".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dur {
    Millis(u64),
    Forever,
}

impl Dur {
    pub fn is_forever(&self) -> bool {
        matches!(self, Dur::Forever)
    }

    pub fn millis(&self) -> Option<u64> {
        match self {
            Dur::Millis(ms) => Some(*ms),
            Dur::Forever => None,
        }
    }
}

/// Scan a run of ASCII digits at `*pos`, saturating on overflow. Fails on
/// an empty run.
fn scan_int(bytes: &[u8], pos: &mut usize) -> Option<u64> {
    let start = *pos;
    let mut value: u64 = 0;
    while let Some(digit) = bytes.get(*pos).filter(|b| b.is_ascii_digit()) {
        value = value
            .saturating_mul(10)
            .saturating_add(u64::from(digit - b'0'));
        *pos += 1;
    }
    (*pos != start).then_some(value)
}

fn to_millis(hh: u64, mm: u64, ss: u64, millis: u64) -> u64 {
    hh.saturating_mul(3600)
        .saturating_add(mm.saturating_mul(60))
        .saturating_add(ss)
        .saturating_mul(1000)
        .saturating_add(millis)
}

/// Scan an optional `.fract` suffix into whole milliseconds. At most four
/// digits are read; the scale bottoms out at zero so a fourth digit cannot
/// contribute.
fn scan_fraction_millis(bytes: &[u8], pos: &mut usize) -> u64 {
    let mut millis = 0;
    let mut scale = 100;
    let mut digits = 0;
    while digits < 4 {
        let Some(digit) = bytes.get(*pos).filter(|b| b.is_ascii_digit()) else {
            break;
        };
        millis += scale * u64::from(digit - b'0');
        scale /= 10;
        *pos += 1;
        digits += 1;
    }
    millis
}

fn grammar_error(input: &str) -> PlaytreeError {
    PlaytreeError::Grammar(input.to_string())
}

/// Parse the `[[hh:]mm:]ss[.fract]` clock literal.
///
/// One field is seconds, two are minutes:seconds, three are
/// hours:minutes:seconds. Trailing content after the fraction is ignored,
/// except that a full three-field clock with non-digit trailing content is
/// an error.
pub fn parse_clock_literal(input: &str) -> PlaytreeResult<Dur> {
    let bytes = input.as_bytes();
    let mut pos = 0;

    if !bytes.first().is_some_and(|b| b.is_ascii_digit()) {
        return Err(grammar_error(input));
    }

    let mut values = [0u64; 3];
    let mut fields = 0;
    for value in values.iter_mut() {
        *value = scan_int(bytes, &mut pos).ok_or_else(|| grammar_error(input))?;
        fields += 1;
        if bytes.get(pos) != Some(&b':') {
            break;
        }
        pos += 1;
    }

    let mut millis = 0;
    if bytes.get(pos) == Some(&b'.') {
        pos += 1;
        millis = scan_fraction_millis(bytes, &mut pos);
        if fields == 3 && pos < bytes.len() && !bytes[pos].is_ascii_digit() {
            return Err(grammar_error(input));
        }
    }

    let (hh, mm, ss) = match fields {
        1 => (0, 0, values[0]),
        2 => (0, values[0], values[1]),
        _ => (values[0], values[1], values[2]),
    };

    Ok(Dur::Millis(to_millis(hh, mm, ss, millis)))
}

/// Scan a `.digits` fraction as a plain ratio, for the timecount cascade.
fn scan_fraction_ratio(bytes: &[u8], pos: &mut usize) -> f64 {
    debug_assert_eq!(bytes.get(*pos), Some(&b'.'));
    *pos += 1;
    let mut numerator = 0.0;
    let mut denominator = 1.0;
    while let Some(digit) = bytes.get(*pos).filter(|b| b.is_ascii_digit()) {
        numerator = numerator * 10.0 + f64::from(digit - b'0');
        denominator *= 10.0;
        *pos += 1;
    }
    numerator / denominator
}

/// Parse a SMIL clock value: `indefinite`, a clock literal (anything with a
/// `:`), or a timecount with a unit suffix.
pub fn parse_smil_clock(input: &str) -> PlaytreeResult<Dur> {
    if input.eq_ignore_ascii_case("indefinite") {
        return Ok(Dur::Forever);
    }

    if input.contains(':') {
        return parse_clock_literal(input);
    }

    let bytes = input.as_bytes();
    let mut pos = 0;
    let mut hh = 0;
    let mut mm = 0;
    let mut ss = 0;
    let mut millis = 0;

    // Suffix checks are ordered so that "ms" is tried before the bare "s".
    if input.ends_with('h') {
        hh = scan_int(bytes, &mut pos).ok_or_else(|| grammar_error(input))?;
        if bytes.get(pos) == Some(&b'.') {
            // Fractional hours become minutes.
            mm = (60.0 * scan_fraction_ratio(bytes, &mut pos)) as u64;
        }
    } else if input.ends_with("min") {
        mm = scan_int(bytes, &mut pos).ok_or_else(|| grammar_error(input))?;
        if bytes.get(pos) == Some(&b'.') {
            ss = (60.0 * scan_fraction_ratio(bytes, &mut pos)) as u64;
        }
    } else if input.ends_with("ms") {
        millis = scan_int(bytes, &mut pos).ok_or_else(|| grammar_error(input))?;
    } else if input.ends_with('s') || bytes.last().is_some_and(|b| b.is_ascii_digit()) {
        ss = scan_int(bytes, &mut pos).ok_or_else(|| grammar_error(input))?;
        if bytes.get(pos) == Some(&b'.') {
            millis = (1000.0 * scan_fraction_ratio(bytes, &mut pos)) as u64;
        }
    } else {
        return Err(grammar_error(input));
    }

    Ok(Dur::Millis(to_millis(hh, mm, ss, millis)))
}

/// Parse a repeat count: `indefinite` means repeat forever (-1), anything
/// else is a floating literal rounded up to the next whole repetition.
pub fn parse_repeat_count(input: &str) -> PlaytreeResult<i32> {
    if input.eq_ignore_ascii_case("indefinite") {
        return Ok(-1);
    }

    let value: f64 = input.trim().parse().map_err(|_| grammar_error(input))?;
    Ok(value.ceil() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_literal_field_shift() {
        assert_eq!(parse_clock_literal("7").unwrap(), Dur::Millis(7_000));
        assert_eq!(parse_clock_literal("1:30").unwrap(), Dur::Millis(90_000));
        assert_eq!(
            parse_clock_literal("1:02:03").unwrap(),
            Dur::Millis(3_723_000)
        );
    }

    #[test]
    fn test_clock_literal_fraction_is_millisecond_scale() {
        assert_eq!(
            parse_clock_literal("1:02:03.50").unwrap(),
            Dur::Millis(3_723_500)
        );
        assert_eq!(parse_clock_literal("2.5").unwrap(), Dur::Millis(2_500));
        // Fourth digit is beyond the scale; fifth is ignored entirely.
        assert_eq!(parse_clock_literal("0.12345").unwrap(), Dur::Millis(123));
    }

    #[test]
    fn test_clock_literal_second_dot_is_ignored() {
        assert_eq!(parse_clock_literal("1.2.3").unwrap(), Dur::Millis(1_200));
    }

    #[test]
    fn test_clock_literal_leading_non_digit_is_fatal() {
        assert!(parse_clock_literal(":30").is_err());
        assert!(parse_clock_literal("abc").is_err());
        assert!(parse_clock_literal("").is_err());
    }

    #[test]
    fn test_clock_literal_missing_field_after_colon() {
        assert!(parse_clock_literal("1:").is_err());
    }

    #[test]
    fn test_full_clock_rejects_trailing_garbage() {
        assert!(parse_clock_literal("1:02:03.5x").is_err());
        // Shorter forms tolerate it.
        assert_eq!(parse_clock_literal("3.5x").unwrap(), Dur::Millis(3_500));
    }

    #[test]
    fn test_smil_indefinite() {
        assert_eq!(parse_smil_clock("indefinite").unwrap(), Dur::Forever);
        assert_eq!(parse_smil_clock("INDEFINITE").unwrap(), Dur::Forever);
    }

    #[test]
    fn test_smil_delegates_clock_literal() {
        assert_eq!(
            parse_smil_clock("1:02:03").unwrap(),
            Dur::Millis(3_723_000)
        );
    }

    #[test]
    fn test_smil_timecount_units() {
        assert_eq!(parse_smil_clock("2h").unwrap(), Dur::Millis(7_200_000));
        assert_eq!(parse_smil_clock("3min").unwrap(), Dur::Millis(180_000));
        assert_eq!(parse_smil_clock("30s").unwrap(), Dur::Millis(30_000));
        assert_eq!(parse_smil_clock("250ms").unwrap(), Dur::Millis(250));
        assert_eq!(parse_smil_clock("45").unwrap(), Dur::Millis(45_000));
    }

    #[test]
    fn test_smil_timecount_fraction_cascades() {
        // Fractional hours turn into minutes, minutes into seconds, seconds
        // into milliseconds. Fractional milliseconds are truncated.
        assert_eq!(parse_smil_clock("1.5h").unwrap(), Dur::Millis(5_400_000));
        assert_eq!(parse_smil_clock("1.5min").unwrap(), Dur::Millis(90_000));
        assert_eq!(parse_smil_clock("1.5s").unwrap(), Dur::Millis(1_500));
        assert_eq!(parse_smil_clock("1.5ms").unwrap(), Dur::Millis(1));
    }

    #[test]
    fn test_smil_timecount_requires_leading_digits() {
        assert!(parse_smil_clock("h").is_err());
        assert!(parse_smil_clock(".5h").is_err());
        assert!(parse_smil_clock("abc").is_err());
    }

    #[test]
    fn test_repeat_count() {
        assert_eq!(parse_repeat_count("indefinite").unwrap(), -1);
        assert_eq!(parse_repeat_count("3").unwrap(), 3);
        assert_eq!(parse_repeat_count("2.2").unwrap(), 3);
        assert!(parse_repeat_count("often").is_err());
    }
}
