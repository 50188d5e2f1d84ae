use chrono::format::{self, Parsed, StrftimeItems};
use chrono::{NaiveDateTime, TimeZone, Utc};
use log::warn;
use strum::{Display, EnumIter, IntoEnumIterator};

use crate::error::VmSqlError;

/// Tag values that stand for "no date recorded". They parse to 0.
const PLACEHOLDERS: [&str; 6] = ["", "$Date: $", "$Date$", "$Date:$", "$Date", "$$"];

/// Layout used by `format_timestamp`. Also the first grammar tried.
const CANONICAL_LAYOUT: &str = "%Y-%m-%d %H:%M:%S %z";

/// Timestamp grammars accepted by `parse_flexible_timestamp`, in the order
/// they are tried. New historical formats go at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum TimestampGrammar {
    /// `2011-08-09 08:20:34 +0200 (Tue, 09 Aug 2011)`
    Iso,
    /// `$Date: 2012-02-17 16:05:26 +0100 (Fr, 17. Feb 2012) $`
    TaggedIso,
    /// `Tue Aug 09 08:20:34 2011 +0200`
    Ctime,
    /// `$Date: Fri, 11 Nov 2011 14:42:28 +0100 $`
    TaggedRfc,
    /// `$Date: Fri Nov 11 14:42:28 2011 +0100 $`
    TaggedCtime,
}

impl TimestampGrammar {
    /// chrono layout of the wall-clock fields. The offset follows them.
    fn layout(self) -> &'static str {
        match self {
            Self::Iso => "%Y-%m-%d %H:%M:%S",
            Self::TaggedIso => "$Date: %Y-%m-%d %H:%M:%S",
            Self::Ctime => "%a %b %d %H:%M:%S %Y",
            Self::TaggedRfc => "$Date: %a, %d %b %Y %H:%M:%S",
            Self::TaggedCtime => "$Date: %a %b %d %H:%M:%S %Y",
        }
    }

    /// Index of the whitespace separated field that holds the `±HHMM` offset.
    fn offset_field(self) -> usize {
        match self {
            Self::Iso => 2,
            Self::TaggedIso => 3,
            Self::Ctime => 5,
            Self::TaggedRfc | Self::TaggedCtime => 6,
        }
    }

    /// The weekday name is read but not checked against the date, since
    /// hand-edited tags often get it wrong.
    fn parse_wall_clock(self, text: &str) -> Option<NaiveDateTime> {
        let mut parsed = Parsed::new();
        format::parse_and_remainder(&mut parsed, text, StrftimeItems::new(self.layout())).ok()?;
        parsed.weekday = None;
        parsed.to_naive_datetime_with_offset(0).ok()
    }

    /// Pull the numeric offset out of `text` as `(hours, minutes)`, signed.
    fn parse_offset(self, text: &str) -> Option<(i64, i64)> {
        let field = text.split_whitespace().nth(self.offset_field())?;
        let (negative, digits) = match field.as_bytes().first()? {
            b'-' => (true, &field[1..]),
            b'+' => (false, &field[1..]),
            _ => (false, field),
        };

        let end = digits
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(digits.len());
        if end == 0 || end > 4 {
            return None;
        }

        let value: i64 = digits[..end].parse().ok()?;
        let (hours, minutes) = (value / 100, value % 100);
        if minutes >= 60 {
            return None;
        }

        Some(if negative {
            (-hours, -minutes)
        } else {
            (hours, minutes)
        })
    }
}

/// Outcome of a successful parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedTimestamp {
    /// One of the known "no date" tag values.
    Placeholder,
    /// A real time, converted to UTC.
    Time {
        epoch: i64,
        grammar: TimestampGrammar,
    },
}

impl ParsedTimestamp {
    pub fn epoch(&self) -> i64 {
        match self {
            ParsedTimestamp::Placeholder => 0,
            ParsedTimestamp::Time { epoch, .. } => *epoch,
        }
    }
}

/// Parse a timestamp written in any of the supported grammars.
///
/// The wall-clock fields are matched first; the offset is then read
/// separately and applied so the result is UTC. A time whose offset cannot
/// be read is rejected.
pub fn parse(text: &str) -> Result<ParsedTimestamp, VmSqlError> {
    if PLACEHOLDERS.contains(&text) {
        return Ok(ParsedTimestamp::Placeholder);
    }

    let (grammar, naive) = TimestampGrammar::iter()
        .find_map(|grammar| grammar.parse_wall_clock(text).map(|n| (grammar, n)))
        .ok_or_else(|| VmSqlError::ParseError(format!("Failed to parse time: {}", text)))?;

    let (hours, minutes) = grammar.parse_offset(text).ok_or_else(|| {
        VmSqlError::ParseError(format!("Failed to parse timezone offset: {}", text))
    })?;

    // Offset is local minus UTC
    let epoch = naive.and_utc().timestamp() - (hours * 3600 + minutes * 60);

    Ok(ParsedTimestamp::Time { epoch, grammar })
}

/// Parse a timestamp to epoch seconds, 0 for placeholder tag values.
pub fn parse_flexible_timestamp(text: &str) -> Result<i64, VmSqlError> {
    parse(text).map(|parsed| parsed.epoch())
}

/// Best-effort parse for noisy historical data: logs the offending text and
/// returns 0 instead of failing.
pub fn parse_or_unset(text: &str) -> i64 {
    match parse_flexible_timestamp(text) {
        Ok(epoch) => epoch,
        Err(e) => {
            warn!("{}", e);
            0
        }
    }
}

/// Render `epoch` in the canonical grammar, in UTC.
pub fn format_timestamp(epoch: i64) -> Option<String> {
    Utc.timestamp_opt(epoch, 0)
        .single()
        .map(|dt| dt.format(CANONICAL_LAYOUT).to_string())
}

/// ISO 8601 rendering used in reports. The unset time renders as "".
pub fn iso_time(epoch: i64) -> Option<String> {
    if epoch == 0 {
        return Some(String::new());
    }

    Utc.timestamp_opt(epoch, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> i64 {
        Utc.with_ymd_and_hms(y, m, d, h, min, s)
            .single()
            .unwrap()
            .timestamp()
    }

    #[test]
    fn test_placeholders_are_unset() {
        for text in PLACEHOLDERS {
            assert_eq!(parse(text).unwrap(), ParsedTimestamp::Placeholder);
            assert_eq!(parse_flexible_timestamp(text).unwrap(), 0);
        }
    }

    #[test]
    fn test_each_grammar() {
        let cases = [
            (
                "2011-08-09 08:20:34 +0200 (Tue, 09 Aug 2011)",
                TimestampGrammar::Iso,
                utc(2011, 8, 9, 6, 20, 34),
            ),
            (
                "$Date: 2012-02-17 16:05:26 +0100 (Fr, 17. Feb 2012) $",
                TimestampGrammar::TaggedIso,
                utc(2012, 2, 17, 15, 5, 26),
            ),
            (
                "Tue Aug 09 08:20:34 2011 -0130",
                TimestampGrammar::Ctime,
                utc(2011, 8, 9, 9, 50, 34),
            ),
            (
                "$Date: Fri, 11 Nov 2011 14:42:28 +0100 $",
                TimestampGrammar::TaggedRfc,
                utc(2011, 11, 11, 13, 42, 28),
            ),
            (
                "$Date: Fri Nov 11 14:42:28 2011 +0100 $",
                TimestampGrammar::TaggedCtime,
                utc(2011, 11, 11, 13, 42, 28),
            ),
        ];

        for (text, grammar, epoch) in cases {
            assert_eq!(
                parse(text).unwrap(),
                ParsedTimestamp::Time { epoch, grammar },
                "parsing {}",
                text
            );
        }
    }

    #[test]
    fn test_wrong_weekday_is_ignored() {
        // 9 Aug 2011 was a Tuesday
        assert_eq!(
            parse_flexible_timestamp("Mon Aug 09 08:20:34 2011 +0200").unwrap(),
            1312870834
        );
        assert_eq!(
            parse_flexible_timestamp("$Date: Sun, 11 Nov 2011 14:42:28 +0100 $").unwrap(),
            utc(2011, 11, 11, 13, 42, 28)
        );
    }

    #[test]
    fn test_negative_offset_is_added() {
        assert_eq!(
            parse_flexible_timestamp("2020-01-01 00:00:00 -0500").unwrap(),
            utc(2020, 1, 1, 5, 0, 0)
        );
    }

    #[test]
    fn test_missing_offset_is_an_error() {
        let err = parse_flexible_timestamp("2011-08-09 08:20:34").unwrap_err();
        assert!(matches!(err, VmSqlError::ParseError(_)));

        let err = parse_flexible_timestamp("2011-08-09 08:20:34 CEST").unwrap_err();
        assert!(err.to_string().contains("offset"));
    }

    #[test]
    fn test_unparseable_text_is_an_error_and_unset() {
        let text = "sometime last tuesday";
        let err = parse_flexible_timestamp(text).unwrap_err();
        assert!(err.to_string().contains(text));
        assert_eq!(parse_or_unset(text), 0);
    }

    #[test]
    fn test_canonical_round_trip() {
        let text = "2011-08-09 06:20:34 +0000";
        let epoch = parse_flexible_timestamp(text).unwrap();
        assert_eq!(format_timestamp(epoch).unwrap(), text);
    }

    #[test]
    fn test_iso_time() {
        assert_eq!(iso_time(0).unwrap(), "");
        assert_eq!(
            iso_time(utc(2011, 8, 9, 6, 20, 34)).unwrap(),
            "2011-08-09T06:20:34Z"
        );
    }

    proptest! {
        #[test]
        fn prop_format_then_parse_is_identity(epoch in 1i64..4_102_444_800) {
            let text = format_timestamp(epoch).unwrap();
            prop_assert_eq!(parse_flexible_timestamp(&text).unwrap(), epoch);
        }
    }
}
