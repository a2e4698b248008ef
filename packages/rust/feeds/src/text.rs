//! Text helpers shared by the feed parsers.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use govsite_shared::{GovsiteError, Result};
use regex::{Captures, Regex};

/// Matches named and numeric character references left in element text.
static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z][a-zA-Z0-9]{1,31});")
        .expect("entity regex")
});

/// Naive layouts accepted after RFC 3339 fails. Values are taken as UTC.
const NAIVE_LAYOUTS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Offset-carrying layouts that RFC 3339 parsing rejects.
const OFFSET_LAYOUTS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%:z",
];

/// Decode a response body as UTF-8, dropping a leading byte-order mark.
pub(crate) fn decode_body(body: &[u8]) -> Result<&str> {
    let body = body.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(body);
    std::str::from_utf8(body).map_err(|_| GovsiteError::parse("Response body is not valid UTF-8."))
}

/// Decode HTML character references that survived XML parsing.
///
/// Unknown named references are left as-is.
pub(crate) fn unescape_html(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    ENTITY_RE
        .replace_all(text, |caps: &Captures<'_>| {
            let reference = &caps[1];
            decode_reference(reference).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn decode_reference(reference: &str) -> Option<String> {
    if let Some(numeric) = reference.strip_prefix('#') {
        let code = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => numeric.parse::<u32>().ok()?,
        };
        return char::from_u32(code).map(String::from);
    }
    let decoded = match reference {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => "\u{a0}",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "hellip" => "\u{2026}",
        "pound" => "\u{a3}",
        "euro" => "\u{20ac}",
        "copy" => "\u{a9}",
        _ => return None,
    };
    Some(decoded.to_string())
}

/// Parse a feed timestamp into UTC.
///
/// Accepts ISO 8601 / RFC 3339 (naive values are treated as UTC) and
/// RFC 2822. Returns `None` for empty or unrecognised input.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    // "2024-01-02 10:00:00Z" is valid ISO 8601 but not RFC 3339.
    let zulu_normalised = value
        .strip_suffix(['Z', 'z'])
        .map(|rest| format!("{rest}+00:00"));
    let candidate = zulu_normalised.as_deref().unwrap_or(value);

    for layout in OFFSET_LAYOUTS {
        if let Ok(dt) = DateTime::parse_from_str(candidate, layout) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for layout in NAIVE_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, layout) {
            return Some(naive.and_utc());
        }
    }

    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_rfc3339_with_offset() {
        let dt = parse_timestamp("2024-03-01T12:30:00+01:00").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 3, 1, 11, 30, 0).unwrap());
    }

    #[test]
    fn naive_iso_is_utc() {
        let dt = parse_timestamp("2024-03-01T12:30:00").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap());

        let dt = parse_timestamp("2024-03-01 12:30").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap());
    }

    #[test]
    fn space_separated_zulu() {
        let dt = parse_timestamp("2024-03-01 12:30:00Z").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap());
    }

    #[test]
    fn parses_rfc2822() {
        let dt = parse_timestamp("Tue, 02 Jan 2024 10:00:00 GMT").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap());

        let dt = parse_timestamp("Tue, 02 Jan 2024 10:00:00 +0200").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap());
    }

    #[test]
    fn garbage_is_none() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("   ").is_none());
        assert!(parse_timestamp("last tuesday").is_none());
    }

    #[test]
    fn unescapes_residual_entities() {
        assert_eq!(unescape_html("Fish &amp; chips"), "Fish & chips");
        assert_eq!(unescape_html("&lt;b&gt;bold&lt;/b&gt;"), "<b>bold</b>");
        assert_eq!(unescape_html("it&#39;s &#x2014; done"), "it's \u{2014} done");
        assert_eq!(unescape_html("&unknown; stays"), "&unknown; stays");
        assert_eq!(unescape_html("plain"), "plain");
    }

    #[test]
    fn decode_body_strips_bom() {
        assert_eq!(decode_body(b"\xEF\xBB\xBF<rss/>").unwrap(), "<rss/>");
        assert!(decode_body(&[0xff, 0xfe, 0x00]).is_err());
    }
}
