//! IEC 61162-450 tag-block parsing: `\s:source,c:timestamp,g:seq-total-id*XX\`.
//!
//! Translated from `Source/Marine/NMEA.cpp::parseTagBlock`.

use super::sentence::checksum;
use crate::error::{Error, Result};

/// Fields recovered from a tag block. Any field not present keeps its
/// "absent" sentinel (`station = None`, `rxtime_us = None`, `group_id = 0`).
#[derive(Debug, Clone, Default)]
pub struct TagBlock {
    /// Station id from an `s:s<digits>` field.
    pub station: Option<i32>,
    /// Receive time in microseconds since the epoch, from a `c:` field.
    pub rxtime_us: Option<i64>,
    /// Reassembly group id from a `g:seq-total-id` field. 0 if absent.
    pub group_id: u32,
}

/// Split `line` (starting with `\`) into its tag-block content and the
/// trailing NMEA sentence, verifying the tag block's own checksum when
/// `strict` (a failed checksum is otherwise only informational).
pub fn parse(line: &str, strict: bool) -> Result<(TagBlock, &str)> {
    let rest = &line[1..];
    let tag_end = rest
        .find('\\')
        .ok_or_else(|| Error::Protocol("tag block: no closing backslash".into()))?;
    let mut body = &rest[..tag_end];
    let nmea = &rest[tag_end + 1..];
    if nmea.is_empty() {
        return Err(Error::Protocol("tag block: no NMEA sentence follows".into()));
    }

    if let Some(star) = body.find('*') {
        let declared = body.as_bytes().get(star + 1..star + 3).and_then(|h| {
            let hi = (h[0] as char).to_digit(16)?;
            let lo = (h[1] as char).to_digit(16)?;
            Some(((hi << 4) | lo) as u8)
        });
        let computed = checksum(body[..star].as_bytes());
        if strict && declared != Some(computed) {
            return Err(Error::Checksum {
                expected: declared.unwrap_or(0),
                found: computed,
            });
        }
        body = &body[..star];
    }

    let mut tb = TagBlock::default();
    for field in body.split(',') {
        let bytes = field.as_bytes();
        if bytes.len() < 2 || bytes[1] != b':' {
            continue;
        }
        let key = bytes[0];
        let value = &field[2..];
        match key {
            b's' => {
                if let Some(stripped) = value.strip_prefix('s') {
                    if let Ok(id) = stripped.parse::<i32>() {
                        tb.station = Some(id);
                    }
                }
            }
            b'c' => {
                tb.rxtime_us = parse_timestamp(value);
            }
            b'g' => {
                let parts: Vec<&str> = value.split('-').collect();
                if parts.len() == 3 {
                    if let Ok(gid) = parts[2].parse::<u32>() {
                        tb.group_id = gid;
                    }
                }
            }
            _ => {}
        }
    }

    Ok((tb, nmea))
}

/// `c:` auto-detects its unit: a fractional value is seconds with a
/// fractional part; an integer beyond `1e11` in magnitude is already
/// milliseconds; otherwise it's whole seconds.
fn parse_timestamp(value: &str) -> Option<i64> {
    if value.contains('.') {
        let seconds: f64 = value.parse().ok()?;
        return Some((seconds * 1_000_000.0).round() as i64);
    }
    let raw: i64 = value.parse().ok()?;
    if raw.abs() > 100_000_000_000 {
        Some(raw * 1000)
    } else {
        Some(raw * 1_000_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_source_time_and_group() {
        let line = "\\s:r003669945,c:1681812049*41\\!AIVDM,1,1,,B,x,0*00";
        let (tb, nmea) = parse(line, false).unwrap();
        assert_eq!(tb.station, Some(3669945));
        assert_eq!(tb.rxtime_us, Some(1_681_812_049_000_000));
        assert!(nmea.starts_with("!AIVDM"));
    }

    #[test]
    fn group_id_is_last_dash_field() {
        let line = "\\g:1-2-1234*00\\!AIVDM,x";
        let (tb, _) = parse(line, false).unwrap();
        assert_eq!(tb.group_id, 1234);
    }

    #[test]
    fn missing_closing_backslash_errors() {
        assert!(parse("\\s:foo", false).is_err());
    }
}
