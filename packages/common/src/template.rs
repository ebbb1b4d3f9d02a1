//! Tag-based storage path templates.
//!
//! A template such as `{now,date,yyyy/MM/dd}/{0020000D,hash}/{00080018,hash}`
//! is compiled once and resolved per instance against its attribute set.
//! Resolution must be deterministic for a given (template, attributes, time)
//! so resends land on the same relative path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, Timelike, Utc};
use md5::{Digest, Md5};
use thiserror::Error;

use crate::dicom::{Dataset, Tag, tags};

/// Default placement: date bucket, then hashed study / series / SOP UIDs.
pub const DEFAULT_TEMPLATE: &str =
    "{now,date,yyyy/MM/dd}/{0020000D,hash}/{0020000E,hash}/{00080018,hash}";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("invalid template near '{0}'")]
    Parse(String),

    #[error("template must reference tag 00080018 (SOP instance UID)")]
    MissingSopReference,
}

#[derive(Debug, Clone)]
enum Transform {
    None,
    Hash,
    Md5,
    Upper,
    UrlEncoded,
    Number,
    Offset(i64),
    Slice { start: i64, end: Option<i64> },
    Date(String),
    Time(String),
}

#[derive(Debug, Clone)]
enum Part {
    Literal(String),
    Attr { tag: Tag, transform: Transform },
    NowDate { back: Period, pattern: String },
    NowTime { pattern: String },
    Rnd(RndKind),
}

#[derive(Debug, Clone, Copy)]
enum RndKind {
    Hex,
    Uuid,
    Uid,
}

#[derive(Debug, Clone, Copy, Default)]
struct Period {
    months: u32,
    days: u64,
}

/// A compiled path template.
#[derive(Debug)]
pub struct PathTemplate {
    parts: Vec<Part>,
}

impl PathTemplate {
    /// Compile a template string, validating that it references the SOP
    /// instance UID (uniqueness per instance depends on it).
    pub fn compile(template: &str) -> Result<Self, TemplateError> {
        let parts = parse(template)?;
        let references_sop = parts.iter().any(|p| {
            matches!(p, Part::Attr { tag, .. } if *tag == tags::SOP_INSTANCE_UID)
        });
        if !references_sop {
            return Err(TemplateError::MissingSopReference);
        }
        Ok(Self { parts })
    }

    /// Compile through the process-wide cache. Thread-safe; reload paths
    /// call [`clear_cache`] when volume templates change.
    pub fn compiled(template: &str) -> Result<Arc<Self>, TemplateError> {
        let cache = compile_cache();
        {
            let guard = cache.lock().expect("template cache poisoned");
            if let Some(hit) = guard.get(template) {
                return Ok(hit.clone());
            }
        }
        let compiled = Arc::new(Self::compile(template)?);
        cache
            .lock()
            .expect("template cache poisoned")
            .insert(template.to_string(), compiled.clone());
        Ok(compiled)
    }

    /// Resolve the relative storage path `{tenant}/{formatted}`.
    pub fn resolve(&self, tenant_code: &str, attrs: &Dataset, now: DateTime<Utc>) -> String {
        let mut out = String::with_capacity(64);
        out.push_str(tenant_code);
        out.push('/');
        for part in &self.parts {
            match part {
                Part::Literal(s) => out.push_str(s),
                Part::Attr { tag, transform } => {
                    out.push_str(&apply(attrs.string(*tag), transform, now));
                }
                Part::NowDate { back, pattern } => {
                    let date = now.date_naive() - Months::new(back.months) - Days::new(back.days);
                    out.push_str(&format_date(date, pattern));
                }
                Part::NowTime { pattern } => {
                    out.push_str(&format_time(now.time(), pattern));
                }
                Part::Rnd(kind) => out.push_str(&render_rnd(*kind)),
            }
        }
        out
    }
}

pub fn clear_cache() {
    compile_cache()
        .lock()
        .expect("template cache poisoned")
        .clear();
}

fn compile_cache() -> &'static Mutex<HashMap<String, Arc<PathTemplate>>> {
    static CACHE: OnceLock<Mutex<HashMap<String, Arc<PathTemplate>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn parse(template: &str) -> Result<Vec<Part>, TemplateError> {
    let mut parts = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        if open > 0 {
            parts.push(Part::Literal(rest[..open].to_string()));
        }
        let close = rest[open..]
            .find('}')
            .ok_or_else(|| TemplateError::Parse(rest[open..].to_string()))?
            + open;
        parts.push(parse_substitution(&rest[open + 1..close])?);
        rest = &rest[close + 1..];
    }
    if !rest.is_empty() {
        parts.push(Part::Literal(rest.to_string()));
    }
    Ok(parts)
}

fn parse_substitution(body: &str) -> Result<Part, TemplateError> {
    let args: Vec<&str> = body.split(',').collect();
    let head = args[0].trim();

    if head == "rnd" {
        return match args.get(1).map(|s| s.trim()) {
            None => Ok(Part::Rnd(RndKind::Hex)),
            Some("uuid") => Ok(Part::Rnd(RndKind::Uuid)),
            Some("uid") => Ok(Part::Rnd(RndKind::Uid)),
            _ => Err(TemplateError::Parse(body.to_string())),
        };
    }

    if head == "now" {
        let kind = args
            .get(1)
            .map(|s| s.trim())
            .ok_or_else(|| TemplateError::Parse(body.to_string()))?;
        let pattern = args
            .get(2)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| TemplateError::Parse(body.to_string()))?;
        if kind == "time" {
            return Ok(Part::NowTime { pattern });
        }
        if let Some(period) = kind.strip_prefix("date") {
            let back = match period.strip_prefix('-') {
                None if period.is_empty() => Period::default(),
                Some(p) => parse_period(p).ok_or_else(|| TemplateError::Parse(body.to_string()))?,
                None => return Err(TemplateError::Parse(body.to_string())),
            };
            return Ok(Part::NowDate { back, pattern });
        }
        return Err(TemplateError::Parse(body.to_string()));
    }

    let tag = Tag::parse(head).ok_or_else(|| TemplateError::Parse(body.to_string()))?;
    let transform = match args.get(1).map(|s| s.trim()) {
        None => Transform::None,
        Some("hash") => Transform::Hash,
        Some("md5") => Transform::Md5,
        Some("upper") => Transform::Upper,
        Some("urlencoded") => Transform::UrlEncoded,
        Some("number") => Transform::Number,
        Some("offset") => {
            let n = args
                .get(2)
                .and_then(|s| s.trim().parse().ok())
                .ok_or_else(|| TemplateError::Parse(body.to_string()))?;
            Transform::Offset(n)
        }
        Some("slice") => {
            let start = args
                .get(2)
                .and_then(|s| s.trim().parse().ok())
                .ok_or_else(|| TemplateError::Parse(body.to_string()))?;
            let end = match args.get(3) {
                Some(s) => Some(
                    s.trim()
                        .parse()
                        .map_err(|_| TemplateError::Parse(body.to_string()))?,
                ),
                None => None,
            };
            Transform::Slice { start, end }
        }
        Some("date") => Transform::Date(
            args.get(2)
                .map(|s| s.trim().to_string())
                .ok_or_else(|| TemplateError::Parse(body.to_string()))?,
        ),
        Some("time") => Transform::Time(
            args.get(2)
                .map(|s| s.trim().to_string())
                .ok_or_else(|| TemplateError::Parse(body.to_string()))?,
        ),
        Some(_) => return Err(TemplateError::Parse(body.to_string())),
    };
    Ok(Part::Attr { tag, transform })
}

/// ISO-8601 period subset: P[nY][nM][nW][nD].
fn parse_period(s: &str) -> Option<Period> {
    let rest = s.strip_prefix('P')?;
    let mut period = Period::default();
    let mut number = String::new();
    for c in rest.chars() {
        if c.is_ascii_digit() {
            number.push(c);
            continue;
        }
        let n: u64 = number.parse().ok()?;
        number.clear();
        match c {
            'Y' => period.months += n as u32 * 12,
            'M' => period.months += n as u32,
            'W' => period.days += n * 7,
            'D' => period.days += n,
            _ => return None,
        }
    }
    if !number.is_empty() {
        return None;
    }
    Some(period)
}

fn apply(value: Option<&str>, transform: &Transform, now: DateTime<Utc>) -> String {
    match transform {
        Transform::None => value.unwrap_or_default().to_string(),
        Transform::Upper => value.unwrap_or_default().to_uppercase(),
        // Missing value: the substitution is omitted.
        Transform::Hash => value.map(java_hash_hex).unwrap_or_default(),
        Transform::Md5 => value.map(md5_base32).unwrap_or_default(),
        Transform::UrlEncoded => value.map(url_encode).unwrap_or_default(),
        Transform::Number => value
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0)
            .to_string(),
        Transform::Offset(n) => (value
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0)
            + n)
            .to_string(),
        Transform::Slice { start, end } => value
            .map(|v| slice(v, *start, *end))
            .unwrap_or_default(),
        Transform::Date(pattern) => {
            let date = value
                .and_then(|v| NaiveDate::parse_from_str(v.trim(), "%Y%m%d").ok())
                .unwrap_or_else(|| now.date_naive());
            format_date(date, pattern)
        }
        Transform::Time(pattern) => {
            let time = value
                .and_then(|v| NaiveTime::parse_from_str(v.trim(), "%H%M%S").ok())
                .unwrap_or_else(|| now.time());
            format_time(time, pattern)
        }
    }
}

/// `String::hashCode` over UTF-16 code units, rendered as eight lowercase
/// hex digits.
fn java_hash_hex(value: &str) -> String {
    let mut h: i32 = 0;
    for unit in value.encode_utf16() {
        h = h.wrapping_mul(31).wrapping_add(unit as i32);
    }
    format!("{:08x}", h as u32)
}

const BASE32_ALPHABET: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

/// MD5 rendered as 26 characters in the `0-9a-v` base32 alphabet,
/// most-significant bits first.
fn md5_base32(value: &str) -> String {
    let digest = Md5::digest(value.as_bytes());
    let v = u128::from_be_bytes(digest.into());
    let mut out = String::with_capacity(26);
    for i in 0..26u32 {
        let shift = 125u32.saturating_sub(5 * i);
        let index = if i == 0 {
            (v >> 125) as usize
        } else {
            ((v >> shift) & 0x1F) as usize
        };
        out.push(BASE32_ALPHABET[index] as char);
    }
    out
}

/// RFC 3986 percent-encoding, unreserved characters pass through.
fn url_encode(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                String::from(b as char)
            }
            _ => format!("%{b:02X}"),
        })
        .collect()
}

/// Substring by character index with negative-index support.
fn slice(value: &str, start: i64, end: Option<i64>) -> String {
    let chars: Vec<char> = value.chars().collect();
    let len = chars.len() as i64;
    let clamp = |i: i64| -> usize {
        let i = if i < 0 { len + i } else { i };
        i.clamp(0, len) as usize
    };
    let from = clamp(start);
    let to = clamp(end.unwrap_or(len));
    if from >= to {
        return String::new();
    }
    chars[from..to].iter().collect()
}

fn render_rnd(kind: RndKind) -> String {
    match kind {
        RndKind::Hex => format!("{:08x}", rand::random::<u32>()),
        RndKind::Uuid => uuid::Uuid::new_v4().to_string(),
        // UUID-derived UID under the 2.25 arc.
        RndKind::Uid => format!("2.25.{}", uuid::Uuid::new_v4().as_u128()),
    }
}

/// Translate a Java-style date pattern (`yyyy/MM/dd`) and format.
fn format_date(date: NaiveDate, pattern: &str) -> String {
    format_pattern(pattern, |run, out| match run {
        "yyyy" => out.push_str(&format!("{:04}", date.year())),
        "yy" => out.push_str(&format!("{:02}", date.year() % 100)),
        "MM" => out.push_str(&format!("{:02}", date.month())),
        "dd" => out.push_str(&format!("{:02}", date.day())),
        other => out.push_str(other),
    })
}

fn format_time(time: NaiveTime, pattern: &str) -> String {
    format_pattern(pattern, |run, out| match run {
        "HH" => out.push_str(&format!("{:02}", time.hour())),
        "mm" => out.push_str(&format!("{:02}", time.minute())),
        "ss" => out.push_str(&format!("{:02}", time.second())),
        other => out.push_str(other),
    })
}

fn format_pattern(pattern: &str, mut emit: impl FnMut(&str, &mut String)) -> String {
    let mut out = String::new();
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_alphabetic() {
            let mut j = i;
            while j < chars.len() && chars[j] == c {
                j += 1;
            }
            let run: String = chars[i..j].iter().collect();
            emit(&run, &mut out);
            i = j;
        } else {
            out.push(c);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use crate::dicom::{DataElement, ElementValue, Vr};

    use super::*;

    fn attrs() -> Dataset {
        let mut ds = Dataset::default();
        let mut push = |tag, value: &str| {
            ds.push(DataElement {
                tag,
                vr: Vr::UI,
                value: ElementValue::Str(value.to_string()),
            });
        };
        push(tags::STUDY_INSTANCE_UID, "1.2.1");
        push(tags::SERIES_INSTANCE_UID, "1.2.2");
        push(tags::SOP_INSTANCE_UID, "1.2.3");
        push(tags::PATIENT_ID, "P 1/a");
        push(tags::INSTANCE_NUMBER, "7");
        push(tags::STUDY_DATE, "20240110");
        ds
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 13, 5, 9).unwrap()
    }

    #[test]
    fn default_template_resolves_deterministically() {
        let template = PathTemplate::compile(DEFAULT_TEMPLATE).unwrap();
        let a = template.resolve("h1", &attrs(), fixed_now());
        let b = template.resolve("h1", &attrs(), fixed_now());
        assert_eq!(a, b);
        assert!(a.starts_with("h1/2024/03/15/"));
        assert_eq!(a.split('/').count(), 7);
    }

    #[test]
    fn hash_matches_java_string_hash_code() {
        // "abc".hashCode() == 96354
        assert_eq!(java_hash_hex("abc"), "00017862");
        // A hash with a negative i32 value renders as its u32 bit pattern.
        assert_eq!(java_hash_hex("polygenelubricants"), format!("{:08x}", 0x80000000u32));
    }

    #[test]
    fn md5_uses_custom_base32_alphabet() {
        let encoded = md5_base32("1.2.3");
        assert_eq!(encoded.len(), 26);
        assert!(encoded.bytes().all(|b| BASE32_ALPHABET.contains(&b)));
        assert_eq!(encoded, md5_base32("1.2.3"));
        assert_ne!(encoded, md5_base32("1.2.4"));
    }

    #[test]
    fn slice_supports_negative_indices() {
        let template = PathTemplate::compile("{0020000D,slice,-3}/{00080018}").unwrap();
        let path = template.resolve("h1", &attrs(), fixed_now());
        assert_eq!(path, "h1/2.1/1.2.3");

        let template = PathTemplate::compile("{0020000D,slice,0,3}/{00080018}").unwrap();
        assert_eq!(template.resolve("h1", &attrs(), fixed_now()), "h1/1.2/1.2.3");
    }

    #[test]
    fn urlencoded_and_upper() {
        let template = PathTemplate::compile("{00100020,urlencoded}/{00100020,upper}/{00080018}").unwrap();
        let path = template.resolve("h1", &attrs(), fixed_now());
        assert_eq!(path, "h1/P%201%2Fa/P 1/A/1.2.3");
    }

    #[test]
    fn number_and_offset() {
        let template = PathTemplate::compile("{00200013,number}/{00200013,offset,10}/{00080018}").unwrap();
        assert_eq!(template.resolve("h1", &attrs(), fixed_now()), "h1/7/17/1.2.3");
    }

    #[test]
    fn missing_tag_policies() {
        let now = fixed_now();
        assert_eq!(apply(None, &Transform::None, now), "");
        assert_eq!(apply(None, &Transform::Upper, now), "");
        assert_eq!(apply(None, &Transform::Hash, now), "");
        assert_eq!(apply(None, &Transform::Md5, now), "");
        assert_eq!(apply(None, &Transform::UrlEncoded, now), "");
        assert_eq!(apply(None, &Transform::Number, now), "0");
        assert_eq!(apply(None, &Transform::Offset(5), now), "5");
        assert_eq!(
            apply(None, &Transform::Date("yyyy/MM/dd".into()), now),
            "2024/03/15"
        );
    }

    #[test]
    fn tag_date_formats_da_value() {
        let template = PathTemplate::compile("{00080020,date,yyyy/MM}/{00080018}").unwrap();
        assert_eq!(template.resolve("h1", &attrs(), fixed_now()), "h1/2024/01/1.2.3");
    }

    #[test]
    fn date_arithmetic_subtracts_period() {
        let template = PathTemplate::compile("{now,date-P1M,yyyy/MM/dd}/{00080018}").unwrap();
        assert_eq!(
            template.resolve("h1", &attrs(), fixed_now()),
            "h1/2024/02/15/1.2.3"
        );

        let template = PathTemplate::compile("{now,date-P1Y2D,yyyy/MM/dd}/{00080018}").unwrap();
        assert_eq!(
            template.resolve("h1", &attrs(), fixed_now()),
            "h1/2023/03/13/1.2.3"
        );
    }

    #[test]
    fn now_time_pattern() {
        let template = PathTemplate::compile("{now,time,HH}/{00080018}").unwrap();
        assert_eq!(template.resolve("h1", &attrs(), fixed_now()), "h1/13/1.2.3");
    }

    #[test]
    fn rnd_kinds_have_expected_shape() {
        assert_eq!(render_rnd(RndKind::Hex).len(), 8);
        assert!(uuid::Uuid::parse_str(&render_rnd(RndKind::Uuid)).is_ok());
        assert!(render_rnd(RndKind::Uid).starts_with("2.25."));
    }

    #[test]
    fn rejects_template_without_sop_uid() {
        let err = PathTemplate::compile("{now,date,yyyy}/{0020000D,hash}").unwrap_err();
        assert!(matches!(err, TemplateError::MissingSopReference));
    }

    #[test]
    fn rejects_malformed_substitutions() {
        for t in ["{xyz}", "{0008}", "{now,date}", "{00080018,slice}", "{unclosed"] {
            assert!(PathTemplate::compile(t).is_err(), "{t} should not compile");
        }
    }

    #[test]
    fn compile_cache_returns_same_instance() {
        clear_cache();
        let a = PathTemplate::compiled(DEFAULT_TEMPLATE).unwrap();
        let b = PathTemplate::compiled(DEFAULT_TEMPLATE).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        clear_cache();
    }
}
