//! QIDO query-parameter translation at the HTTP boundary.

/// Translate DICOM matching wildcards (`*`, `?`) to SQL LIKE wildcards,
/// escaping any literal `%`/`_`/`\` first. Returns `None` when the value
/// contains no wildcard and an exact match should be used instead.
pub fn dicom_wildcards_to_like(value: &str) -> Option<String> {
    if !value.contains('*') && !value.contains('?') {
        return None;
    }
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '*' => out.push('%'),
            '?' => out.push('_'),
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            other => out.push(other),
        }
    }
    Some(out)
}

/// Parse a QIDO StudyDate match: `YYYYMMDD` or `YYYYMMDD-YYYYMMDD`.
/// Open-ended ranges (`-YYYYMMDD`, `YYYYMMDD-`) are accepted per PS3.18.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateMatch {
    Exact(String),
    Range {
        from: Option<String>,
        to: Option<String>,
    },
}

pub fn parse_date_match(value: &str) -> Option<DateMatch> {
    let value = value.trim();
    let is_da = |s: &str| s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit());

    match value.split_once('-') {
        None => is_da(value).then(|| DateMatch::Exact(value.to_string())),
        Some((from, to)) => {
            let from = (!from.is_empty()).then(|| from.to_string());
            let to = (!to.is_empty()).then(|| to.to_string());
            if from.as_deref().is_some_and(|s| !is_da(s))
                || to.as_deref().is_some_and(|s| !is_da(s))
                || (from.is_none() && to.is_none())
            {
                return None;
            }
            Some(DateMatch::Range { from, to })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcards_translate() {
        assert_eq!(dicom_wildcards_to_like("DOE*"), Some("DOE%".into()));
        assert_eq!(dicom_wildcards_to_like("D?E"), Some("D_E".into()));
        assert_eq!(dicom_wildcards_to_like("A*B?C"), Some("A%B_C".into()));
        assert_eq!(dicom_wildcards_to_like("plain"), None);
    }

    #[test]
    fn like_specials_are_escaped() {
        assert_eq!(dicom_wildcards_to_like("100%*"), Some("100\\%%".into()));
        assert_eq!(dicom_wildcards_to_like("a_b*"), Some("a\\_b%".into()));
    }

    #[test]
    fn date_single_and_range() {
        assert_eq!(
            parse_date_match("20240110"),
            Some(DateMatch::Exact("20240110".into()))
        );
        assert_eq!(
            parse_date_match("20240101-20240131"),
            Some(DateMatch::Range {
                from: Some("20240101".into()),
                to: Some("20240131".into())
            })
        );
        assert_eq!(
            parse_date_match("-20240131"),
            Some(DateMatch::Range {
                from: None,
                to: Some("20240131".into())
            })
        );
        assert_eq!(
            parse_date_match("20240101-"),
            Some(DateMatch::Range {
                from: Some("20240101".into()),
                to: None
            })
        );
    }

    #[test]
    fn malformed_dates_are_rejected() {
        assert_eq!(parse_date_match("2024011"), None);
        assert_eq!(parse_date_match("2024-01-10"), None);
        assert_eq!(parse_date_match("-"), None);
        assert_eq!(parse_date_match("abcdefgh"), None);
    }
}
