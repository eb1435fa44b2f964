//! Content-ID generation and `cid:` reference rewriting.

use chrono::{DateTime, FixedOffset};
use regex::bytes::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Matches `src="cid:<name>"` and `href="cid:<name>"`.
#[allow(clippy::unwrap_used)]
static CID_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(src|href)="cid:([^"]*)""#).unwrap());

/// Per-message table mapping referenced names to generated Content-IDs.
///
/// The first reference to a name fixes its ID; later references (from body
/// text or from the inline file header) resolve to the same ID.
#[derive(Debug, Clone)]
pub struct CidTable {
    stamp: String,
    ids: HashMap<String, String>,
}

impl CidTable {
    /// Creates an empty table whose IDs carry `timestamp`.
    #[must_use]
    pub fn new(timestamp: DateTime<FixedOffset>) -> Self {
        Self {
            stamp: timestamp.format("%Y%m%d.%H%M%S").to_string(),
            ids: HashMap::new(),
        }
    }

    /// Returns the Content-ID for `name`, generating one on first use.
    ///
    /// IDs look like `20240131.235959.1@mail.0`.
    pub fn cid_for(&mut self, name: &str) -> &str {
        let next = self.ids.len() + 1;
        let stamp = &self.stamp;
        self.ids
            .entry(name.to_string())
            .or_insert_with(|| format!("{stamp}.{next}@mail.0"))
    }

    /// Returns the Content-ID already assigned to `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.ids.get(name).map(String::as_str)
    }

    /// Returns true if `id` is one of this table's generated IDs.
    #[must_use]
    pub fn is_generated(&self, id: &str) -> bool {
        self.ids.values().any(|v| v == id)
    }

    /// Returns the number of names in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if no name has been assigned yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Replaces every `cid:` reference in `body` with its generated ID.
    ///
    /// Names are collected from `src="cid:..."` and `href="cid:..."`
    /// attributes; every `cid:<name>` occurrence of such a name is then
    /// replaced, including ones outside attributes such as CSS
    /// `url(cid:...)`. An occurrence only matches when the name is followed
    /// by the end of the body or by one of `"`, `'`, `)`, `>` or whitespace.
    ///
    /// References that already point at a generated ID are left alone, so
    /// rewriting is idempotent. Returns the new body and the number of
    /// substitutions made.
    pub fn rewrite(&mut self, body: &[u8]) -> (Vec<u8>, usize) {
        let mut names: Vec<(String, String)> = Vec::new();
        for caps in CID_REFERENCE.captures_iter(body) {
            let Ok(name) = std::str::from_utf8(&caps[2]) else {
                continue;
            };
            if name.is_empty() || self.is_generated(name) || names.iter().any(|(n, _)| n == name) {
                continue;
            }
            let id = self.cid_for(name).to_string();
            names.push((name.to_string(), id));
        }
        if names.is_empty() {
            return (body.to_vec(), 0);
        }
        // Longest first so `logo.png` wins over `logo`
        names.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        let mut out = Vec::with_capacity(body.len());
        let mut count = 0;
        let mut copied = 0;
        let mut from = 0;
        while let Some(at) = find(&body[from..], CID_SCHEME).map(|i| i + from) {
            let rest = &body[at + CID_SCHEME.len()..];
            let found = names.iter().find(|(name, _)| {
                rest.starts_with(name.as_bytes())
                    && rest.get(name.len()).is_none_or(|&b| ends_name(b))
            });
            match found {
                Some((name, id)) => {
                    out.extend_from_slice(&body[copied..at]);
                    out.extend_from_slice(CID_SCHEME);
                    out.extend_from_slice(id.as_bytes());
                    count += 1;
                    copied = at + CID_SCHEME.len() + name.len();
                    from = copied;
                }
                None => from = at + CID_SCHEME.len(),
            }
        }
        out.extend_from_slice(&body[copied..]);
        (out, count)
    }
}

const CID_SCHEME: &[u8] = b"cid:";

/// Returns true if `b` can't be part of a referenced name.
const fn ends_name(b: u8) -> bool {
    matches!(b, b'"' | b'\'' | b')' | b'>') || b.is_ascii_whitespace()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn table() -> CidTable {
        let time = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 31, 23, 59, 58)
            .unwrap();
        CidTable::new(time)
    }

    #[test]
    fn test_cid_format() {
        let mut cids = table();
        assert_eq!(cids.cid_for("logo.png"), "20240131.235958.1@mail.0");
        assert_eq!(cids.cid_for("photo.jpg"), "20240131.235958.2@mail.0");
        assert_eq!(cids.cid_for("logo.png"), "20240131.235958.1@mail.0");
        assert_eq!(cids.len(), 2);
    }

    #[test]
    fn test_rewrite_src_and_href() {
        let mut cids = table();
        let body = br#"<img src="cid:logo.png"><a href="cid:doc.pdf">x</a>"#;
        let (out, count) = cids.rewrite(body);
        assert_eq!(count, 2);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"<img src="cid:20240131.235958.1@mail.0"><a href="cid:20240131.235958.2@mail.0">x</a>"#
        );
    }

    #[test]
    fn test_rewrite_same_name_same_id() {
        let mut cids = table();
        let body = br#"<img src="cid:logo.png"><img src="cid:logo.png">"#;
        let (out, count) = cids.rewrite(body);
        assert_eq!(count, 2);
        assert_eq!(cids.len(), 1);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches("20240131.235958.1@mail.0").count(), 2);
    }

    #[test]
    fn test_rewrite_does_not_touch_prefix_names() {
        let mut cids = table();
        let body = br#"<img src="cid:logo"><img src="cid:logo.png">"#;
        let (out, _) = cids.rewrite(body);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains(r#"src="cid:20240131.235958.1@mail.0""#));
        assert!(text.contains(r#"src="cid:20240131.235958.2@mail.0""#));
    }

    #[test]
    fn test_rewrite_css_url_reference() {
        let mut cids = table();
        let body = br#"<img src="cid:logo.png"><div style="background:url(cid:logo.png)">"#;
        let (out, count) = cids.rewrite(body);
        assert_eq!(count, 2);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches("cid:logo.png").count(), 0);
        assert!(text.contains("url(cid:20240131.235958.1@mail.0)"));
    }

    #[test]
    fn test_rewrite_ignores_unreferenced_names() {
        let mut cids = table();
        let body = br#"<img src="cid:a.png"> url(cid:a.png.bak) url(cid:other.png)"#;
        let (out, count) = cids.rewrite(body);
        assert_eq!(count, 1);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("cid:a.png.bak"));
        assert!(text.contains("cid:other.png"));
        assert_eq!(cids.len(), 1);
    }

    #[test]
    fn test_rewrite_idempotent() {
        let mut cids = table();
        let body = br#"<img src="cid:a.png"> text <img src="cid:b.png">"#;
        let (once, _) = cids.rewrite(body);
        let (twice, count) = cids.rewrite(&once);
        assert_eq!(count, 0);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_rewrite_non_utf8_body() {
        let mut cids = table();
        let mut body = vec![0xE9, b' '];
        body.extend_from_slice(br#"<img src="cid:x.png">"#);
        let (out, count) = cids.rewrite(&body);
        assert_eq!(count, 1);
        assert_eq!(out[0], 0xE9);
    }

    #[test]
    fn test_inline_file_shares_body_id() {
        let mut cids = table();
        let (out, _) = cids.rewrite(br#"<img src="cid:logo.png">"#);
        let id = cids.cid_for("logo.png").to_string();
        assert!(String::from_utf8(out).unwrap().contains(&id));
    }

    proptest! {
        #[test]
        fn prop_rewrite_idempotent(names in proptest::collection::vec("[a-z]{1,8}\\.(png|gif)", 1..6)) {
            let mut cids = table();
            let body: String = names
                .iter()
                .map(|n| format!(r#"<img src="cid:{n}">"#))
                .collect();
            let (once, count) = cids.rewrite(body.as_bytes());
            prop_assert_eq!(count, names.len());
            let (twice, again) = cids.rewrite(&once);
            prop_assert_eq!(again, 0);
            prop_assert_eq!(&once, &twice);

            let text = String::from_utf8(once).unwrap();
            for name in &names {
                let id = cids.get(name).unwrap();
                let expected = format!(r#"src="cid:{id}""#);
                prop_assert!(text.contains(&expected));
            }
        }
    }
}
