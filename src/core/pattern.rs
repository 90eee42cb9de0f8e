/*!
 * Name matching for search
 *
 * A pattern without `*` or `?` is a case-insensitive substring test. A
 * wildcard pattern becomes a case-insensitive regex with an implicit `.*`
 * in front, so it may start anywhere in the name. The end of the name is
 * anchored unless the pattern itself ends in `*`: `*.txt` matches
 * `report.TXT` but not `a.txtx`.
 */

use regex::{Regex, RegexBuilder};

use crate::error::{Result, ShareError};

/// Compiled search pattern
#[derive(Debug, Clone)]
pub enum NamePattern {
    /// Lowercased needle for substring containment
    Contains(String),
    Wildcard(Regex),
}

impl NamePattern {
    pub fn new(pattern: &str) -> Result<Self> {
        if !pattern.contains(['*', '?']) {
            return Ok(NamePattern::Contains(pattern.to_lowercase()));
        }

        let mut body = String::with_capacity(pattern.len() * 2);
        for ch in pattern.chars() {
            match ch {
                '*' => body.push_str(".*"),
                '?' => body.push('.'),
                other => body.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }

        let mut anchored = String::with_capacity(body.len() + 6);
        anchored.push('^');
        if !pattern.starts_with('*') {
            anchored.push_str(".*");
        }
        anchored.push_str(&body);
        anchored.push('$');

        let regex = RegexBuilder::new(&anchored)
            .case_insensitive(true)
            .build()
            .map_err(|e| ShareError::InvalidArgument(format!("invalid pattern {:?}: {}", pattern, e)))?;
        Ok(NamePattern::Wildcard(regex))
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            NamePattern::Contains(needle) => name.to_lowercase().contains(needle.as_str()),
            NamePattern::Wildcard(regex) => regex.is_match(name),
        }
    }
}

/// One-shot convenience over [`NamePattern`]
pub fn matches(pattern: &str, name: &str) -> Result<bool> {
    Ok(NamePattern::new(pattern)?.matches(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_wildcard() {
        let p = NamePattern::new("*.txt").unwrap();
        assert!(p.matches("a.txt"));
        assert!(p.matches("report.TXT"));
        assert!(!p.matches("a.txtx"));
        assert!(!p.matches("atxt"));
    }

    #[test]
    fn test_plain_text_is_substring() {
        let p = NamePattern::new("report").unwrap();
        assert!(p.matches("Quarterly Report Final.txt"));
        assert!(!p.matches("summary.txt"));
    }

    #[test]
    fn test_question_mark_single_char() {
        let p = NamePattern::new("img?.png").unwrap();
        assert!(p.matches("img1.png"));
        assert!(p.matches("holiday_imgA.png"));
        assert!(!p.matches("img12.png"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let p = NamePattern::new("a+b(*").unwrap();
        assert!(p.matches("xa+b(yz"));
        assert!(!p.matches("aab"));
    }

    #[test]
    fn test_trailing_star_leaves_end_open() {
        let p = NamePattern::new("draft*").unwrap();
        assert!(p.matches("old draft v2.doc"));
        assert!(!p.matches("final.doc"));
    }
}
