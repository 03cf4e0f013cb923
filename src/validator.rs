//! Pure, single-pass string validation and sanitation (C4). No regex dependency — the
//! teacher doesn't carry one either, and every check here is a linear scan over chars.

const MAX_CONTENT_LEN: usize = 4096;

pub fn validate_username(username: &str) -> bool {
    let len = username.chars().count();
    if !(2..=30).contains(&len) {
        return false;
    }
    username.chars().all(is_username_char)
}

pub fn validate_room_name(name: &str) -> bool {
    let len = name.chars().count();
    if !(3..=50).contains(&len) {
        return false;
    }
    name.chars().all(is_room_name_char)
}

fn is_username_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_room_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == ' '
}

pub fn validate_content(content: &str) -> bool {
    !content.trim().is_empty() && content.chars().count() <= MAX_CONTENT_LEN
}

/// Deny-listed literal fragments, checked case-insensitively — literal substring checks
/// rather than a full HTML/SQL parser.
const XSS_DENYLIST: &[&str] = &[
    "<script", "</script", "<iframe", "</iframe", "javascript:", "vbscript:", "<object",
    "</object", "<embed", "</embed", "onerror=", "onload=", "onclick=", "onmouseover=",
];

const SQL_DENYLIST: &[&str] = &[
    "union select", "drop table", "; drop", "-- ", "/*", "*/", "xp_cmdshell", "' or '1'='1",
    "\" or \"1\"=\"1",
];

/// Strips XSS-shaped fragments, rejects SQL-shaped content outright, escapes HTML
/// metacharacters, strips control bytes, and collapses long whitespace runs. Per spec
/// §8, `sanitize(sanitize(x)) == sanitize(x)` must hold — denylist-stripping on the raw
/// (pre-escape) text means the escaped output never contains a denylisted literal
/// fragment again, and `escape_html` itself recognizes its own entities so it never
/// re-escapes the `&` of an `&lt;`/`&amp;`/etc. it (or an earlier pass) already produced.
pub fn sanitize(content: &str) -> String {
    let stripped = strip_denylisted(content, XSS_DENYLIST);
    let without_controls = strip_control_bytes(&stripped);
    let escaped = escape_html(&without_controls);
    collapse_whitespace(&escaped)
}

pub fn is_sql_shaped(content: &str) -> bool {
    let lower = content.to_lowercase();
    SQL_DENYLIST.iter().any(|needle| lower.contains(needle))
}

fn strip_denylisted(input: &str, denylist: &[&str]) -> String {
    let lower = input.to_lowercase();
    let mut result = String::with_capacity(input.len());
    let mut i = 0;
    let chars: Vec<char> = input.chars().collect();
    let lower_chars: Vec<char> = lower.chars().collect();
    while i < chars.len() {
        let matched = denylist.iter().any(|needle| {
            let needle_chars: Vec<char> = needle.chars().collect();
            lower_chars[i..].starts_with(needle_chars.as_slice())
        });
        if matched {
            i += 1;
            continue;
        }
        result.push(chars[i]);
        i += 1;
    }
    result
}

fn strip_control_bytes(input: &str) -> String {
    input
        .chars()
        .filter(|&c| {
            let b = c as u32;
            !matches!(b, 0x00..=0x08 | 0x0B | 0x0C | 0x0E..=0x1F | 0x7F)
        })
        .collect()
}

/// Entities this function itself produces — checked on `&` so a second pass over
/// already-escaped output never turns `&lt;` into `&amp;lt;`.
const KNOWN_ENTITIES: &[&str] = &["&lt;", "&gt;", "&quot;", "&#x27;", "&#x2F;", "&amp;"];

fn escape_html(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '&' {
            if let Some(entity) = KNOWN_ENTITIES.iter().find(|e| matches_at(&chars, i, e)) {
                out.push_str(entity);
                i += entity.chars().count();
                continue;
            }
            out.push_str("&amp;");
            i += 1;
            continue;
        }
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            other => out.push(other),
        }
        i += 1;
    }
    out
}

fn matches_at(chars: &[char], pos: usize, needle: &str) -> bool {
    let needle_chars: Vec<char> = needle.chars().collect();
    chars[pos..].starts_with(needle_chars.as_slice())
}

fn collapse_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut run = 0;
    for c in input.chars() {
        if c.is_whitespace() {
            run += 1;
            if run < 3 {
                out.push(c);
            } else if run == 3 {
                out.push(' ');
            }
        } else {
            run = 0;
            out.push(c);
        }
    }
    out
}

/// Spam heuristics: 1 point per rule triggered, `is_spam` once the score reaches 2.
pub fn spam_score(content: &str, recent_messages: &[String]) -> u32 {
    let mut score = 0;

    let tokens: Vec<&str> = content.split_whitespace().collect();
    if !tokens.is_empty() {
        let mut counts = std::collections::HashMap::new();
        for t in &tokens {
            *counts.entry(*t).or_insert(0usize) += 1;
        }
        if let Some(&max) = counts.values().max() {
            if (max as f64) / (tokens.len() as f64) > 0.4 {
                score += 1;
            }
        }
    }

    if content.chars().count() > 10 {
        let letters: Vec<char> = content.chars().filter(|c| c.is_alphabetic()).collect();
        if !letters.is_empty() {
            let caps = letters.iter().filter(|c| c.is_uppercase()).count();
            if (caps as f64) / (letters.len() as f64) > 0.9 {
                score += 1;
            }
        }
    }

    if recent_messages.iter().any(|m| m == content) {
        score += 1;
    }

    if contains_suspicious_short_link(content) {
        score += 1;
    }

    if content.chars().count() as f64 > MAX_CONTENT_LEN as f64 * 0.8 {
        score += 1;
    }

    score
}

pub fn is_spam(content: &str, recent_messages: &[String]) -> bool {
    spam_score(content, recent_messages) >= 2
}

const SUSPICIOUS_SHORT_URL_DOMAINS: &[&str] =
    &["bit.ly", "tinyurl.com", "t.co", "goo.gl", "ow.ly", "is.gd", "buff.ly"];

fn contains_suspicious_short_link(content: &str) -> bool {
    let lower = content.to_lowercase();
    SUSPICIOUS_SHORT_URL_DOMAINS.iter().any(|d| lower.contains(d))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_bounds() {
        assert!(validate_username("al"));
        assert!(validate_username("alice_99-x"));
        assert!(!validate_username("a"));
        assert!(!validate_username("has space"));
        assert!(!validate_username(&"x".repeat(31)));
    }

    #[test]
    fn room_name_bounds() {
        assert!(validate_room_name("lobby"));
        assert!(validate_room_name("my cool room"));
        assert!(!validate_room_name("ab"));
        assert!(!validate_room_name("bad$name"));
    }

    #[test]
    fn sanitize_strips_script_tags() {
        let out = sanitize("hello <script>alert(1)</script> world");
        assert!(!out.to_lowercase().contains("<script"));
    }

    #[test]
    fn sanitize_is_idempotent() {
        let input = "<b>Hi</b>  there   friend";
        let once = sanitize(input);
        let twice = sanitize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn sanitize_escapes_html_entities() {
        let out = sanitize("5 > 3 & 2 < 4");
        assert!(out.contains("&gt;"));
        assert!(out.contains("&lt;"));
        assert!(out.contains("&amp;"));
    }

    #[test]
    fn sql_shaped_rejected() {
        assert!(is_sql_shaped("1' OR '1'='1"));
        assert!(is_sql_shaped("DROP TABLE users"));
        assert!(!is_sql_shaped("hello world"));
    }

    #[test]
    fn spam_score_duplicate_message() {
        let recent = vec!["buy now".to_string()];
        assert_eq!(spam_score("buy now", &recent), 1);
    }

    #[test]
    fn spam_score_all_caps() {
        assert!(spam_score("THIS IS VERY LOUD SHOUTING", &[]) >= 1);
    }
}
