//! Country flag emoji on node names

use std::collections::BTreeMap;

use regex::Regex;

use super::filter::FilterRuleError;

#[derive(Debug, Clone)]
enum Matcher {
    /// Plain keyword. ASCII keywords only match on word boundaries.
    Keyword(String),
    Pattern(Regex),
}

impl Matcher {
    fn parse(raw: &str) -> Result<Self, FilterRuleError> {
        if raw.is_empty() {
            return Err(FilterRuleError::EmptyKeyword);
        }
        if raw.len() > 2 && raw.starts_with('/') && raw.ends_with('/') {
            let pattern = &raw[1..raw.len() - 1];
            let re = Regex::new(pattern)
                .map_err(|e| FilterRuleError::InvalidRegexp(pattern.to_string(), e.to_string()))?;
            Ok(Matcher::Pattern(re))
        } else {
            Ok(Matcher::Keyword(raw.to_string()))
        }
    }

    fn is_match(&self, name: &str) -> bool {
        match self {
            Matcher::Pattern(re) => re.is_match(name),
            Matcher::Keyword(k) if k.is_ascii() => contains_ascii_word(name, k),
            Matcher::Keyword(k) => name.contains(k.as_str()),
        }
    }
}

/// Case-insensitive search for `word` not surrounded by ASCII alphanumerics
fn contains_ascii_word(haystack: &str, word: &str) -> bool {
    let hay = haystack.to_ascii_uppercase();
    let needle = word.to_ascii_uppercase();
    if needle.is_empty() {
        return false;
    }
    let bytes = hay.as_bytes();

    let mut start = 0;
    while let Some(pos) = hay[start..].find(&needle) {
        let begin = start + pos;
        let end = begin + needle.len();
        let before_ok = begin == 0 || !bytes[begin - 1].is_ascii_alphanumeric();
        let after_ok = end == bytes.len() || !bytes[end].is_ascii_alphanumeric();
        if before_ok && after_ok {
            return true;
        }
        start = begin + 1;
        while !hay.is_char_boundary(start) {
            start += 1;
        }
    }

    false
}

const DEFAULT_FLAGS: &[(&str, &[&str])] = &[
    ("🇺🇸", &["美国", "美國", "US", "USA", "United States", "洛杉矶", "圣何塞", "西雅图", "芝加哥", "硅谷"]),
    ("🇭🇰", &["香港", "港", "HK", "Hong Kong", "HongKong"]),
    ("🇯🇵", &["日本", "东京", "東京", "大阪", "JP", "Japan", "Tokyo", "Osaka"]),
    ("🇸🇬", &["新加坡", "狮城", "SG", "Singapore"]),
    ("🇹🇼", &["台湾", "台灣", "台北", "TW", "Taiwan"]),
    ("🇰🇷", &["韩国", "韓國", "首尔", "KR", "Korea", "Seoul"]),
    ("🇬🇧", &["英国", "英國", "伦敦", "UK", "GB", "London"]),
    ("🇩🇪", &["德国", "德國", "法兰克福", "DE", "Germany", "Frankfurt"]),
    ("🇫🇷", &["法国", "法國", "巴黎", "FR", "France", "Paris"]),
    ("🇳🇱", &["荷兰", "荷蘭", "阿姆斯特丹", "NL", "Netherlands", "Amsterdam"]),
    ("🇨🇦", &["加拿大", "CA", "Canada"]),
    ("🇦🇺", &["澳大利亚", "澳洲", "悉尼", "AU", "Australia", "Sydney"]),
    ("🇷🇺", &["俄罗斯", "俄羅斯", "莫斯科", "RU", "Russia", "Moscow"]),
    ("🇮🇳", &["印度", "IN", "India"]),
    ("🇹🇷", &["土耳其", "TR", "Turkey"]),
    ("🇨🇳", &["中国", "中國", "回国", "CN", "China"]),
];

/// Ordered emoji → keyword table.
///
/// Custom entries are consulted before the built-in table.
#[derive(Debug, Clone)]
pub struct FlagMap {
    entries: Vec<(String, Vec<Matcher>)>,
}

impl Default for FlagMap {
    fn default() -> Self {
        let entries = DEFAULT_FLAGS
            .iter()
            .map(|(emoji, words)| {
                (
                    emoji.to_string(),
                    words.iter().map(|w| Matcher::Keyword(w.to_string())).collect(),
                )
            })
            .collect();
        Self { entries }
    }
}

impl FlagMap {
    /// Build a map with custom keywords taking precedence.
    ///
    /// Keywords written as `/pattern/` are compiled as regular expressions.
    pub fn with_custom(custom: &BTreeMap<String, Vec<String>>) -> Result<Self, FilterRuleError> {
        let mut entries = Vec::with_capacity(custom.len() + DEFAULT_FLAGS.len());
        for (emoji, words) in custom {
            let matchers = words
                .iter()
                .map(|w| Matcher::parse(w))
                .collect::<Result<Vec<_>, _>>()?;
            entries.push((emoji.clone(), matchers));
        }
        entries.extend(FlagMap::default().entries);
        Ok(Self { entries })
    }

    /// Emoji matching a node name
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, matchers)| matchers.iter().any(|m| m.is_match(name)))
            .map(|(emoji, _)| emoji.as_str())
    }

    /// Prefix the name with its country flag.
    ///
    /// Names that already carry a flag are left alone unless
    /// `remove_existing` is set, in which case the old flag is replaced.
    pub fn prepend_flag(&self, name: &str, remove_existing: bool) -> String {
        let base = if has_flag(name) {
            if !remove_existing {
                return name.to_string();
            }
            remove_flag(name)
        } else {
            name.to_string()
        };

        match self.lookup(&base) {
            Some(emoji) => format!("{} {}", emoji, base),
            None => base,
        }
    }
}

fn is_regional_indicator(c: char) -> bool {
    ('\u{1F1E6}'..='\u{1F1FF}').contains(&c)
}

/// Whether the name contains a flag emoji (a regional indicator pair)
pub fn has_flag(name: &str) -> bool {
    let chars: Vec<char> = name.chars().collect();
    chars
        .windows(2)
        .any(|w| is_regional_indicator(w[0]) && is_regional_indicator(w[1]))
}

/// Strip every flag emoji from the name
pub fn remove_flag(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars().peekable();

    while let Some(c) = chars.next() {
        if is_regional_indicator(c) {
            if let Some(&next) = chars.peek() {
                if is_regional_indicator(next) {
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }

    out.trim().to_string()
}
