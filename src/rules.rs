use crate::services::loader::get_by_path;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

/// Schema patterns compile once per process; invalid ones cache as `None`.
pub(crate) fn compiled(pattern: &str) -> Option<Regex> {
    static CACHE: OnceLock<Mutex<HashMap<String, Option<Regex>>>> = OnceLock::new();
    let Ok(mut cache) = CACHE.get_or_init(Default::default).lock() else {
        return Regex::new(pattern).ok();
    };
    cache
        .entry(pattern.to_string())
        .or_insert_with(|| Regex::new(pattern).ok())
        .clone()
}

/// Text form of a value as the rules and transforms see it. Objects carrying a
/// `value`/`id` are unwrapped first.
pub fn to_text(v: &JsonValue) -> String {
    match v {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Object(obj) => match obj.get("value").or_else(|| obj.get("id")) {
            Some(inner) => to_text(inner),
            None => v.to_string(),
        },
        JsonValue::Array(_) => v.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rule {
    /// Trimmed character count within bounds.
    Length {
        #[serde(default)]
        min: Option<usize>,
        #[serde(default)]
        max: Option<usize>,
    },
    Pattern {
        pattern: String,
    },
    Email,
    /// Brazilian company registry number with both check digits.
    Cnpj,
    Range {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
}

impl Rule {
    pub fn check(&self, v: &JsonValue) -> bool {
        match self {
            Rule::Length { min, max } => {
                let n = to_text(v).trim().chars().count();
                min.map(|m| n >= m).unwrap_or(true) && max.map(|m| n <= m).unwrap_or(true)
            }
            Rule::Pattern { pattern } => match compiled(pattern) {
                Some(re) => re.is_match(to_text(v).trim()),
                None => false,
            },
            Rule::Email => {
                let s = to_text(v);
                let s = s.trim();
                match s.split_once('@') {
                    Some((user, domain)) => {
                        !user.is_empty()
                            && !s.chars().any(char::is_whitespace)
                            && !domain.contains('@')
                            && domain
                                .split_once('.')
                                .map(|(a, b)| !a.is_empty() && !b.is_empty())
                                .unwrap_or(false)
                    }
                    None => false,
                }
            }
            Rule::Cnpj => cnpj_is_valid(&to_text(v)),
            Rule::Range { min, max } => {
                let n = match v {
                    JsonValue::Number(n) => n.as_f64(),
                    other => to_text(other).trim().parse::<f64>().ok(),
                };
                match n {
                    Some(n) if n.is_finite() => {
                        min.map(|m| n >= m).unwrap_or(true) && max.map(|m| n <= m).unwrap_or(true)
                    }
                    _ => false,
                }
            }
        }
    }

    pub(crate) fn pattern(&self) -> Option<&str> {
        match self {
            Rule::Pattern { pattern } => Some(pattern),
            _ => None,
        }
    }
}

/// An empty input is accepted; emptiness is the `required` flag's business.
pub fn cnpj_is_valid(raw: &str) -> bool {
    let digits: Vec<u32> = raw.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.is_empty() {
        return true;
    }
    if digits.len() != 14 || digits.iter().all(|d| *d == digits[0]) {
        return false;
    }
    let check = |len: usize, weights: &[u32]| -> u32 {
        let sum: u32 = digits[..len]
            .iter()
            .zip(weights)
            .map(|(d, w)| d * w)
            .sum();
        match sum % 11 {
            m if m < 2 => 0,
            m => 11 - m,
        }
    };
    let c1 = check(12, &[5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2]);
    let c2 = check(13, &[6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2]);
    c1 == digits[12] && c2 == digits[13]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    Trim,
    Lowercase,
    Uppercase,
    DigitsOnly,
    CollapseWhitespace,
    Slug,
    Username,
    /// `11222333000181` → `11.222.333/0001-81`; anything but 14 digits → `""`.
    CnpjPunctuation,
    PhoneE164,
}

impl Transform {
    pub fn apply_str(&self, s: &str) -> String {
        match self {
            Transform::Trim => s.trim().to_string(),
            Transform::Lowercase => s.to_lowercase(),
            Transform::Uppercase => s.to_uppercase(),
            Transform::DigitsOnly => s.chars().filter(char::is_ascii_digit).collect(),
            Transform::CollapseWhitespace => s.split_whitespace().collect::<Vec<_>>().join(" "),
            Transform::Slug => {
                let mut out = String::new();
                for ch in s.trim().to_lowercase().chars() {
                    let ch = if ch.is_whitespace() { '-' } else { ch };
                    if !(ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-') {
                        continue;
                    }
                    if ch == '-' && out.ends_with('-') {
                        continue;
                    }
                    out.push(ch);
                }
                out
            }
            Transform::Username => s
                .trim()
                .to_lowercase()
                .chars()
                .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '.')
                .collect(),
            Transform::CnpjPunctuation => {
                let d: String = s.chars().filter(char::is_ascii_digit).collect();
                if d.len() != 14 {
                    return String::new();
                }
                format!(
                    "{}.{}.{}/{}-{}",
                    &d[0..2],
                    &d[2..5],
                    &d[5..8],
                    &d[8..12],
                    &d[12..]
                )
            }
            Transform::PhoneE164 => {
                let raw = s.trim();
                if raw.is_empty() || raw.starts_with('+') {
                    return raw.to_string();
                }
                let d: String = raw.chars().filter(char::is_ascii_digit).collect();
                format!("+{d}")
            }
        }
    }

    pub fn apply_all(chain: &[Transform], v: &JsonValue) -> JsonValue {
        let mut s = to_text(v);
        for t in chain {
            s = t.apply_str(&s);
        }
        JsonValue::String(s)
    }
}

fn default_value_key() -> String {
    "id".to_string()
}

fn default_label_key() -> String {
    "name".to_string()
}

/// How a field pulls its raw value out of a record before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Extract {
    /// Expanded relation object → `{value, label}`.
    Option {
        #[serde(default = "default_value_key")]
        value: String,
        #[serde(default = "default_label_key")]
        label: String,
    },
    Path {
        path: String,
    },
}

impl Extract {
    pub fn apply(&self, raw: &JsonValue) -> Result<JsonValue, String> {
        match self {
            Extract::Option { value, label } => match raw {
                JsonValue::Null => Ok(JsonValue::Null),
                JsonValue::Object(obj) => {
                    let v = obj.get(value).cloned().unwrap_or(JsonValue::Null);
                    let l = obj.get(label).map(to_text).unwrap_or_default();
                    Ok(json!({"value": v, "label": l}))
                }
                other => Ok(other.clone()),
            },
            Extract::Path { path } => match raw {
                JsonValue::Null => Ok(JsonValue::Null),
                JsonValue::Object(_) => Ok(get_by_path(raw, path).cloned().unwrap_or(JsonValue::Null)),
                other => Err(format!("cannot read '{path}' from {other}")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cnpj_checksum_accepts_known_good_and_rejects_repeats() {
        assert!(cnpj_is_valid("11.222.333/0001-81"));
        assert!(cnpj_is_valid("11222333000181"));
        assert!(!cnpj_is_valid("11222333000182"));
        assert!(!cnpj_is_valid("11111111111111"));
        assert!(!cnpj_is_valid("1122233300018"));
        assert!(cnpj_is_valid(""));
    }

    #[test]
    fn transforms_chain_in_order() {
        let out = Transform::apply_all(
            &[Transform::Trim, Transform::Slug],
            &json!("  Minha  Loja Ágil "),
        );
        assert_eq!(out, json!("minha-loja-gil"));
        assert_eq!(
            Transform::CnpjPunctuation.apply_str("11222333000181"),
            "11.222.333/0001-81"
        );
        assert_eq!(Transform::CnpjPunctuation.apply_str("123"), "");
        assert_eq!(Transform::PhoneE164.apply_str("55 21 91234-5678"), "+5521912345678");
        assert_eq!(Transform::Username.apply_str(" Joao Silva!"), "joaosilva");
    }

    #[test]
    fn rules_check_unwrapped_text() {
        let len = Rule::Length {
            min: Some(2),
            max: Some(5),
        };
        assert!(len.check(&json!(" ab ")));
        assert!(!len.check(&json!("a")));
        assert!(Rule::Email.check(&json!("me@example.com")));
        assert!(!Rule::Email.check(&json!("me@example")));
        assert!(!Rule::Email.check(&json!("m e@example.com")));
        let pat = Rule::Pattern {
            pattern: "^[a-z]{3}$".into(),
        };
        assert!(pat.check(&json!({"value": "abc", "label": "ABC"})));
        let range = Rule::Range {
            min: Some(0.0),
            max: Some(10.0),
        };
        assert!(range.check(&json!("7")));
        assert!(!range.check(&json!(11)));
    }

    #[test]
    fn patterns_are_compiled_once_and_bad_ones_fail_closed() {
        let first = compiled("^BT-[0-9]+$").unwrap();
        let again = compiled("^BT-[0-9]+$").unwrap();
        assert_eq!(first.as_str(), again.as_str());
        assert!(compiled("([").is_none());
        let bad = Rule::Pattern {
            pattern: "([".into(),
        };
        assert!(!bad.check(&json!("anything")));
    }

    #[test]
    fn rules_deserialize_from_yaml() {
        let r: Rule = serde_yaml::from_str("kind: length\nmin: 2\nmax: 255").unwrap();
        assert_eq!(
            r,
            Rule::Length {
                min: Some(2),
                max: Some(255)
            }
        );
        let t: Vec<Transform> = serde_yaml::from_str("[trim, cnpj_punctuation]").unwrap();
        assert_eq!(t, vec![Transform::Trim, Transform::CnpjPunctuation]);
    }

    #[test]
    fn option_extractor_builds_tagged_pair() {
        let ex = Extract::Option {
            value: "id".into(),
            label: "name".into(),
        };
        assert_eq!(
            ex.apply(&json!({"id": 7, "name": "Retail"})).unwrap(),
            json!({"value": 7, "label": "Retail"})
        );
        assert_eq!(ex.apply(&JsonValue::Null).unwrap(), JsonValue::Null);
        let path = Extract::Path {
            path: "address.city".into(),
        };
        assert!(path.apply(&json!("x")).is_err());
    }
}
