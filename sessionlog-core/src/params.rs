use std::{collections::BTreeMap, fmt, str::FromStr};

use crate::error::{Error, Result};

/// Plugin parameters parsed from a `name=value;name=value` expression.
///
/// Names are case-insensitive and trimmed; unquoted values are trimmed. A value
/// may be wrapped in double quotes to carry `;` or leading/trailing blanks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    entries: BTreeMap<String, (String, String)>,
}

impl Parameters {
    pub fn parse(expression: &str) -> Result<Self> {
        let mut parameters = Parameters::default();
        for pair in split_pairs(expression)? {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let Some((name, value)) = pair.split_once('=') else {
                return Err(invalid(expression, format!("'{pair}' is not a name=value pair")));
            };
            let name = name.trim();
            if name.is_empty() {
                return Err(invalid(expression, "empty parameter name".into()));
            }
            let value = unquote(value.trim());
            if parameters.contains(name) {
                return Err(invalid(expression, format!("duplicate parameter '{name}'")));
            }
            parameters.insert(name, value);
        }
        Ok(parameters)
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        let name = name.trim();
        self.entries.insert(
            name.to_lowercase(),
            (name.to_string(), value.into()),
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.trim().to_lowercase())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.trim().to_lowercase())
            .map(|(_, value)| value.as_str())
    }

    pub fn get_str<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    /// Parsed value, or `default` when missing or unparsable.
    pub fn get_or<T: FromStr>(&self, name: &str, default: T) -> T {
        self.get(name)
            .and_then(|value| value.parse().ok())
            .unwrap_or(default)
    }

    /// Parsed value; a present but unparsable value is an error.
    pub fn try_get<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.get(name)
            .map(|value| {
                value.parse().map_err(|e: T::Err| Error::InvalidParameters {
                    expression: self.to_string(),
                    reason: format!("parameter '{name}': {e}"),
                })
            })
            .transpose()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromStr for Parameters {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Parameters::parse(s)
    }
}

impl fmt::Display for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.entries.values().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            if value.contains(';') || value.trim() != value {
                write!(f, "{name}=\"{value}\"")?;
            } else {
                write!(f, "{name}={value}")?;
            }
        }
        Ok(())
    }
}

fn split_pairs(expression: &str) -> Result<Vec<&str>> {
    let mut pairs = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (i, c) in expression.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ';' if !quoted => {
                pairs.push(&expression[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if quoted {
        return Err(invalid(expression, "unterminated quote".into()));
    }
    pairs.push(&expression[start..]);
    Ok(pairs)
}

fn unquote(value: &str) -> String {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
        .to_string()
}

fn invalid(expression: &str, reason: String) -> Error {
    Error::InvalidParameters {
        expression: expression.to_string(),
        reason,
    }
}
