use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static INTERPOLATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$|
        \$([[:word:].]+)|
        \$\{([[:word:].]+)(?:(:?-|:?\?)([^}]*))?\}",
    )
    .expect("valid interpolation regex")
});

/// Expands environment variables in `input`.
///
/// `$NAME` and `${NAME}` must be set. `${NAME:-word}` falls back to `word`
/// when the variable is unset or empty, `${NAME-word}` only when unset.
/// `${NAME:?msg}` and `${NAME?msg}` fail with `msg` instead. `$$` escapes a
/// dollar sign.
pub fn interpolate<'a, F>(input: &'a str, lookup: F) -> Result<Cow<'a, str>, Vec<String>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut errs = Vec::new();

    let interpolated = INTERPOLATION.replace_all(input, |caps: &Captures<'_>| {
        let Some(name) = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()) else {
            return "$".to_string();
        };
        let operator = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
        let word = caps.get(4).map(|m| m.as_str()).unwrap_or_default();

        let value = lookup(name);
        let (value, required) = match operator {
            ":-" => (value.filter(|v| !v.is_empty()).unwrap_or_else(|| word.to_string()), None),
            "-" => (value.unwrap_or_else(|| word.to_string()), None),
            ":?" => match value.filter(|v| !v.is_empty()) {
                Some(value) => (value, None),
                None => (String::new(), Some(word)),
            },
            _ => match value {
                Some(value) => (value, None),
                None => (String::new(), Some(word)),
            },
        };

        if let Some(word) = required {
            if word.is_empty() {
                errs.push(format!("missing environment variable {name:?}"));
            } else {
                errs.push(format!("missing environment variable {name:?}, {word}"));
            }
        }

        value
    });

    if errs.is_empty() {
        Ok(interpolated)
    } else {
        Err(errs)
    }
}
