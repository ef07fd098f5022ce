//! `{{ query }}` interpolation inside text.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use super::{interp, parser, QueryError};
use crate::value::Value;

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"(?s)\{\{\s*(.*?)\s*\}\}").unwrap();
}

/// Replaces each `{{ query }}` in `text` with the first output of the query run
/// against `data`. Null renders as an empty string.
pub fn render(text: &str, data: &Value) -> Result<String, QueryError> {
    let mut first_error = None;
    let rendered = PLACEHOLDER.replace_all(text, |caps: &Captures| {
        let outcome = parser::parse(&caps[1]).and_then(|expr| {
            super::builtins::check_calls(&expr)?;
            interp::eval(&expr, data, &interp::Env::default())
        });
        match outcome {
            Ok(values) => values.into_iter().next().unwrap_or_default().to_string(),
            Err(err) => {
                first_error.get_or_insert(err);
                String::new()
            }
        }
    });
    match first_error {
        Some(err) => Err(err),
        None => Ok(rendered.into_owned()),
    }
}

pub fn has_placeholders(text: &str) -> bool {
    PLACEHOLDER.is_match(text)
}
