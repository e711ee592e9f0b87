use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::schemas::ValidationErrors;

lazy_static! {
    static ref PLACEHOLDER_RE: Regex =
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap();
}

/// Placeholder names in order of first appearance, without duplicates.
pub fn extract_variables(template: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in PLACEHOLDER_RE.captures_iter(template) {
        let name = &caps[1];
        if !out.iter().any(|v| v == name) {
            out.push(name.to_string());
        }
    }
    out
}

/// Substitutes every `{{name}}`. All missing values are reported together.
pub fn render(template: &str, values: &HashMap<String, String>) -> Result<String, ValidationErrors> {
    let mut errs = ValidationErrors::new();
    for name in extract_variables(template) {
        if !values.contains_key(&name) {
            errs.add(format!("values.{name}"), "required", "Missing template value");
        }
    }
    if !errs.is_empty() {
        return Err(errs);
    }
    let rendered = PLACEHOLDER_RE.replace_all(template, |caps: &Captures| {
        values.get(&caps[1]).cloned().unwrap_or_default()
    });
    Ok(rendered.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn extracts_unique_names_in_order() {
        assert_eq!(
            extract_variables("{{ subject }} walks through {{place}} while {{subject}} hums"),
            vec!["subject", "place"]
        );
        assert!(extract_variables("no placeholders {here}").is_empty());
    }

    #[test]
    fn renders_all_placeholders() {
        let out = render(
            "A {{animal}} astronaut floating above {{ planet }}",
            &values(&[("animal", "cat"), ("planet", "Mars")]),
        )
        .unwrap();
        assert_eq!(out, "A cat astronaut floating above Mars");
    }

    #[test]
    fn reports_every_missing_value() {
        let errs = render("{{a}} and {{b}} and {{c}}", &values(&[("b", "x")])).unwrap_err();
        assert!(errs.has("values.a"));
        assert!(errs.has("values.c"));
        assert!(!errs.has("values.b"));
    }

    #[test]
    fn extra_values_are_ignored() {
        let out = render("plain text", &values(&[("unused", "x")])).unwrap();
        assert_eq!(out, "plain text");
    }
}
