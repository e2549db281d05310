//! Helper functions for [`toml_span`].

use std::borrow::Cow;

use codespan_reporting::files::{Files as _, SimpleFile};
use toml_span::{DeserError, Span, value::ValueInner};

/// Deserialize a TOML string into a value of the specified type.
pub fn from_toml_str<'de, T>(toml_str: &'de str) -> Result<T, DeserError>
where
    T: toml_span::Deserialize<'de>,
{
    let mut value = toml_span::de::parse(toml_str)?;
    T::deserialize(&mut value)
}

/// Create a custom [`DeserError`] with a span.
pub fn custom_deser_error(span: Span, msg: impl Into<Cow<'static, str>>) -> DeserError {
    let err_kind = toml_span::ErrorKind::Custom(msg.into());
    let err = toml_span::Error::from((err_kind, span));
    DeserError::from(err)
}

/// Merge several [`DeserError`]s into one, so that we can report every
/// problem in a file at once.
pub fn merge_deser_errors(errors: Vec<DeserError>) -> Result<(), DeserError> {
    let mut merged = errors.into_iter();
    match merged.next() {
        None => Ok(()),
        Some(mut first) => {
            for err in merged {
                first.errors.extend(err.errors);
            }
            Err(first)
        }
    }
}

/// Format a [`DeserError`] as human-readable text, with `line:column`
/// positions into `source`.
pub fn describe_deser_error(source: &str, err: &DeserError) -> String {
    let file = SimpleFile::new("<config>", source);
    err.errors
        .iter()
        .map(|e| {
            let diagnostic = e.to_diagnostic(());
            let mut text = diagnostic.message;
            for label in &diagnostic.labels {
                if label.message.is_empty() || label.message == text {
                    continue;
                }
                text = if text.is_empty() {
                    label.message.clone()
                } else {
                    format!("{text}: {}", label.message)
                };
            }
            match file.location((), e.span.start) {
                Ok(loc) => format!("{}:{}: {text}", loc.line_number, loc.column_number),
                Err(_) => text,
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// A name for a TOML value's type, for use in error messages.
pub fn type_name(inner: &ValueInner<'_>) -> &'static str {
    match inner {
        ValueInner::String(_) => "string",
        ValueInner::Integer(_) => "integer",
        ValueInner::Float(_) => "float",
        ValueInner::Boolean(_) => "boolean",
        ValueInner::Array(_) => "array",
        ValueInner::Table(_) => "table",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_point_at_line_and_column() {
        let source = "a = 1\nbb = 2\n";
        let err = custom_deser_error(Span::new(9, 10), "oops");
        let text = describe_deser_error(source, &err);
        assert!(text.starts_with("2:4: "), "{text}");
        assert!(text.contains("oops"), "{text}");
    }

    #[test]
    fn merged_errors_are_all_described() {
        let source = "a = 1\nbb = 2\n";
        let err = merge_deser_errors(vec![
            custom_deser_error(Span::new(0, 1), "first"),
            custom_deser_error(Span::new(6, 8), "second"),
        ])
        .unwrap_err();
        let text = describe_deser_error(source, &err);
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2, "{text}");
        assert!(lines[0].starts_with("1:1: ") && lines[0].contains("first"));
        assert!(lines[1].starts_with("2:1: ") && lines[1].contains("second"));
    }

    #[test]
    fn merging_no_errors_is_ok() {
        assert!(merge_deser_errors(vec![]).is_ok());
    }
}
