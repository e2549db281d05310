//! Loading artifact filter rules from TOML.
//!
//! A rule file only needs to mention the settings it wants to change:
//!
//! ```toml
//! # Norwegian and Danish scans.
//! extra_uppercase = "ÆØÅ"
//! min_alnum_ratio = 0.5
//! ```

use toml_span::{DeserError, Value, value::ValueInner};

use crate::{
    filter::FilterConfig,
    prelude::*,
    toml_utils::{
        custom_deser_error, describe_deser_error, from_toml_str, merge_deser_errors,
        type_name,
    },
};

/// Read a [`FilterConfig`] from a TOML file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn read_filter_config(path: &Path) -> Result<FilterConfig> {
    let source = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read filter config {:?}", path.display()))?;
    parse_filter_config(&source)
        .with_context(|| format!("invalid filter config {:?}", path.display()))
}

/// Parse a [`FilterConfig`] from TOML source.
pub fn parse_filter_config(source: &str) -> Result<FilterConfig> {
    from_toml_str::<FilterConfig>(source)
        .map_err(|err| anyhow!("{}", describe_deser_error(source, &err)))
}

impl<'de> toml_span::Deserialize<'de> for FilterConfig {
    fn deserialize(value: &mut Value<'de>) -> Result<Self, DeserError> {
        let span = value.span;
        let table = match value.take() {
            ValueInner::Table(table) => table,
            other => {
                return Err(custom_deser_error(
                    span,
                    format!("expected a table, found {}", type_name(&other)),
                ));
            }
        };

        let mut config = FilterConfig::default();
        let mut errors = vec![];
        for (key, mut value) in table {
            let result = match &*key.name {
                "extra_uppercase" => {
                    expect_string(&mut value).map(|v| config.extra_uppercase = v)
                }
                "min_alnum_ratio" => {
                    expect_ratio(&mut value).map(|v| config.min_alnum_ratio = v)
                }
                "max_symbol_ratio" => {
                    expect_ratio(&mut value).map(|v| config.max_symbol_ratio = v)
                }
                "min_line_chars" => {
                    expect_count(&mut value, 0).map(|v| config.min_line_chars = v)
                }
                "fragment_min_tokens" => {
                    expect_count(&mut value, 1).map(|v| config.fragment_min_tokens = v)
                }
                "fragment_max_token_len" => expect_count(&mut value, 1)
                    .map(|v| config.fragment_max_token_len = v),
                "repeated_token_max_len" => expect_count(&mut value, 1)
                    .map(|v| config.repeated_token_max_len = v),
                "repeated_token_min_run" => expect_count(&mut value, 2)
                    .map(|v| config.repeated_token_min_run = v),
                "repeated_char_min_run" => expect_count(&mut value, 2)
                    .map(|v| config.repeated_char_min_run = v),
                unknown => Err(custom_deser_error(
                    key.span,
                    format!("unknown filter setting `{unknown}`"),
                )),
            };
            if let Err(err) = result {
                errors.push(err);
            }
        }
        merge_deser_errors(errors)?;
        Ok(config)
    }
}

/// Expect a string value.
fn expect_string(value: &mut Value<'_>) -> Result<String, DeserError> {
    let span = value.span;
    match value.take() {
        ValueInner::String(s) => Ok(s.into_owned()),
        other => Err(custom_deser_error(
            span,
            format!("expected a string, found {}", type_name(&other)),
        )),
    }
}

/// Expect a number between 0.0 and 1.0. Integers are accepted.
fn expect_ratio(value: &mut Value<'_>) -> Result<f64, DeserError> {
    let span = value.span;
    let ratio = match value.take() {
        ValueInner::Float(f) => f,
        ValueInner::Integer(i) => i as f64,
        other => {
            return Err(custom_deser_error(
                span,
                format!("expected a number, found {}", type_name(&other)),
            ));
        }
    };
    if (0.0..=1.0).contains(&ratio) {
        Ok(ratio)
    } else {
        Err(custom_deser_error(
            span,
            format!("expected a ratio between 0.0 and 1.0, found {ratio}"),
        ))
    }
}

/// Expect a non-negative integer no smaller than `min`.
fn expect_count(value: &mut Value<'_>, min: usize) -> Result<usize, DeserError> {
    let span = value.span;
    match value.take() {
        ValueInner::Integer(i) => match usize::try_from(i) {
            Ok(count) if count >= min => Ok(count),
            _ => Err(custom_deser_error(
                span,
                format!("expected an integer of at least {min}, found {i}"),
            )),
        },
        other => Err(custom_deser_error(
            span,
            format!("expected an integer, found {}", type_name(&other)),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() -> Result<()> {
        let config = parse_filter_config("")?;
        assert_eq!(config, FilterConfig::default());
        Ok(())
    }

    #[test]
    fn overrides_selected_settings() -> Result<()> {
        let config = parse_filter_config(
            r#"
extra_uppercase = "ÆØÅ"
min_alnum_ratio = 0.5
max_symbol_ratio = 1
repeated_char_min_run = 4
"#,
        )?;
        assert_eq!(config.extra_uppercase, "ÆØÅ");
        assert_eq!(config.min_alnum_ratio, 0.5);
        assert_eq!(config.max_symbol_ratio, 1.0);
        assert_eq!(config.repeated_char_min_run, 4);
        assert_eq!(
            config.repeated_token_min_run,
            FilterConfig::default().repeated_token_min_run
        );
        Ok(())
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = parse_filter_config("min_alnum_ratoi = 0.5\n").unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("min_alnum_ratoi"), "{msg}");
        assert!(msg.contains("1:1"), "{msg}");
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(parse_filter_config("min_alnum_ratio = 1.5").is_err());
        assert!(parse_filter_config("repeated_token_min_run = 1").is_err());
        assert!(parse_filter_config("min_line_chars = -3").is_err());
        assert!(parse_filter_config("extra_uppercase = 7").is_err());
    }

    #[test]
    fn reports_every_error() {
        let err = parse_filter_config("a = 1\nb = 2\n").unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("`a`") && msg.contains("`b`"), "{msg}");
    }

    #[tokio::test]
    async fn reads_config_from_file() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("filter-config")?;
        let path = dir.path().join("rules.toml");
        tokio::fs::write(&path, "min_line_chars = 5\n").await?;
        let config = read_filter_config(&path).await?;
        assert_eq!(config.min_line_chars, 5);
        Ok(())
    }
}
