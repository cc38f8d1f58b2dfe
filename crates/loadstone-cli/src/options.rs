//! Dotted-key option parsing.
//!
//! Workflow options are open-ended (`--connector.csv.url`,
//! `--schema.mapping`, short aliases like `-url`), so the subcommands
//! collect them raw and this module turns them into key/value pairs for
//! the settings layer.

use loadstone_types::error::WorkflowError;

/// Parses `--key value`, `--key=value`, `-alias value` sequences.
pub fn parse_pairs(raw: &[String]) -> Result<Vec<(String, String)>, WorkflowError> {
    let mut pairs = Vec::new();
    let mut iter = raw.iter().peekable();
    while let Some(token) = iter.next() {
        let key = token
            .strip_prefix("--")
            .or_else(|| token.strip_prefix('-'))
            .ok_or_else(|| {
                WorkflowError::Config(format!("expected an option, got: {token}"))
            })?;
        if key.is_empty() {
            return Err(WorkflowError::Config(format!("invalid option: {token}")));
        }
        if let Some((key, value)) = key.split_once('=') {
            pairs.push((key.to_string(), value.to_string()));
            continue;
        }
        let value = iter.next().ok_or_else(|| {
            WorkflowError::Config(format!("option --{key} is missing a value"))
        })?;
        pairs.push((key.to_string(), value.clone()));
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn parses_space_and_equals_forms() {
        let pairs = parse_pairs(&args(&[
            "--connector.csv.url",
            "/data/in.csv",
            "--schema.keyspace=ks1",
            "-k",
            "ks2",
        ]))
        .unwrap();
        assert_eq!(
            pairs,
            vec![
                ("connector.csv.url".to_string(), "/data/in.csv".to_string()),
                ("schema.keyspace".to_string(), "ks1".to_string()),
                ("k".to_string(), "ks2".to_string()),
            ]
        );
    }

    #[test]
    fn missing_value_is_rejected() {
        assert!(parse_pairs(&args(&["--schema.keyspace"])).is_err());
        assert!(parse_pairs(&args(&["keyspace", "ks"])).is_err());
    }
}
