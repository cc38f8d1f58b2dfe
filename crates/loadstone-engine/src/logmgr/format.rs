//! Error-chain rendering: full for disk, sanitized for the console.

/// Renders the complete cause chain, one cause per line.
pub fn full_chain(error: &anyhow::Error) -> String {
    let mut out = String::new();
    for (depth, cause) in error.chain().enumerate() {
        if depth == 0 {
            out.push_str(&cause.to_string());
        } else {
            out.push_str("\n  caused by: ");
            out.push_str(&cause.to_string());
        }
    }
    out
}

/// Renders the cause chain for user display: causes whose message starts
/// with a filtered prefix are skipped, and the chain is truncated at
/// `max_depth` causes.
pub fn sanitized_chain(error: &anyhow::Error, prefixes: &[String], max_depth: usize) -> String {
    let mut causes: Vec<String> = error
        .chain()
        .map(ToString::to_string)
        .filter(|message| !prefixes.iter().any(|p| message.starts_with(p.as_str())))
        .collect();
    if causes.is_empty() {
        // Never sanitize a chain into nothing.
        causes.push(error.to_string());
    }
    causes.truncate(max_depth.max(1));
    causes.join(": ")
}

/// Collapses a record source onto one escaped line for bad-record file
/// headers.
pub fn escape_single_line(source: &str) -> String {
    source.replace('\\', "\\\\").replace('\n', "\\n").replace('\r', "\\r")
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    fn chained() -> anyhow::Error {
        anyhow::anyhow!("root cause")
            .context("middle layer")
            .context("outer layer")
    }

    #[test]
    fn full_chain_keeps_every_cause() {
        let rendered = full_chain(&chained());
        assert!(rendered.contains("outer layer"));
        assert!(rendered.contains("middle layer"));
        assert!(rendered.contains("root cause"));
    }

    #[test]
    fn sanitized_chain_filters_and_truncates() {
        let rendered = sanitized_chain(&chained(), &["middle".to_string()], 2);
        assert_eq!(rendered, "outer layer: root cause");

        let truncated = sanitized_chain(&chained(), &[], 1);
        assert_eq!(truncated, "outer layer");
    }

    #[test]
    fn sanitizing_everything_still_reports_something() {
        let error = anyhow::anyhow!("tokio:: internal");
        let rendered = sanitized_chain(&error, &["tokio::".to_string()], 3);
        assert_eq!(rendered, "tokio:: internal");
    }

    #[test]
    fn sources_escape_to_one_line() {
        assert_eq!(escape_single_line("a,b\nc\r"), "a,b\\nc\\r");
    }
}
