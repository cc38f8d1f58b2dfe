//! Per-section help.

/// `(section, summary, notable keys)`.
const SECTIONS: &[(&str, &str, &[&str])] = &[
    (
        "connector",
        "External record sources and sinks",
        &[
            "connector.name (csv | json)",
            "connector.csv.url",
            "connector.csv.delimiter",
            "connector.csv.header",
            "connector.csv.max_concurrent_files",
            "connector.json.url",
        ],
    ),
    (
        "driver",
        "Database session",
        &["driver.hosts", "driver.port", "driver.consistency", "driver.page_size"],
    ),
    (
        "schema",
        "Target table and field mapping",
        &["schema.keyspace", "schema.table", "schema.mapping"],
    ),
    (
        "batch",
        "Statement grouping",
        &["batch.mode", "batch.max_batch_statements", "batch.max_size_in_bytes"],
    ),
    (
        "executor",
        "Concurrency and rate limits",
        &[
            "executor.max_in_flight_requests",
            "executor.max_in_flight_queries",
            "executor.max_requests_per_second",
            "executor.continuous_paging",
        ],
    ),
    (
        "codec",
        "Conversion rules",
        &[
            "codec.locale",
            "codec.time_zone",
            "codec.null_strings",
            "codec.boolean_strings",
            "codec.number",
            "codec.overflow_strategy",
            "codec.timestamp",
            "codec.unit",
            "codec.epoch",
            "codec.uuid_strategy",
        ],
    ),
    (
        "log",
        "Execution directory and error ceiling",
        &[
            "log.directory",
            "log.max_errors",
            "log.max_held_positions",
            "log.stack_trace_depth",
        ],
    ),
    ("monitoring", "Progress reporting", &["monitoring.report_rate_seconds"]),
    (
        "engine",
        "Run behavior",
        &["engine.dry_run", "engine.execution_id"],
    ),
    (
        "stats",
        "Count aggregation",
        &["stats.modes", "stats.num_partitions"],
    ),
];

/// Renders help for one settings section, or lists the sections.
pub fn section_help(section: Option<&str>) -> Result<String, String> {
    match section {
        None => {
            let mut out = String::from("Settings sections:\n");
            for (name, summary, _) in SECTIONS {
                out.push_str(&format!("  {name:<12} {summary}\n"));
            }
            out.push_str("\nUse `loadstone help <section>` for the keys in one section.\n");
            Ok(out)
        }
        Some(wanted) => SECTIONS
            .iter()
            .find(|(name, _, _)| *name == wanted)
            .map(|(name, summary, keys)| {
                let mut out = format!("{name} - {summary}\n\n");
                for key in *keys {
                    out.push_str(&format!("  --{key}\n"));
                }
                out
            })
            .ok_or_else(|| format!("unknown settings section: {wanted}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_all_sections() {
        let out = section_help(None).unwrap();
        for name in ["connector", "driver", "schema", "batch", "executor", "codec", "log"] {
            assert!(out.contains(name));
        }
    }

    #[test]
    fn renders_one_section() {
        let out = section_help(Some("executor")).unwrap();
        assert!(out.contains("--executor.max_in_flight_requests"));
    }

    #[test]
    fn unknown_section_is_an_error() {
        assert!(section_help(Some("nope")).is_err());
    }
}
