//! End-to-end workflow runs against the primable in-memory session.

use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use loadstone_engine::workflow::{CountWorkflow, LoadWorkflow, UnloadWorkflow, Workflow};
use loadstone_engine::Settings;
use loadstone_types::driver::{CqlSession, DriverError};
use loadstone_types::error::WorkflowError;
use loadstone_types::result::Row;
use loadstone_types::testing::{sample_table, PrimedFailure, StubSession};
use loadstone_types::value::CqlValue;

const INSERT_PREFIX: &str = "INSERT INTO ks1.ip_by_country";

fn session() -> StubSession {
    StubSession::new().with_table(sample_table("ks1", "ip_by_country"))
}

/// Writes an `ip_by_country` CSV with `good` well-formed rows and
/// `bad` rows whose numeric column cannot be parsed.
fn write_fixture(path: &Path, good: usize, bad: usize) {
    let mut f = std::fs::File::create(path).unwrap();
    writeln!(
        f,
        "country_code,country_name,beginning_ip_address,ending_ip_address,beginning_ip_number,ending_ip_number"
    )
    .unwrap();
    let mut bad_left = bad;
    for i in 0..(good + bad) {
        // Bad rows are interleaved at the front to exercise the ceiling
        // before the stream drains.
        if bad_left > 0 && i % 2 == 1 {
            writeln!(f, "X{i},Badland,1.2.3.0,1.2.3.255,not_a_number,16909311").unwrap();
            bad_left -= 1;
        } else {
            writeln!(
                f,
                "C{i},Country {i},1.2.{m}.0,1.2.{m}.255,1690{i:04},1691{i:04}",
                m = i % 250
            )
            .unwrap();
        }
    }
}

fn load_settings(url: &str, dir: &Path, extra: &[(&str, &str)]) -> Settings {
    let mut overrides: Vec<(String, String)> = vec![
        ("connector.csv.url".into(), url.into()),
        ("schema.keyspace".into(), "ks1".into()),
        ("schema.table".into(), "ip_by_country".into()),
        ("log.directory".into(), dir.display().to_string()),
    ];
    for (k, v) in extra {
        overrides.push((k.to_string(), v.to_string()));
    }
    Settings::load(None, &overrides).unwrap()
}

async fn run_load(settings: Settings, session: Arc<StubSession>) -> Result<bool, WorkflowError> {
    let mut workflow = LoadWorkflow::new(settings, session);
    workflow.init().await?;
    let result = workflow.execute().await;
    workflow.close().await;
    result
}

fn bad_record_positions(dir: &Path, file: &str) -> Vec<u64> {
    let log_dir = find_execution_dir(dir);
    let path = log_dir.join(file);
    if !path.exists() {
        return Vec::new();
    }
    loadstone_engine::logmgr::read_entry_headers(&path)
        .unwrap()
        .into_iter()
        .map(|(_, p)| p)
        .collect()
}

fn find_execution_dir(dir: &Path) -> std::path::PathBuf {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.is_dir())
        .expect("execution directory created")
}

#[tokio::test]
async fn clean_load_writes_every_row() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.csv");
    write_fixture(&input, 24, 0);
    let logs = dir.path().join("logs");

    let session = Arc::new(session());
    let ok = run_load(
        load_settings(input.to_str().unwrap(), &logs, &[]),
        Arc::clone(&session),
    )
    .await
    .unwrap();

    assert!(ok);
    assert_eq!(session.write_statement_count(), 24);
    // Distinct partition keys: every row dispatches as its own insert.
    assert_eq!(session.recorded_query_count(INSERT_PREFIX), 24);
    // No bad-record files in the execution directory.
    let exec_dir = find_execution_dir(&logs);
    for file in ["mapping-errors.log", "load-errors.log", "connector-errors.log"] {
        assert!(!exec_dir.join(file).exists(), "{file} should not exist");
    }
}

#[tokio::test]
async fn malformed_rows_land_in_mapping_errors() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.csv");
    write_fixture(&input, 24, 3);
    let logs = dir.path().join("logs");

    let session = Arc::new(session());
    let ok = run_load(
        load_settings(input.to_str().unwrap(), &logs, &[]),
        Arc::clone(&session),
    )
    .await
    .unwrap();

    // Sub-ceiling failures do not fail the run; the bad rows are on
    // disk and the good ones are written.
    assert!(ok);
    assert_eq!(session.write_statement_count(), 24);
    let positions = bad_record_positions(&logs, "mapping-errors.log");
    assert_eq!(positions.len(), 3);
}

#[tokio::test]
async fn primed_server_failures_land_in_load_errors() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.csv");
    write_fixture(&input, 24, 0);
    let logs = dir.path().join("logs");

    // The driver retries retryable errors once. Unavailable and
    // WriteTimeout get that retry (which also fails, the primes are
    // unconditional); WriteFailure and FunctionFailure are not
    // retryable and fail on the first attempt.
    let session = Arc::new(session().with_max_retries(1));
    for (code, error) in [
        ("C2", DriverError::Unavailable("primed".into())),
        ("C5", DriverError::WriteTimeout("primed".into())),
        ("C8", DriverError::WriteFailure("primed".into())),
        ("C11", DriverError::FunctionFailure("primed".into())),
    ] {
        session.prime_failure(PrimedFailure {
            variable: "country_code".into(),
            value: CqlValue::Text(code.into()),
            error,
        });
    }

    let ok = run_load(
        load_settings(input.to_str().unwrap(), &logs, &[]),
        Arc::clone(&session),
    )
    .await
    .unwrap();

    // Sub-ceiling failures still complete the run.
    assert!(ok);
    // 24 statements plus the two retried ones: 26 observed queries.
    assert_eq!(session.recorded_query_count(INSERT_PREFIX), 26);
    // All four primed rows fail terminally and are persisted.
    let positions = bad_record_positions(&logs, "load-errors.log");
    assert_eq!(positions.len(), 4);
}

#[tokio::test]
async fn dry_run_executes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.csv");
    write_fixture(&input, 24, 0);
    let logs = dir.path().join("logs");

    let session = Arc::new(session());
    let ok = run_load(
        load_settings(input.to_str().unwrap(), &logs, &[("dryRun", "true")]),
        Arc::clone(&session),
    )
    .await
    .unwrap();

    assert!(ok);
    assert_eq!(session.recorded_query_count(INSERT_PREFIX), 0);
    assert_eq!(session.write_statement_count(), 0);
}

#[tokio::test]
async fn error_ceiling_aborts_the_load() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.csv");
    write_fixture(&input, 400, 5);
    let logs = dir.path().join("logs");

    let session = Arc::new(session());
    let result = run_load(
        load_settings(input.to_str().unwrap(), &logs, &[("maxErrors", "2")]),
        Arc::clone(&session),
    )
    .await;

    match result {
        Err(WorkflowError::TooManyErrors { errors, .. }) => assert!(errors >= 3),
        other => panic!("expected TooManyErrors, got {other:?}"),
    }
    // Failures observed before the abort are persisted.
    let positions = bad_record_positions(&logs, "mapping-errors.log");
    assert!(positions.len() >= 3, "only {} persisted", positions.len());
    // The abort cut the stream short of the 405 records.
    assert!(session.write_statement_count() < 405);
}

#[tokio::test]
async fn unload_writes_one_file_with_all_rows() {
    let dir = tempfile::tempdir().unwrap();
    let logs = dir.path().join("logs");
    let out = dir.path().join("out").join("export.csv");

    let session = Arc::new(session());
    let rows: Vec<Row> = (0..24)
        .map(|i| Row {
            columns: vec![
                ("country_code".into(), CqlValue::Text(format!("C{i}"))),
                ("country_name".into(), CqlValue::Text(format!("Country {i}"))),
                (
                    "beginning_ip_address".into(),
                    CqlValue::Inet("1.2.3.0".parse().unwrap()),
                ),
                (
                    "ending_ip_address".into(),
                    CqlValue::Inet("1.2.3.255".parse().unwrap()),
                ),
                ("beginning_ip_number".into(), CqlValue::BigInt(16_909_056)),
                ("ending_ip_number".into(), CqlValue::BigInt(16_909_311)),
            ],
        })
        .collect();
    session.prime_rows("SELECT", rows);

    let settings = load_settings(
        out.to_str().unwrap(),
        &logs,
        &[("maxConcurrentFiles", "1")],
    );
    let mut workflow = UnloadWorkflow::new(settings, Arc::clone(&session) as Arc<dyn CqlSession>);
    workflow.init().await.unwrap();
    let ok = workflow.execute().await.unwrap();
    workflow.close().await;

    assert!(ok);
    let written = std::fs::read_to_string(&out).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    // Header plus 24 rows.
    assert_eq!(lines.len(), 25);
    assert!(lines[0].starts_with("country_code,"));
    assert!(lines[1].starts_with("C0,Country 0,1.2.3.0,1.2.3.255,16909056,16909311"));
}

#[tokio::test]
async fn count_aggregates_rows_and_partitions() {
    let dir = tempfile::tempdir().unwrap();
    let logs = dir.path().join("logs");

    let session = Arc::new(session());
    // Three partitions of uneven size.
    let rows: Vec<Row> = ["FR", "FR", "FR", "US", "US", "DE"]
        .iter()
        .map(|code| Row {
            columns: vec![("country_code".into(), CqlValue::Text((*code).into()))],
        })
        .collect();
    session.prime_rows("SELECT", rows);

    let settings = Settings::load(
        None,
        &[
            ("schema.keyspace".to_string(), "ks1".to_string()),
            ("schema.table".to_string(), "ip_by_country".to_string()),
            ("log.directory".to_string(), logs.display().to_string()),
            ("stats.modes".to_string(), "[global, partitions]".to_string()),
            ("stats.num_partitions".to_string(), "2".to_string()),
        ],
    )
    .unwrap();
    let mut workflow = CountWorkflow::new(settings, Arc::clone(&session) as Arc<dyn CqlSession>);
    workflow.init().await.unwrap();
    let ok = workflow.execute().await.unwrap();
    assert!(ok);

    let report = workflow.report().unwrap();
    assert_eq!(report.total_rows, 6);
    assert_eq!(
        report.partitions,
        vec![("FR".to_string(), 3), ("US".to_string(), 2)]
    );
    workflow.close().await;
}

#[tokio::test]
async fn close_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.csv");
    write_fixture(&input, 2, 0);
    let logs = dir.path().join("logs");

    let session = Arc::new(session());
    let mut workflow = LoadWorkflow::new(
        load_settings(input.to_str().unwrap(), &logs, &[]),
        Arc::clone(&session) as Arc<dyn CqlSession>,
    );
    workflow.init().await.unwrap();
    workflow.execute().await.unwrap();
    workflow.close().await;
    workflow.close().await;
}
