//! Routing-aware statement grouping.

use std::collections::HashMap;

use loadstone_types::statement::{Batch, BoundStatement, Executable};

/// How statements are grouped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMode {
    /// Group by partition routing token.
    #[default]
    PartitionKey,
    /// Group by the owning replica set, a weaker key that yields larger
    /// groups.
    ReplicaSet,
    /// Pass every statement through as a singleton.
    Disabled,
}

impl BatchMode {
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.to_ascii_uppercase().as_str() {
            "PARTITION_KEY" => Ok(BatchMode::PartitionKey),
            "REPLICA_SET" => Ok(BatchMode::ReplicaSet),
            "DISABLED" => Ok(BatchMode::Disabled),
            other => Err(format!("unknown batch mode: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatcherConfig {
    pub mode: BatchMode,
    pub max_batch_statements: usize,
    /// Non-positive disables the byte ceiling.
    pub max_size_in_bytes: i64,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            mode: BatchMode::PartitionKey,
            max_batch_statements: 32,
            max_size_in_bytes: -1,
        }
    }
}

struct Bucket {
    statements: Vec<BoundStatement>,
    bytes: usize,
    /// Arrival order of the bucket's first statement; flush ties go to
    /// the oldest.
    born: u64,
}

/// Groups an ordered statement stream into batches. Single-threaded by
/// design: it lives on one operator task and is never shared.
pub struct Batcher {
    mode: BatchMode,
    max_statements: usize,
    max_bytes: Option<usize>,
    buckets: HashMap<u64, Bucket>,
    arrivals: u64,
}

impl Batcher {
    pub fn new(config: BatcherConfig) -> Self {
        Self {
            mode: config.mode,
            max_statements: config.max_batch_statements.max(1),
            max_bytes: usize::try_from(config.max_size_in_bytes)
                .ok()
                .filter(|n| *n > 0),
            buckets: HashMap::new(),
            arrivals: 0,
        }
    }

    fn grouping_key(&self, statement: &BoundStatement, replica_set: Option<u64>) -> Option<u64> {
        match self.mode {
            BatchMode::Disabled => None,
            BatchMode::PartitionKey => statement.routing_token().map(|t| t as u64),
            BatchMode::ReplicaSet => {
                replica_set.or_else(|| statement.routing_token().map(|t| t as u64))
            }
        }
    }

    fn seal(bucket: Bucket) -> Executable {
        let mut statements = bucket.statements;
        if statements.len() == 1 {
            Executable::Statement(statements.pop().expect("one statement"))
        } else {
            let routing_token = statements.first().and_then(BoundStatement::routing_token);
            Executable::Batch(Batch {
                statements,
                routing_token,
            })
        }
    }

    /// Feeds one statement in; returns zero or more batches ready to
    /// submit.
    pub fn add(
        &mut self,
        statement: BoundStatement,
        replica_set: Option<u64>,
    ) -> Vec<Executable> {
        self.arrivals += 1;
        let key = match self.grouping_key(&statement, replica_set) {
            Some(key) => key,
            // No routing key (or batching disabled): bypass grouping.
            None => return vec![Executable::Statement(statement)],
        };

        let size = statement.size_in_bytes();
        if let Some(max_bytes) = self.max_bytes {
            if size > max_bytes {
                // A statement alone above the ceiling is submitted as an
                // un-batched singleton rather than failed.
                tracing::debug!(bytes = size, "oversized statement bypasses batching");
                return vec![Executable::Statement(statement)];
            }
        }

        let mut out = Vec::new();
        let arrivals = self.arrivals;
        let bucket = self.buckets.entry(key).or_insert_with(|| Bucket {
            statements: Vec::new(),
            bytes: 0,
            born: arrivals,
        });

        let would_overflow_bytes = self
            .max_bytes
            .map(|max| bucket.bytes + size > max)
            .unwrap_or(false);
        if would_overflow_bytes && !bucket.statements.is_empty() {
            let full = self.buckets.remove(&key).expect("bucket exists");
            out.push(Self::seal(full));
            self.buckets.insert(
                key,
                Bucket {
                    statements: Vec::new(),
                    bytes: 0,
                    born: arrivals,
                },
            );
        }

        let bucket = self.buckets.get_mut(&key).expect("bucket exists");
        bucket.bytes += size;
        bucket.statements.push(statement);
        if bucket.statements.len() >= self.max_statements {
            let full = self.buckets.remove(&key).expect("bucket exists");
            out.push(Self::seal(full));
        }
        out
    }

    /// End of input: flushes every open bucket, oldest first.
    pub fn finish(&mut self) -> Vec<Executable> {
        let mut buckets: Vec<Bucket> = self.buckets.drain().map(|(_, b)| b).collect();
        buckets.sort_by_key(|b| b.born);
        buckets.into_iter().map(Self::seal).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use loadstone_types::statement::{BoundVariable, PreparedTemplate};
    use loadstone_types::value::{CqlType, CqlValue};

    fn template() -> Arc<PreparedTemplate> {
        Arc::new(PreparedTemplate {
            query: "INSERT INTO ks.t (pk, v) VALUES (:pk, :v)".into(),
            variables: vec![
                BoundVariable {
                    name: "pk".into(),
                    cql_type: CqlType::Text,
                },
                BoundVariable {
                    name: "v".into(),
                    cql_type: CqlType::Text,
                },
            ],
            partition_key_indices: vec![0],
        })
    }

    fn stmt(pk: &str, v: &str) -> BoundStatement {
        BoundStatement::new(
            template(),
            vec![
                Some(CqlValue::Text(pk.into())),
                Some(CqlValue::Text(v.into())),
            ],
        )
    }

    fn keyless() -> BoundStatement {
        BoundStatement::new(template(), vec![None, Some(CqlValue::Text("v".into()))])
    }

    fn count_statements(executables: &[Executable]) -> usize {
        executables.iter().map(Executable::statement_count).sum()
    }

    #[test]
    fn same_token_statements_group_until_full() {
        let mut batcher = Batcher::new(BatcherConfig {
            max_batch_statements: 3,
            ..BatcherConfig::default()
        });
        let mut out = Vec::new();
        for i in 0..7 {
            out.extend(batcher.add(stmt("FR", &format!("v{i}")), None));
        }
        out.extend(batcher.finish());

        // 7 statements at size 3: two full batches and a tail of one.
        assert_eq!(out.len(), 3);
        assert_eq!(count_statements(&out), 7);
        match &out[0] {
            Executable::Batch(b) => {
                assert_eq!(b.len(), 3);
                // Arrival order preserved within the token.
                assert_eq!(b.statements[0].values[1], Some(CqlValue::Text("v0".into())));
                assert_eq!(b.statements[2].values[1], Some(CqlValue::Text("v2".into())));
            }
            other => panic!("unexpected: {other:?}"),
        }
        // The tail flushes as a plain statement, not a one-element batch.
        assert!(matches!(out[2], Executable::Statement(_)));
    }

    #[test]
    fn distinct_tokens_never_share_a_batch() {
        let mut batcher = Batcher::new(BatcherConfig::default());
        let mut out = Vec::new();
        for i in 0..4 {
            out.extend(batcher.add(stmt("FR", &format!("f{i}")), None));
            out.extend(batcher.add(stmt("US", &format!("u{i}")), None));
        }
        out.extend(batcher.finish());
        assert_eq!(count_statements(&out), 8);
        for executable in &out {
            if let Executable::Batch(batch) = executable {
                let tokens: Vec<_> = batch
                    .statements
                    .iter()
                    .map(|s| s.routing_token())
                    .collect();
                assert!(tokens.windows(2).all(|w| w[0] == w[1]), "mixed batch");
            }
        }
    }

    #[test]
    fn keyless_statements_bypass_grouping() {
        let mut batcher = Batcher::new(BatcherConfig::default());
        let out = batcher.add(keyless(), None);
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Executable::Statement(_)));
        assert!(batcher.finish().is_empty());
    }

    #[test]
    fn disabled_mode_emits_singletons() {
        let mut batcher = Batcher::new(BatcherConfig {
            mode: BatchMode::Disabled,
            ..BatcherConfig::default()
        });
        let mut out = Vec::new();
        for i in 0..5 {
            out.extend(batcher.add(stmt("FR", &format!("v{i}")), None));
        }
        out.extend(batcher.finish());
        assert_eq!(out.len(), 5);
        assert!(out.iter().all(|e| matches!(e, Executable::Statement(_))));
    }

    #[test]
    fn byte_ceiling_flushes_before_overflow() {
        // Each statement is ~50 bytes of values plus the query text.
        let size = stmt("FR", "0123456789").size_in_bytes();
        let mut batcher = Batcher::new(BatcherConfig {
            max_batch_statements: 100,
            max_size_in_bytes: (size * 2) as i64,
            ..BatcherConfig::default()
        });
        let mut out = Vec::new();
        for i in 0..5 {
            out.extend(batcher.add(stmt("FR", &format!("01234567{i:02}")), None));
        }
        out.extend(batcher.finish());
        assert_eq!(count_statements(&out), 5);
        for executable in &out {
            if let Executable::Batch(batch) = executable {
                assert!(batch.size_in_bytes() <= size * 2);
            }
        }
    }

    #[test]
    fn oversized_singleton_is_passed_through() {
        let small = stmt("FR", "x").size_in_bytes();
        let mut batcher = Batcher::new(BatcherConfig {
            max_size_in_bytes: (small + 1) as i64,
            ..BatcherConfig::default()
        });
        let big_value = "y".repeat(1000);
        let out = batcher.add(stmt("FR", &big_value), None);
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Executable::Statement(_)));
    }

    #[test]
    fn replica_set_mode_groups_across_tokens() {
        let mut batcher = Batcher::new(BatcherConfig {
            mode: BatchMode::ReplicaSet,
            max_batch_statements: 10,
            ..BatcherConfig::default()
        });
        let mut out = Vec::new();
        // Different partition keys, same replica set.
        out.extend(batcher.add(stmt("FR", "a"), Some(1)));
        out.extend(batcher.add(stmt("US", "b"), Some(1)));
        out.extend(batcher.finish());
        assert_eq!(out.len(), 1);
        match &out[0] {
            Executable::Batch(b) => assert_eq!(b.len(), 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn finish_flushes_oldest_bucket_first() {
        let mut batcher = Batcher::new(BatcherConfig::default());
        batcher.add(stmt("FR", "a"), None);
        batcher.add(stmt("US", "b"), None);
        batcher.add(stmt("FR", "c"), None);
        let out = batcher.finish();
        assert_eq!(out.len(), 2);
        match &out[0] {
            Executable::Batch(b) => {
                assert_eq!(b.statements[0].values[0], Some(CqlValue::Text("FR".into())))
            }
            Executable::Statement(s) => {
                assert_eq!(s.values[0], Some(CqlValue::Text("FR".into())))
            }
        }
    }
}
