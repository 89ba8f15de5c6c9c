//! Shards command implementation.

use serde::Serialize;
use shardtx_core::{
    BackendType, CoreError, CoreResult, DataSourceConfig, Keyspace, Session, Shard, Transacter,
};
use shardtx_driver::InMemoryDatabase;
use std::sync::Arc;

const SHOW_TARGET: &str = "SHOW VITESS_TARGET";

/// Shard listing result.
#[derive(Debug, Serialize)]
pub struct ShardsReport {
    /// Keyspace listed.
    pub keyspace: String,
    /// Shards of the keyspace.
    pub shards: Vec<ShardInfo>,
    /// Connection target around a targeted block (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub targeting: Option<TargetingInfo>,
}

/// One shard and the keyspace ids it serves.
#[derive(Debug, Serialize)]
pub struct ShardInfo {
    /// `<keyspace>/<range>` name.
    pub name: String,
    /// Inclusive lower bound in hex, empty if unbounded.
    pub start: String,
    /// Exclusive upper bound in hex, empty if unbounded.
    pub end: String,
}

/// Connection targets observed while targeting a shard.
#[derive(Debug, Serialize)]
pub struct TargetingInfo {
    /// Shard targeted.
    pub shard: String,
    /// Target before the block.
    pub before: String,
    /// Target inside the block.
    pub inside: String,
    /// Target after the block.
    pub after: String,
}

/// Runs the shards command.
pub fn run(
    keyspace: &str,
    ranges: &str,
    target: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = list(keyspace, ranges, target)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }

    Ok(())
}

/// Lists the shards of a simulated keyspace split along `ranges`.
///
/// # Errors
///
/// Returns `InvalidArgument` for malformed ranges or targets.
pub fn list(keyspace: &str, ranges: &str, target: Option<&str>) -> CoreResult<ShardsReport> {
    let names: Vec<String> = ranges
        .split(',')
        .map(str::trim)
        .filter(|range| !range.is_empty())
        .map(|range| format!("{keyspace}/{range}"))
        .collect();
    if names.is_empty() {
        return Err(CoreError::invalid_argument("at least one shard range is required"));
    }
    let target = target.map(|t| parse_target(keyspace, t)).transpose()?;

    let db = InMemoryDatabase::sharded(names);
    let transacter = Transacter::builder(Arc::new(db))
        .data_source(DataSourceConfig::new(keyspace, BackendType::Vitess))
        .build()?;

    let keyspace = Keyspace::new(keyspace);
    let (shards, targeting) = transacter.no_retries().transaction(|session| {
        let shards = session.shards_in(&keyspace)?;
        let targeting = match &target {
            Some(shard) => Some(observe_targeting(session, shard)?),
            None => None,
        };
        Ok((shards, targeting))
    })?;

    let shards = shards
        .iter()
        .map(|shard| -> CoreResult<ShardInfo> {
            let range = shard.key_range()?;
            Ok(ShardInfo {
                name: shard.to_string(),
                start: hex(range.start()),
                end: hex(range.end()),
            })
        })
        .collect::<CoreResult<Vec<_>>>()?;

    Ok(ShardsReport {
        keyspace: keyspace.to_string(),
        shards,
        targeting,
    })
}

fn parse_target(keyspace: &str, target: &str) -> CoreResult<Shard> {
    if target.contains('/') {
        Shard::parse(target)
    } else {
        Shard::parse(&format!("{keyspace}/{target}"))
    }
}

fn observe_targeting(session: &mut Session, shard: &Shard) -> CoreResult<TargetingInfo> {
    let before = current_target(session)?;
    let inside = session.target(shard, current_target)?;
    let after = current_target(session)?;
    Ok(TargetingInfo {
        shard: shard.to_string(),
        before,
        inside,
        after,
    })
}

fn current_target(session: &mut Session) -> CoreResult<String> {
    session.use_connection(|connection| {
        let rows = connection.query(SHOW_TARGET)?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .unwrap_or_default())
    })
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn print_text_output(report: &ShardsReport) {
    println!("shardtx Shard Listing");
    println!("=====================");
    println!();
    println!("Keyspace: {}", report.keyspace);
    println!();
    println!("Shards:");
    for shard in &report.shards {
        println!(
            "  {:<24} [{}, {})",
            shard.name,
            display_bound(&shard.start),
            display_bound(&shard.end)
        );
    }

    if let Some(targeting) = &report.targeting {
        println!();
        println!("Targeting {}:", targeting.shard);
        println!("  before: {}", display_target(&targeting.before));
        println!("  inside: {}", display_target(&targeting.inside));
        println!("  after:  {}", display_target(&targeting.after));
    }
}

fn display_bound(bound: &str) -> &str {
    if bound.is_empty() {
        "*"
    } else {
        bound
    }
}

fn display_target(target: &str) -> &str {
    if target.is_empty() {
        "(none)"
    } else {
        target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_ranges_with_bounds() {
        let report = list("commerce", "-40, 40-80,80-", None).unwrap();
        let names: Vec<_> = report.shards.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["commerce/-40", "commerce/40-80", "commerce/80-"]);

        let middle = &report.shards[1];
        assert_eq!(middle.start, "40");
        assert_eq!(middle.end, "80");
        assert_eq!(report.shards[0].start, "");
        assert!(report.targeting.is_none());
    }

    #[test]
    fn targeting_restores_the_previous_target() {
        let report = list("commerce", "-80,80-", Some("80-")).unwrap();
        let targeting = report.targeting.unwrap();
        assert_eq!(targeting.shard, "commerce/80-");
        assert_eq!(targeting.before, "");
        assert_eq!(targeting.inside, "commerce/80-");
        assert_eq!(targeting.after, "");
    }

    #[test]
    fn qualified_targets_are_accepted() {
        let report = list("commerce", "0", Some("commerce/0")).unwrap();
        assert_eq!(report.shards.len(), 1);
        assert_eq!(report.targeting.unwrap().inside, "commerce/0");
    }

    #[test]
    fn bad_input_is_rejected() {
        assert!(list("commerce", " , ", None).is_err());
        assert!(list("commerce", "80-40", None).is_err());
        assert!(list("commerce", "-80", Some("/")).is_err());
    }
}
