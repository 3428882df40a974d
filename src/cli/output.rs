//! Output formatting for CLI commands.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::CacheStatsSnapshot;
use crate::cli::args::{EngineKind, OutputFormat, VocabTreeArgs};
use crate::error::Result;
use crate::search::{ScoreKind, SearchHit};

/// Result of training a codebook.
#[derive(Debug, Serialize, Deserialize)]
pub struct CodebookBuildResult {
    pub path: String,
    pub words: usize,
    pub dimension: usize,
    pub training_descriptors: usize,
    pub images_encoded: usize,
    pub duration_ms: u64,
}

/// Result of training a vocabulary tree.
#[derive(Debug, Serialize, Deserialize)]
pub struct TreeBuildResult {
    pub path: String,
    pub split: u32,
    pub depth: u32,
    pub nodes: usize,
    pub images_indexed: usize,
    pub images_supplied: usize,
    pub duration_ms: u64,
}

/// Result of building an inverted index.
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexBuildResult {
    pub path: String,
    pub words: usize,
    pub images_encoded: Option<usize>,
    pub images_indexed: usize,
    pub images_supplied: usize,
    pub duration_ms: u64,
}

/// Matches of one query image.
#[derive(Debug, Serialize, Deserialize)]
pub struct QueryMatches {
    pub query_id: u64,
    pub query_path: Option<String>,
    pub hits: Vec<NamedHit>,
}

/// A hit with its image path resolved.
#[derive(Debug, Serialize, Deserialize)]
pub struct NamedHit {
    #[serde(flatten)]
    pub hit: SearchHit,
    pub path: Option<String>,
}

/// Result of a search run.
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchReport {
    pub engine: EngineKind,
    pub score_kind: ScoreKind,
    pub queries: Vec<QueryMatches>,
    pub duration_ms: u64,
    pub cache: Option<CacheStatsSnapshot>,
}

/// Statistics of a persisted tree or index.
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexInfo {
    pub path: String,
    pub engine: EngineKind,
    pub size_bytes: u64,
    /// Tree node count or inverted index word count.
    pub entries: usize,
    pub split: Option<u32>,
    pub depth: Option<u32>,
    pub images: Option<usize>,
    /// Leaves (tree) or words (index) with at least one image.
    pub non_empty_lists: usize,
    pub longest_list: usize,
}

/// Output a result in the specified format.
pub fn output_result<T: Serialize>(message: &str, result: &T, args: &VocabTreeArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Human => {
            if args.verbosity() > 0 {
                println!("{message}");
                println!();
            }
            output_generic_human(&serde_json::to_value(result)?, 0);
            Ok(())
        }
        OutputFormat::Json => output_json(result, args),
    }
}

/// Output search matches in the specified format.
pub fn output_search(report: &SearchReport, args: &VocabTreeArgs) -> Result<()> {
    if args.output_format == OutputFormat::Json {
        return output_json(report, args);
    }

    let label = match report.score_kind {
        ScoreKind::Distance => "Distance",
        ScoreKind::Similarity => "Similarity",
    };
    for query in &report.queries {
        println!(
            "Query {} ({}):",
            query.query_id,
            query.query_path.as_deref().unwrap_or("?")
        );
        if query.hits.is_empty() {
            println!("  no match");
        }
        for (rank, named) in query.hits.iter().enumerate() {
            println!(
                "  {:>3}. {:>8}  {label}: {:.4}  {}",
                rank + 1,
                named.hit.image_id,
                named.hit.score,
                named.path.as_deref().unwrap_or("")
            );
        }
    }

    if args.verbosity() > 1 {
        println!();
        println!("Searched {} queries in {} ms", report.queries.len(), report.duration_ms);
        if let Some(cache) = &report.cache {
            println!(
                "Cache: {} hits, {} misses ({:.1}% hit rate)",
                cache.hits,
                cache.misses,
                cache.hit_rate() * 100.0
            );
        }
    }
    Ok(())
}

fn output_json<T: Serialize>(result: &T, args: &VocabTreeArgs) -> Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };
    println!("{json}");
    Ok(())
}

/// Print a JSON value as indented `key: value` lines.
fn output_generic_human(value: &Value, indent: usize) {
    let pad = "  ".repeat(indent);
    match value {
        Value::Object(map) => {
            for (key, value) in map {
                match value {
                    Value::Object(_) | Value::Array(_) => {
                        println!("{pad}{}:", format_key(key));
                        output_generic_human(value, indent + 1);
                    }
                    _ => println!("{pad}{}: {}", format_key(key), format_scalar(value)),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Object(_) | Value::Array(_) => output_generic_human(item, indent + 1),
                    _ => println!("{pad}- {}", format_scalar(item)),
                }
            }
        }
        other => println!("{pad}{}", format_scalar(other)),
    }
}

fn format_key(key: &str) -> String {
    let mut words = key.split('_');
    let mut formatted = String::new();
    if let Some(first) = words.next() {
        let mut chars = first.chars();
        if let Some(c) = chars.next() {
            formatted.extend(c.to_uppercase());
            formatted.push_str(chars.as_str());
        }
    }
    for word in words {
        formatted.push(' ');
        formatted.push_str(word);
    }
    formatted
}

fn format_scalar(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => format!("{f:.4}"),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}
