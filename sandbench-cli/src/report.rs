//! Report data structures and rendering.

use chrono::{DateTime, Utc};
use sandbench_core::{BenchTree, NodeId};
use serde::{Deserialize, Serialize};

/// Complete run report across all targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Report metadata.
    pub meta: ReportMeta,
    /// One entry per compiled target, in CLI order.
    pub targets: Vec<TargetReport>,
}

/// Report metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMeta {
    /// Schema version, bumped on breaking report-shape changes.
    pub schema_version: u32,
    /// Harness version that produced the report.
    pub version: String,
    /// When the report was produced.
    pub timestamp: DateTime<Utc>,
}

impl ReportMeta {
    /// Metadata for a report produced right now.
    pub fn now() -> Self {
        Self {
            schema_version: 1,
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// All benchmark results for one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetReport {
    /// Target identifier the guest was compiled for.
    pub target: String,
    /// Leaf results in declaration order.
    pub results: Vec<BenchSummary>,
}

/// One benchmark's results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchSummary {
    /// Slash-joined group path including the benchmark title.
    pub path: String,
    /// Timed iterations executed by the convergence loop.
    pub iterations: usize,
    /// Wall-clock time spent on this benchmark, milliseconds.
    pub runtime_ms: f64,
    /// Mean duration per iteration, if collected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_ms: Option<f64>,
    /// Median duration, if collected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub median_ms: Option<f64>,
    /// Slowest iteration, if collected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum_ms: Option<f64>,
    /// Fastest iteration, if collected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_ms: Option<f64>,
    /// Population variance of the durations, if collected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variance: Option<f64>,
    /// Standard deviation of the durations, if collected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std_dev_ms: Option<f64>,
}

/// Collect every leaf of an evaluated tree into a [`TargetReport`].
pub fn summarize_target(target: &str, tree: &BenchTree) -> TargetReport {
    let results = tree
        .leaves()
        .into_iter()
        .map(|id| {
            let node = tree.node(id);
            BenchSummary {
                path: title_path(tree, id),
                iterations: node.runs.len(),
                runtime_ms: node.runtime(),
                mean_ms: node.mean,
                median_ms: node.median,
                maximum_ms: node.maximum,
                minimum_ms: node.minimum,
                variance: node.variance,
                std_dev_ms: node.std_dev,
            }
        })
        .collect();
    TargetReport {
        target: target.to_string(),
        results,
    }
}

/// Titles from the outermost group down to the node, slash-joined. The
/// untitled root contributes nothing.
fn title_path(tree: &BenchTree, id: NodeId) -> String {
    let mut titles = Vec::new();
    let mut cursor = Some(id);
    while let Some(at) = cursor {
        let node = tree.node(at);
        if !node.title.is_empty() {
            titles.push(node.title.as_str());
        }
        cursor = node.parent;
    }
    titles.reverse();
    titles.join(" / ")
}

/// Generate a prettified JSON report.
pub fn generate_json_report(report: &Report) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

/// Render the report for terminal display.
pub fn format_human_output(report: &Report) -> String {
    let mut out = String::new();
    for target in &report.targets {
        out.push_str(&format!("Target: {}\n", target.target));
        for result in &target.results {
            out.push_str(&format!(
                "  {} ({} iterations in {})\n",
                result.path,
                result.iterations,
                format_ms(result.runtime_ms)
            ));
            let mut stats = Vec::new();
            if let Some(mean) = result.mean_ms {
                stats.push(format!("mean {}", format_ms(mean)));
            }
            if let Some(median) = result.median_ms {
                stats.push(format!("median {}", format_ms(median)));
            }
            if let Some(minimum) = result.minimum_ms {
                stats.push(format!("min {}", format_ms(minimum)));
            }
            if let Some(maximum) = result.maximum_ms {
                stats.push(format!("max {}", format_ms(maximum)));
            }
            if let Some(std_dev) = result.std_dev_ms {
                stats.push(format!("σ {}", format_ms(std_dev)));
            }
            if let Some(variance) = result.variance {
                stats.push(format!("σ² {:.6}", variance));
            }
            if !stats.is_empty() {
                out.push_str(&format!("    {}\n", stats.join("  ")));
            }
        }
        out.push('\n');
    }
    let total: usize = report.targets.iter().map(|t| t.results.len()).sum();
    out.push_str(&format!("{} benchmark(s) across {} target(s)\n", total, report.targets.len()));
    out
}

/// Millisecond quantity with a unit picked for readability.
pub fn format_ms(ms: f64) -> String {
    if ms >= 1000.0 {
        format!("{:.2} s", ms / 1000.0)
    } else if ms >= 1.0 {
        format!("{:.3} ms", ms)
    } else {
        format!("{:.3} µs", ms * 1000.0)
    }
}
