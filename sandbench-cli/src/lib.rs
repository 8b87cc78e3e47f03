#![warn(missing_docs)]
//! Sandbench CLI
//!
//! Argument parsing and the outer run loop: compile each requested target
//! through the [`Compiler`] collaborator, write any requested artifacts,
//! register the guest's benchmark tree, filter it, drive the engine, and
//! render the report.
//!
//! # Example
//!
//! ```ignore
//! fn main() -> anyhow::Result<()> {
//!     let mut compiler = MyGuestCompiler::new();
//!     sandbench_cli::run(&mut compiler)
//! }
//! ```

mod compiler;
mod report;

pub use compiler::{artifact_paths, ArtifactPaths, CompiledModule, Compiler};
pub use report::{
    format_human_output, format_ms, generate_json_report, summarize_target, BenchSummary, Report,
    ReportMeta, TargetReport,
};

use clap::{Parser, Subcommand};
use regex::Regex;
use sandbench_core::{register_tree, BenchTree, Clock, Engine, NodeId};
use std::path::PathBuf;

/// Sandbench CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "sandbench")]
#[command(author, version, about = "Adaptive micro-benchmark harness for sandboxed guest modules")]
pub struct Cli {
    /// Optional subcommand (List, Run); defaults to Run
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Entry file patterns, forwarded untouched to the compiler
    pub entries: Vec<String>,

    /// Target to compile and benchmark; repeat for multiple targets
    #[arg(short, long = "target", default_value = "release")]
    pub target: Vec<String>,

    /// Write the compiled module to build/bench.{target}.wasm
    #[arg(long)]
    pub emit_binary: bool,

    /// Write the text-format module to build/bench.{target}.wat
    #[arg(long)]
    pub emit_text: bool,

    /// Write the source map to build/bench.{target}.wasm.map
    #[arg(long)]
    pub emit_sourcemap: bool,

    /// Only run benchmarks whose title matches this regex
    #[arg(long, default_value = ".*")]
    pub filter: String,

    /// Output format: human, json
    #[arg(long, default_value = "human")]
    pub format: String,

    /// Report file (stdout if not specified)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the benchmarks each target declares, without running them
    List,
    /// Compile and run benchmarks (default)
    Run,
}

/// Parse arguments from the environment and run.
pub fn run(compiler: &mut dyn Compiler) -> anyhow::Result<()> {
    let cli = Cli::parse();
    run_with_cli(cli, compiler)
}

/// Run with pre-parsed arguments.
pub fn run_with_cli(cli: Cli, compiler: &mut dyn Compiler) -> anyhow::Result<()> {
    let env_filter = if cli.verbose {
        "sandbench=debug"
    } else {
        "sandbench=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init()
        .ok();

    let filter = Regex::new(&cli.filter)?;
    match cli.command {
        Some(Commands::List) => list_benchmarks(&cli, compiler, &filter),
        Some(Commands::Run) | None => run_benchmarks(&cli, compiler, &filter),
    }
}

fn compile_target(
    cli: &Cli,
    compiler: &mut dyn Compiler,
    target: &str,
) -> anyhow::Result<CompiledModule> {
    tracing::debug!(profile = %target, "compiling guest module");
    let module = compiler.compile(&cli.entries, target)?;
    write_artifacts(cli, target, &module)?;
    Ok(module)
}

/// Write the artifacts the emit flags asked for. A requested artifact the
/// compiler did not produce is an error, not a silent skip.
fn write_artifacts(cli: &Cli, target: &str, module: &CompiledModule) -> anyhow::Result<()> {
    if !(cli.emit_binary || cli.emit_text || cli.emit_sourcemap) {
        return Ok(());
    }
    let paths = artifact_paths(target);
    if let Some(parent) = paths.binary.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if cli.emit_binary {
        let binary = module.binary.as_ref().ok_or_else(|| {
            anyhow::anyhow!("compiler produced no binary for target '{target}'")
        })?;
        std::fs::write(&paths.binary, binary)?;
        tracing::info!(path = %paths.binary.display(), "binary written");
    }
    if cli.emit_text {
        let text = module.text.as_ref().ok_or_else(|| {
            anyhow::anyhow!("compiler produced no text module for target '{target}'")
        })?;
        std::fs::write(&paths.text, text)?;
        tracing::info!(path = %paths.text.display(), "text module written");
    }
    if cli.emit_sourcemap {
        let source_map = module.source_map.as_ref().ok_or_else(|| {
            anyhow::anyhow!("compiler produced no source map for target '{target}'")
        })?;
        std::fs::write(&paths.source_map, source_map)?;
        tracing::info!(path = %paths.source_map.display(), "source map written");
    }
    Ok(())
}

/// Prune leaves whose title does not match `re`, then any group left empty.
/// Returns whether the subtree still contains anything worth running; the
/// root survives regardless.
fn apply_filter(tree: &mut BenchTree, id: NodeId, re: &Regex) -> bool {
    if !tree.node(id).is_group {
        return re.is_match(&tree.node(id).title);
    }
    for child in tree.node(id).children.clone() {
        if !apply_filter(tree, child, re) {
            tree.remove_child(id, child);
        }
    }
    !tree.node(id).children.is_empty() || id == tree.root()
}

fn list_benchmarks(cli: &Cli, compiler: &mut dyn Compiler, filter: &Regex) -> anyhow::Result<()> {
    let mut total = 0;
    for target in &cli.target {
        let mut module = compile_target(cli, compiler, target)?;
        let clock = Clock::new();
        let mut tree = register_tree(&mut *module.guest, &clock)?;
        let root = tree.root();
        apply_filter(&mut tree, root, filter);
        println!("Target: {target}");
        print_subtree(&tree, root, 1);
        total += tree.leaves().len();
    }
    println!("{total} benchmark(s) found.");
    Ok(())
}

fn print_subtree(tree: &BenchTree, id: NodeId, depth: usize) {
    let indent = "  ".repeat(depth);
    for child in &tree.node(id).children {
        let node = tree.node(*child);
        if node.is_group {
            println!("{indent}{}/", node.title);
            print_subtree(tree, *child, depth + 1);
        } else {
            println!("{indent}{}", node.title);
        }
    }
}

fn run_benchmarks(cli: &Cli, compiler: &mut dyn Compiler, filter: &Regex) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;

    let mut targets = Vec::new();
    for target in &cli.target {
        let mut module = compile_target(cli, compiler, target)?;
        let clock = Clock::new();
        let mut tree = register_tree(&mut *module.guest, &clock)?;
        let root = tree.root();
        apply_filter(&mut tree, root, filter);
        let engine = Engine::with_clock(clock);
        runtime.block_on(engine.run(&mut *module.guest, &mut tree))?;
        targets.push(summarize_target(target, &tree));
    }

    let report = Report {
        meta: ReportMeta::now(),
        targets,
    };
    let output = match cli.format.as_str() {
        "json" => generate_json_report(&report)?,
        _ => format_human_output(&report),
    };
    if let Some(ref path) = cli.output {
        std::fs::write(path, output.as_bytes())?;
        println!("Report written to: {}", path.display());
    } else {
        print!("{output}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandbench_guest::{GuestBuilder, HostImports};

    /// Compiler stub declaring a two-leaf suite, with a tiny binary payload
    /// so the emit path has something to write.
    struct StubCompiler;

    impl Compiler for StubCompiler {
        fn compile(&mut self, _entries: &[String], _target: &str) -> anyhow::Result<CompiledModule> {
            let mut builder = GuestBuilder::new();
            let group_title = builder.intern("math");
            let fast_title = builder.intern("fast");
            let slow_title = builder.intern("slow");
            let fast = builder.add_function(|_g, _h| Ok(()));
            let slow = builder.add_function(|_g, _h| Ok(()));
            let decl = builder.add_function(move |g, h| {
                h.report_node(g, fast_title, fast, false)?;
                h.report_node(g, slow_title, slow, false)
            });
            builder.set_start(move |g, h| {
                h.set_iteration_count(2)?;
                h.set_min_iteration_count(1)?;
                h.report_node(g, group_title, decl, true)
            });
            Ok(CompiledModule {
                guest: Box::new(builder.build()),
                binary: Some(vec![0x00, 0x61, 0x73, 0x6d]),
                text: None,
                source_map: None,
            })
        }
    }

    fn base_cli() -> Cli {
        Cli {
            command: Some(Commands::Run),
            entries: vec![],
            target: vec!["release".to_string()],
            emit_binary: false,
            emit_text: false,
            emit_sourcemap: false,
            filter: ".*".to_string(),
            format: "json".to_string(),
            output: None,
            verbose: false,
        }
    }

    #[test]
    fn test_parse_repeated_targets_and_emit_flags() {
        let cli = Cli::try_parse_from([
            "sandbench",
            "-t",
            "debug",
            "-t",
            "release",
            "--emit-binary",
            "bench/*.ts",
        ])
        .unwrap();
        assert_eq!(cli.target, vec!["debug", "release"]);
        assert!(cli.emit_binary);
        assert!(!cli.emit_text);
        assert_eq!(cli.entries, vec!["bench/*.ts"]);
        assert_eq!(cli.filter, ".*");
    }

    #[test]
    fn test_filter_prunes_leaves_and_empty_groups() {
        let mut module = StubCompiler.compile(&[], "release").unwrap();
        let clock = Clock::new();
        let mut tree = register_tree(&mut *module.guest, &clock).unwrap();
        let root = tree.root();

        apply_filter(&mut tree, root, &Regex::new("fast").unwrap());
        let leaves = tree.leaves();
        assert_eq!(leaves.len(), 1);
        assert_eq!(tree.node(leaves[0]).title, "fast");

        // A filter matching nothing empties the group, which then drops too.
        let mut module = StubCompiler.compile(&[], "release").unwrap();
        let mut tree = register_tree(&mut *module.guest, &clock).unwrap();
        let root = tree.root();
        apply_filter(&mut tree, root, &Regex::new("nothing-matches").unwrap());
        assert!(tree.node(root).children.is_empty());
    }

    #[test]
    fn test_run_writes_json_report_per_target() {
        let path = std::env::temp_dir().join("sandbench-cli-report-test.json");
        let mut cli = base_cli();
        cli.target = vec!["debug".to_string(), "release".to_string()];
        cli.output = Some(path.clone());

        run_with_cli(cli, &mut StubCompiler).unwrap();

        let json = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();
        let report: Report = serde_json::from_str(&json).unwrap();
        assert_eq!(report.targets.len(), 2);
        assert_eq!(report.targets[0].target, "debug");
        for target in &report.targets {
            assert_eq!(target.results.len(), 2);
            for result in &target.results {
                // iteration_count 2, floor 1: exactly one batch each.
                assert_eq!(result.iterations, 2);
                assert!(result.mean_ms.is_some());
            }
        }
    }
}
