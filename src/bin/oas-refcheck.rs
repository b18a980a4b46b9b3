//! OpenAPI Reference Checker CLI
//!
//! Command-line interface for checking and repairing `$ref` references in a
//! multi-file OpenAPI description.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use oas_refcheck::{
    load_tree, persist, repair_document, validate, Category, Classification, ComponentRegistry,
    Coverage, Finding, LoadOptions, LoadedTree, Report, ResolutionResult, SecurityGap,
    ValidateOptions,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "oas-refcheck")]
#[command(about = "Check and repair $ref references in a multi-file OpenAPI description")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve every reference and report broken ones
    Check {
        /// Root directory (or single file) of the description
        root: PathBuf,

        /// Output format: text (default) or json
        #[arg(long, default_value = "text", value_parser = ["text", "json"])]
        format: String,

        /// Examples shown per classification in text output
        #[arg(long, default_value_t = 5)]
        examples: usize,

        /// Require every schema module to carry this field (e.g. tenant_id)
        #[arg(long, value_name = "FIELD")]
        require_field: Option<String>,

        /// Check schema definitions against the JSON Schema meta-schema
        #[arg(long)]
        lint_schemas: bool,

        /// Report path operations without an explicit security requirement
        #[arg(long)]
        check_security: bool,

        /// Fail on coverage gaps, cycles, schema warnings and security gaps too
        #[arg(long)]
        strict: bool,

        /// Declare the category of a file or directory: CATEGORY=PATH
        #[arg(long, value_name = "CATEGORY=PATH", value_parser = parse_component)]
        component: Vec<(Category, PathBuf)>,
    },

    /// Insert the missing '/' in fragments like 'schemas.yaml#Widget'
    Repair {
        /// Root directory (or single file) of the description
        root: PathBuf,

        /// Print the changes without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Declare the category of a file or directory: CATEGORY=PATH
        #[arg(long, value_name = "CATEGORY=PATH", value_parser = parse_component)]
        component: Vec<(Category, PathBuf)>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Check {
            root,
            format,
            examples,
            require_field,
            lint_schemas,
            check_security,
            strict,
            component,
        } => run_check(CheckArgs {
            root,
            json_output: format == "json",
            examples,
            options: ValidateOptions {
                required_field: require_field,
                lint_schemas,
                check_security,
            },
            strict,
            components: component,
        }),

        Commands::Repair {
            root,
            dry_run,
            component,
        } => run_repair(&root, dry_run, component),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn parse_component(s: &str) -> Result<(Category, PathBuf), String> {
    let (category, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected CATEGORY=PATH, got \"{}\"", s))?;
    let category = Category::parse(category).ok_or_else(|| {
        format!(
            "unknown category \"{}\": expected parameters, responses, or schemas",
            category
        )
    })?;
    if path.is_empty() {
        return Err("empty path".to_string());
    }
    Ok((category, PathBuf::from(path)))
}

fn load(root: &Path, components: Vec<(Category, PathBuf)>) -> Result<LoadedTree, u8> {
    let options = components
        .into_iter()
        .fold(LoadOptions::default(), |options, (category, path)| {
            options.category(path, category)
        });
    load_tree(root, &options).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })
}

struct CheckArgs {
    root: PathBuf,
    json_output: bool,
    examples: usize,
    options: ValidateOptions,
    strict: bool,
    components: Vec<(Category, PathBuf)>,
}

fn run_check(args: CheckArgs) -> Result<(), u8> {
    let CheckArgs {
        root,
        json_output,
        examples,
        options,
        strict,
        components,
    } = args;

    let tree = load(&root, components)?;

    let registry = ComponentRegistry::from_documents(&tree.documents).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let report = validate(&tree.documents, &registry, &options).with_load_failures(tree.failures);

    if json_output {
        let output = serde_json::to_string_pretty(&report).map_err(|e| {
            eprintln!("Error serializing output: {}", e);
            2u8
        })?;
        println!("{}", output);
    } else {
        print_report(&root, &report, examples, strict);
    }

    // A document that failed to load outranks broken references.
    if let Some(code) = report
        .load_failures
        .iter()
        .map(|f| f.error.exit_code() as u8)
        .max()
    {
        return Err(code);
    }

    if report.is_clean(strict) {
        Ok(())
    } else {
        Err(1)
    }
}

fn print_report(root: &Path, report: &Report, examples: usize, strict: bool) {
    println!("Checking {} ...\n", root.display());

    for failure in &report.load_failures {
        println!(
            "  \x1b[31m✗\x1b[0m {}: {}",
            failure.document.display(),
            failure.message
        );
    }

    for class in Classification::ALL {
        let count = report.count(class);
        let icon = if class.is_failure() && count > 0 {
            "\x1b[31m✗\x1b[0m"
        } else if class == Classification::Valid || count == 0 {
            "\x1b[32m✓\x1b[0m"
        } else {
            "\x1b[33m⚠\x1b[0m"
        };
        println!("  {} {:<22} {:>6}", icon, class.label(), count);

        if class.is_failure() {
            for finding in report.examples(class, examples) {
                print_finding(finding);
            }
            if count > examples {
                println!("      ... and {} more", count - examples);
            }
        }
    }

    for duplicate in &report.duplicates {
        let documents: Vec<String> = duplicate
            .documents
            .iter()
            .map(|d| d.display().to_string())
            .collect();
        println!(
            "  \x1b[36mℹ\x1b[0m {} \"{}\" defined in {}",
            duplicate.category,
            duplicate.name,
            documents.join(", ")
        );
    }

    if let Some(coverage) = &report.field_coverage {
        println!();
        for module in &coverage.modules {
            if module.compliant {
                println!(
                    "  \x1b[32m✓\x1b[0m {}: {} present",
                    module.document.display(),
                    coverage.field
                );
            } else {
                println!(
                    "  \x1b[33m⚠\x1b[0m {}: no component carries {}",
                    module.document.display(),
                    coverage.field
                );
            }
        }
        for (module, component) in coverage.cycles() {
            if let Coverage::Cyclic { chain } = &component.coverage {
                let chain: Vec<String> = chain.iter().map(|id| id.to_string()).collect();
                println!(
                    "  \x1b[33mwarning[cycle]\x1b[0m: {}#/{} - {}",
                    module.document.display(),
                    component.name,
                    chain.join(" -> ")
                );
            }
        }
    }

    for warning in &report.schema_warnings {
        println!(
            "  \x1b[33mwarning[schema]\x1b[0m: {} - {}",
            warning.component, warning.message
        );
    }

    print_security_gaps(&report.security_gaps);

    println!();
    if report.is_clean(strict) {
        println!(
            "\x1b[32m✓ {} documents, {} references checked, none broken\x1b[0m",
            report.documents_checked, report.references
        );
    } else {
        println!(
            "\x1b[31m✗ {} documents, {} references checked: {} broken, {} documents failed to load\x1b[0m",
            report.documents_checked,
            report.references,
            report.failures(),
            report.load_failures.len()
        );
    }
}

/// Grouped per document: the first three operations, then a count.
fn print_security_gaps(gaps: &[SecurityGap]) {
    const SHOWN: usize = 3;

    let mut by_document: BTreeMap<&Path, Vec<&SecurityGap>> = BTreeMap::new();
    for gap in gaps {
        by_document.entry(gap.document.as_path()).or_default().push(gap);
    }

    for (document, gaps) in by_document {
        println!(
            "  \x1b[33m⚠\x1b[0m {}: {} operations missing explicit security",
            document.display(),
            gaps.len()
        );
        for gap in gaps.iter().take(SHOWN) {
            println!("      -> {} {}", gap.method.to_uppercase(), gap.path);
        }
        if gaps.len() > SHOWN {
            println!("      ... and {} more", gaps.len() - SHOWN);
        }
    }
}

fn print_finding(finding: &Finding) {
    let reference = &finding.reference;
    let detail = match &finding.result {
        ResolutionResult::MissingFile { path } => format!("no document {}", path.display()),
        ResolutionResult::MissingFragment {
            category: Some(category),
            name,
        } => format!("no {} component \"{}\"", category, name),
        ResolutionResult::MissingFragment {
            category: None,
            name,
        } => format!("nothing at \"{}\"", name),
        ResolutionResult::MalformedFragment { reason } => reason.to_string(),
        _ => String::new(),
    };
    println!(
        "      {}#{}: {} - {}",
        reference.source_document.display(),
        reference.location,
        reference.raw,
        detail
    );
}

fn run_repair(root: &Path, dry_run: bool, components: Vec<(Category, PathBuf)>) -> Result<(), u8> {
    let tree = load(root, components)?;

    let mut changed_files = 0;
    let mut changed_refs = 0;
    // Documents that failed to load still fail the run, as in `check`.
    let mut worst: Option<u8> = None;
    for failure in &tree.failures {
        eprintln!(
            "Error: skipping {}: {}",
            failure.document.display(),
            failure.message
        );
        worst = worst.max(Some(failure.error.exit_code() as u8));
    }

    for document in tree.documents.iter() {
        let repaired = match repair_document(document) {
            Ok(repaired) => repaired,
            Err(e) => {
                eprintln!("Error: {}", e);
                worst = worst.max(Some(e.exit_code() as u8));
                continue;
            }
        };
        let Some(text) = &repaired.rewritten else {
            continue;
        };

        println!("--- {}", repaired.document.display());
        for change in &repaired.changes {
            match change.line {
                Some(line) => println!("{}:{}", repaired.document.display(), line),
                None => println!("{}#{}", repaired.document.display(), change.location),
            }
            println!("\x1b[31m- {}\x1b[0m", change.original);
            println!("\x1b[32m+ {}\x1b[0m", change.repaired);
        }
        changed_files += 1;
        changed_refs += repaired.changes.len();

        if dry_run {
            continue;
        }
        let Some(path) = &document.path else {
            continue;
        };
        match persist(path, text) {
            Ok(Some(backup)) => tracing::info!(backup = %backup.display(), "original kept"),
            Ok(None) => {}
            Err(e) => {
                eprintln!("Error: {}", e);
                worst = worst.max(Some(e.exit_code() as u8));
            }
        }
    }

    println!();
    if dry_run {
        println!(
            "Would repair {} references in {} files (dry run, nothing written)",
            changed_refs, changed_files
        );
    } else {
        println!(
            "Repaired {} references in {} files",
            changed_refs, changed_files
        );
    }

    match worst {
        Some(code) => Err(code),
        None => Ok(()),
    }
}
