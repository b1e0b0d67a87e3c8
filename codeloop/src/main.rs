//! `codeloop`: plan, write and review code with a team of model agents.
//!
//! Configuration lives in `.codeloop/config.toml` (see `codeloop init`).
//! Each `run` leaves an audit trail under `.codeloop/runs/<run-id>/`.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};

use codeloop::agentic::{AgenticOptions, AgenticOrchestrator, AgenticStatus};
use codeloop::agents::AgentTeam;
use codeloop::core::approval::classify;
use codeloop::core::extract::extract_blocks;
use codeloop::core::types::TaskStatus;
use codeloop::exit_codes;
use codeloop::io::config::{AppConfig, DEFAULT_CONFIG_PATH, load_config, write_config};
use codeloop::io::knowledge::{DEFAULT_CODE_EXTENSIONS, JsonlKnowledgeStore};
use codeloop::io::run_log::{generate_run_id, write_run_log};
use codeloop::io::workspace::Workspace;
use codeloop::logging;
use codeloop::orchestrator::RefinementOrchestrator;
use codeloop::reasoner::{
    DEFAULT_BRANCHING_FACTOR, DEFAULT_REFLEXION_ROUNDS, DEFAULT_SAMPLES, HierarchicalReasoner,
};

#[derive(Parser)]
#[command(
    name = "codeloop",
    version,
    about = "Iterative plan/code/review refinement with model agents"
)]
struct Cli {
    /// Config file (TOML). Missing files mean defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default config file.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Plan, implement and review a task until approved or out of iterations.
    Run {
        task: String,
        /// Existing code to extend, passed to the planner and coder.
        #[arg(long)]
        existing: Option<PathBuf>,
        #[arg(long)]
        max_iterations: Option<u32>,
    },
    /// Print an implementation plan.
    Plan { task: String },
    /// Print code for a task in one shot, without review.
    Code { task: String },
    /// Review code from a file (`-` for stdin).
    Review {
        input: PathBuf,
        #[arg(long)]
        requirements: Option<String>,
        #[arg(long, value_enum, default_value_t = ReviewFocus::General)]
        focus: ReviewFocus,
    },
    /// Refactor code from a file (`-` for stdin) toward the given goals.
    Refactor {
        input: PathBuf,
        #[arg(long)]
        goals: String,
    },
    /// Add a feature to code from a file (`-` for stdin).
    Feature { input: PathBuf, feature: String },
    /// Assess a codebase summary (`-` for stdin) and suggest next steps.
    Analyze { input: PathBuf },
    /// Reason about a problem and print the answer.
    Reason {
        problem: String,
        #[arg(long, value_enum, default_value_t = Strategy::Hierarchical)]
        strategy: Strategy,
        /// Strategic approaches to consider (hierarchical).
        #[arg(long, default_value_t = DEFAULT_BRANCHING_FACTOR)]
        branching: usize,
        /// Independent answers to vote over (self-consistency).
        #[arg(long, default_value_t = DEFAULT_SAMPLES)]
        samples: usize,
        /// Maximum solutions to produce (reflexion).
        #[arg(long, default_value_t = DEFAULT_REFLEXION_ROUNDS)]
        rounds: usize,
    },
    /// Manage the knowledge store.
    #[command(subcommand)]
    Knowledge(KnowledgeCommand),
    /// Run the refinement loop with file writes and code execution.
    Agentic {
        task: String,
        /// Extra context for the planner.
        #[arg(long)]
        context: Option<String>,
        #[arg(long)]
        no_save: bool,
        #[arg(long)]
        no_execute: bool,
        /// Add a hierarchical reasoning pass before planning.
        #[arg(long)]
        hierarchical: bool,
        #[arg(long)]
        max_iterations: Option<u32>,
    },
    /// Print `approved` or `needs-changes` for a review document.
    Classify { input: PathBuf },
    /// Extract `## File:` style blocks from a document and write them.
    Extract {
        input: PathBuf,
        /// List the blocks without writing.
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum KnowledgeCommand {
    /// Add source files, or every code file under a directory.
    Add {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Extensions to index in directories (default: common source files).
        #[arg(long, value_delimiter = ',')]
        ext: Vec<String>,
    },
    /// Add a documentation file.
    Doc {
        input: PathBuf,
        #[arg(long)]
        source: Option<String>,
    },
    /// Print the number of stored documents.
    Count,
    /// Delete every stored document.
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReviewFocus {
    General,
    Security,
    Performance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Strategy {
    Hierarchical,
    ChainOfThought,
    SelfConsistency,
    Reflexion,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve working directory")?;
    let config = || load_config(&cli.config);
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Run {
            task,
            existing,
            max_iterations,
        } => cmd_run(config()?, &root, &task, existing.as_deref(), max_iterations),
        Command::Plan { task } => {
            let plan = RefinementOrchestrator::from_config(&config()?, &root)?.plan_only(&task)?;
            println!("{plan}");
            Ok(exit_codes::OK)
        }
        Command::Code { task } => {
            let code = RefinementOrchestrator::from_config(&config()?, &root)?.quick_code(&task)?;
            println!("{code}");
            Ok(exit_codes::OK)
        }
        Command::Review {
            input,
            requirements,
            focus,
        } => {
            let code = read_input(&input)?;
            let cfg = config()?;
            let review = match focus {
                ReviewFocus::General => RefinementOrchestrator::from_config(&cfg, &root)?
                    .review_only(&code, requirements.as_deref())?,
                ReviewFocus::Security => {
                    AgentTeam::from_config(&cfg)?.reviewer.security_review(&code)?
                }
                ReviewFocus::Performance => {
                    AgentTeam::from_config(&cfg)?.reviewer.performance_review(&code)?
                }
            };
            println!("{review}");
            Ok(exit_codes::OK)
        }
        Command::Refactor { input, goals } => {
            let code = read_input(&input)?;
            let refactored = AgentTeam::from_config(&config()?)?.coder.refactor(&code, &goals)?;
            println!("{refactored}");
            Ok(exit_codes::OK)
        }
        Command::Feature { input, feature } => {
            let code = read_input(&input)?;
            let updated = AgentTeam::from_config(&config()?)?.coder.add_feature(&code, &feature)?;
            println!("{updated}");
            Ok(exit_codes::OK)
        }
        Command::Analyze { input } => {
            let summary = read_input(&input)?;
            let analysis = AgentTeam::from_config(&config()?)?
                .planner
                .analyze_codebase(&summary)?;
            println!("{analysis}");
            Ok(exit_codes::OK)
        }
        Command::Reason {
            problem,
            strategy,
            branching,
            samples,
            rounds,
        } => {
            let mut reasoner = HierarchicalReasoner::from_config(&config()?)?;
            match strategy {
                Strategy::Hierarchical => {
                    cmd_reason(reasoner.with_branching_factor(branching), &problem)
                }
                Strategy::ChainOfThought => {
                    println!("{}", reasoner.chain_of_thought(&problem)?.trim_end());
                    Ok(exit_codes::OK)
                }
                Strategy::SelfConsistency => {
                    let consensus = reasoner.self_consistency(&problem, samples)?;
                    println!("{}", consensus.response.trim_end());
                    eprintln!(
                        "answer: {} ({}/{} samples agree)",
                        consensus.answer, consensus.votes, consensus.samples
                    );
                    Ok(exit_codes::OK)
                }
                Strategy::Reflexion => {
                    let outcome = reasoner.reflexion(&problem, rounds)?;
                    println!("{}", outcome.solution.trim_end());
                    eprintln!(
                        "{} critique(s), accepted: {}",
                        outcome.critiques.len(),
                        outcome.accepted
                    );
                    Ok(exit_codes::OK)
                }
            }
        }
        Command::Knowledge(command) => cmd_knowledge(&config()?, &root, command),
        Command::Agentic {
            task,
            context,
            no_save,
            no_execute,
            hierarchical,
            max_iterations,
        } => {
            let cfg = config()?;
            let options = AgenticOptions {
                auto_save: !no_save,
                auto_execute: !no_execute,
                hierarchical,
                max_iterations: max_iterations.unwrap_or(cfg.max_iterations),
            };
            cmd_agentic(&cfg, &root, &task, context.as_deref(), &options)
        }
        Command::Classify { input } => cmd_classify(&input),
        Command::Extract { input, dry_run } => cmd_extract(&config()?, &root, &input, dry_run),
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    write_config(config_path, &AppConfig::default())?;
    println!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(
    mut cfg: AppConfig,
    root: &Path,
    task: &str,
    existing: Option<&Path>,
    max_iterations: Option<u32>,
) -> Result<i32> {
    if let Some(max) = max_iterations {
        cfg.max_iterations = max;
        cfg.validate()?;
    }
    let existing_code = existing.map(read_input).transpose()?;

    let mut orchestrator = RefinementOrchestrator::from_config(&cfg, root)?;
    let result = orchestrator.run(task, existing_code.as_deref());

    if !result.code.is_empty() {
        println!("{}", result.code);
    }
    let run_id = generate_run_id();
    eprintln!(
        "run {run_id}: {} after {} iteration(s), approved: {}",
        result.status, result.iterations, result.approved
    );
    if let Some(failure) = &result.failure {
        eprintln!("{failure}");
    }
    match write_run_log(root, &run_id, &result) {
        Ok(log) => eprintln!("log: {}", log.dir.display()),
        Err(err) => eprintln!("could not write run log: {err:#}"),
    }

    Ok(match (result.status, result.approved) {
        (TaskStatus::Failed, _) => exit_codes::FAILED,
        (_, true) => exit_codes::OK,
        _ => exit_codes::NEEDS_CHANGES,
    })
}

fn cmd_reason(mut reasoner: HierarchicalReasoner, problem: &str) -> Result<i32> {
    let trace = reasoner.reason(problem)?;
    println!("{}", trace.final_answer.trim_end());
    println!("\n## Reasoning Path");
    for step in &trace.reasoning_path {
        println!("- {step}");
    }
    Ok(exit_codes::OK)
}

fn cmd_agentic(
    cfg: &AppConfig,
    root: &Path,
    task: &str,
    context: Option<&str>,
    options: &AgenticOptions,
) -> Result<i32> {
    let mut orchestrator = AgenticOrchestrator::from_config(cfg, root)?;
    let result = orchestrator.run(task, context, options);

    if !result.code.is_empty() {
        println!("{}", result.code);
    }
    eprintln!(
        "{}: {} file(s) created, {} fix round(s), approved: {}",
        result.status.as_str(),
        result.files_created.len(),
        result.iterations,
        result.approved
    );
    for failure in &result.write_failures {
        eprintln!("could not write {}: {}", failure.path, failure.error);
    }
    for error in &result.errors {
        eprintln!("execution error: {error}");
    }
    if let Some(failure) = &result.failure {
        eprintln!("{failure}");
    }

    Ok(match result.status {
        AgenticStatus::Failed | AgenticStatus::CompletedWithErrors => exit_codes::FAILED,
        _ if result.approved => exit_codes::OK,
        _ => exit_codes::NEEDS_CHANGES,
    })
}

fn cmd_classify(input: &Path) -> Result<i32> {
    let verdict = classify(&read_input(input)?);
    println!("{}", verdict.as_str());
    Ok(if verdict.is_approved() {
        exit_codes::OK
    } else {
        exit_codes::NEEDS_CHANGES
    })
}

fn cmd_extract(cfg: &AppConfig, root: &Path, input: &Path, dry_run: bool) -> Result<i32> {
    let blocks = extract_blocks(&read_input(input)?);
    if dry_run {
        for block in &blocks {
            println!("{} ({} bytes)", block.path, block.content.len());
        }
        return Ok(exit_codes::OK);
    }

    let workspace = Workspace::from_config(&cfg.workspace, root)?;
    let report = workspace.persist_blocks(&blocks);
    for path in &report.written {
        println!("{path}");
    }
    for failure in &report.failures {
        eprintln!("could not write {}: {}", failure.path, failure.error);
    }
    Ok(if report.is_clean() {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn cmd_knowledge(cfg: &AppConfig, root: &Path, command: KnowledgeCommand) -> Result<i32> {
    let store = JsonlKnowledgeStore::from_config(&cfg.knowledge, root);
    match command {
        KnowledgeCommand::Add { paths, ext } => {
            let extensions: Vec<&str> = if ext.is_empty() {
                DEFAULT_CODE_EXTENSIONS.to_vec()
            } else {
                ext.iter().map(String::as_str).collect()
            };
            let mut added = 0usize;
            for path in &paths {
                if path.is_dir() {
                    added += store.add_directory(path, &extensions)?.len();
                } else {
                    store.add_code_file(path)?;
                    added += 1;
                }
            }
            println!("added {added} file(s) to {}", store.path().display());
        }
        KnowledgeCommand::Doc { input, source } => {
            let text = read_input(&input)?;
            let source = source.unwrap_or_else(|| input.display().to_string());
            store.add_documentation(&text, Some(&source))?;
            println!("added {source} to {}", store.path().display());
        }
        KnowledgeCommand::Count => println!("{}", store.count()?),
        KnowledgeCommand::Clear => {
            store.clear()?;
            println!("cleared {}", store.path().display());
        }
    }
    Ok(exit_codes::OK)
}

/// File contents, or stdin when `path` is `-`.
fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read stdin")?;
        return Ok(buf);
    }
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}
