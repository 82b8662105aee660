//! Lumos CLI - weave call-site metadata into compiled JVM classes

use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lumos_engine::{emit_runtime, Config, Engine, EngineError, PassReport, Survey, DEFAULT_CONFIG_FILE};

#[derive(Parser)]
#[command(name = "lumos", version)]
#[command(about = "Call-site metadata weaver for JVM class files", long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Weave a directory of class files
    Weave {
        /// Directory of compiled classes
        input: PathBuf,
        #[command(flatten)]
        options: PassOptions,
        /// Output directory (default: rewrite in place)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Also write the runtime classes
        #[arg(long)]
        emit_runtime: bool,
        /// Print the report as JSON on stdout
        #[arg(long)]
        json: bool,
    },
    /// List targets and call sites without writing anything
    Resolve {
        /// Directory of compiled classes
        input: PathBuf,
        #[command(flatten)]
        options: PassOptions,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write the metadata class and marker annotation
    EmitRuntime {
        /// Directory to write into
        #[arg(short, long)]
        output: PathBuf,
        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args)]
struct PassOptions {
    /// Configuration file (default: ./lumos.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Target descriptor, e.g. "com.example.Foo.bar(int)"; repeatable
    #[arg(short, long = "target")]
    targets: Vec<String>,
    /// Source root used to resolve absolute source paths; repeatable
    #[arg(long = "source-root")]
    source_roots: Vec<PathBuf>,
    /// Worker threads
    #[arg(long)]
    threads: Option<usize>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match cli.command {
        Commands::Weave {
            input,
            options,
            output,
            emit_runtime,
            json,
        } => cmd_weave(&input, &options, output, emit_runtime, json),
        Commands::Resolve { input, options, json } => cmd_resolve(&input, &options, json),
        Commands::EmitRuntime { output, config } => cmd_emit_runtime(&output, config.as_deref()),
    };
    process::exit(code);
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("lumos=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lumos=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Load the configuration file, if any
fn load_config(path: Option<&Path>) -> Result<Config, EngineError> {
    match path {
        Some(path) => Ok(Config::load(path)?),
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.is_file() {
                Ok(Config::load(default)?)
            } else {
                Ok(Config::default())
            }
        }
    }
}

fn pass_config(options: &PassOptions) -> Result<Config, EngineError> {
    let mut config = load_config(options.config.as_deref())?;
    config.add_targets(&options.targets)?;
    config.source_roots.extend(options.source_roots.iter().cloned());
    if options.threads.is_some() {
        config.threads = options.threads;
    }
    Ok(config)
}

fn fail(err: &EngineError) -> i32 {
    eprintln!("error[{}]: {}", err.code(), err);
    1
}

fn cmd_weave(input: &Path, options: &PassOptions, output: Option<PathBuf>, emit_runtime: bool, json: bool) -> i32 {
    let mut config = match pass_config(options) {
        Ok(config) => config,
        Err(e) => return fail(&e),
    };
    if output.is_some() {
        config.output = output;
    }
    config.emit_runtime |= emit_runtime;

    let report = match lumos_engine::run(config, input) {
        Ok(report) => report,
        Err(e) => return fail(&e),
    };
    print_diagnostics(&report);
    if json {
        match report.to_json() {
            Ok(text) => println!("{text}"),
            Err(e) => return fail(&EngineError::from(e)),
        }
    } else {
        println!("{}", report.summary());
    }
    if report.is_success() {
        0
    } else {
        1
    }
}

fn print_diagnostics(report: &PassReport) {
    for warning in &report.warnings {
        eprintln!("warning{warning}");
    }
    for error in &report.errors {
        eprintln!("error{error}");
    }
    for unit in report.failed() {
        eprintln!("{}: {}", unit.unit, unit.outcome);
    }
    if report.aborted {
        eprintln!("pass aborted; no files were written");
    }
}

fn cmd_resolve(input: &Path, options: &PassOptions, json: bool) -> i32 {
    let survey = match pass_config(options)
        .and_then(|config| Ok(Engine::new(config)?))
        .and_then(|engine| engine.survey(input))
    {
        Ok(survey) => survey,
        Err(e) => return fail(&e),
    };

    if json {
        match serde_json::to_string_pretty(&survey) {
            Ok(text) => println!("{text}"),
            Err(e) => return fail(&EngineError::from(e)),
        }
    } else {
        print_survey(&survey);
    }
    if survey.errors.is_empty() {
        0
    } else {
        1
    }
}

fn print_survey(survey: &Survey) {
    println!("Targets:");
    for target in &survey.targets {
        let woven = if target.already_woven { " (already woven)" } else { "" };
        println!(
            "  {} {}{} -> {}{}",
            target.name, target.method, target.descriptor, target.woven_descriptor, woven
        );
    }
    println!("Call sites:");
    for site in &survey.call_sites {
        let recursive = if site.recursive { " (recursive)" } else { "" };
        println!(
            "  {} {} pc={} line={} -> {}{}",
            site.unit, site.caller, site.pc, site.line, site.target, recursive
        );
    }
    for warning in &survey.warnings {
        eprintln!("warning{warning}");
    }
    for error in &survey.errors {
        eprintln!("error{error}");
    }
}

fn cmd_emit_runtime(output: &Path, config: Option<&Path>) -> i32 {
    let written = load_config(config).and_then(|config| {
        config.validate()?;
        emit_runtime(&config, output)
    });
    match written {
        Ok(paths) => {
            for path in paths {
                println!("{}", path.display());
            }
            0
        }
        Err(e) => fail(&e),
    }
}
