// Command-line entry point for lift-causal.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use lift_causal::api::dto::{GraphDto, PathsDto};
use lift_causal::api::server::{start_server, ServerState};
use lift_causal::application::{AnalyzeUsecase, FitUsecase};
use lift_causal::config::LiftConfig;
use lift_causal::domain::builder::GraphBuilder;
use lift_causal::domain::element::SourceFile;
use lift_causal::domain::fitter::MechanismFitter;
use lift_causal::domain::graph::CausalGraph;
use lift_causal::domain::intervention::{InterventionSpec, SimulationEngine};
use lift_causal::domain::paths::{self, DEFAULT_MAX_PATHS};
use lift_causal::domain::record::{self, ModelRecord};
use lift_causal::domain::scm::StructuralCausalModel;
use lift_causal::domain::store::{DiskModelStore, ModelStore};
use lift_causal::domain::trace::TraceTable;
use lift_causal::domain::value::Value;
use lift_causal::errors::FitError;
use lift_causal::infrastructure::concurrency::init_thread_pool;
use lift_causal::infrastructure::{ProjectLoader, SynElementExtractor};
use lift_causal::logging::init_tracing;
use lift_causal::ports::dot_exporter::DotExporter;
use lift_causal::ports::GraphExporter;

/// Exit code for a model that fitted but scored below the validation threshold.
const EXIT_LOW_SCORE: u8 = 2;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding lift-causal.toml
    #[arg(long, global = true, default_value = ".")]
    config_dir: PathBuf,

    /// Worker threads (default: half the cores)
    #[arg(long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract a causal graph from Rust sources
    Extract {
        #[command(flatten)]
        sources: SourceArgs,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value_t = GraphFormat::Json)]
        format: GraphFormat,
    },

    /// Fit a structural causal model over a graph
    Fit {
        /// Graph JSON written by `extract`
        #[arg(short, long)]
        graph: PathBuf,

        /// Trace table: a JSON array of {node: value} rows
        #[arg(short, long)]
        traces: Option<PathBuf>,

        /// Ignore traces and derive mechanisms from graph structure only
        #[arg(long)]
        static_only: bool,

        /// Keep a model scoring below the validation threshold
        #[arg(long)]
        accept_low_score: bool,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also persist the model under this name in a sled store
        #[arg(long, requires = "name")]
        store: Option<PathBuf>,

        #[arg(long)]
        name: Option<String>,
    },

    /// Estimate the effect of an intervention
    Impact {
        /// Model JSON written by `fit`
        #[arg(short, long)]
        model: PathBuf,

        /// Intervention assignment, `node=value` (repeatable)
        #[arg(short = 's', long = "set", value_parser = parse_assignment, required = true)]
        set: Vec<(String, Value)>,

        /// Monte Carlo draws (default from config)
        #[arg(short = 'n', long)]
        samples: Option<usize>,
    },

    /// List causal paths between two nodes
    Paths {
        #[command(flatten)]
        input: GraphInput,

        #[arg(long)]
        source: String,

        #[arg(long)]
        target: String,

        #[arg(long, default_value_t = DEFAULT_MAX_PATHS)]
        max_paths: usize,
    },

    /// List the root causes of a node
    Roots {
        #[command(flatten)]
        input: GraphInput,

        #[arg(long)]
        node: String,
    },

    /// Render a graph as Graphviz DOT
    Export {
        #[command(flatten)]
        input: GraphInput,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Serve models over line-delimited JSON on TCP
    Serve {
        #[arg(short, long, default_value_t = 7878)]
        port: u16,

        /// sled store backing LOAD_MODEL
        #[arg(long)]
        store: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug)]
struct SourceArgs {
    /// Input source file path (can specify multiple)
    #[arg(short, long)]
    input: Vec<PathBuf>,

    /// Input source folder(s)
    #[arg(short = 'd', long)]
    folder: Vec<PathBuf>,

    /// Workspace Cargo.toml
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Fail on unparsable files instead of skipping them
    #[arg(long)]
    strict: bool,
}

#[derive(clap::Args, Debug)]
#[group(required = true, multiple = false)]
struct GraphInput {
    /// Graph JSON written by `extract`
    #[arg(short, long)]
    graph: Option<PathBuf>,

    /// Model JSON written by `fit`
    #[arg(short, long)]
    model: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum GraphFormat {
    Json,
    Dot,
}

fn parse_assignment(s: &str) -> Result<(String, Value), String> {
    let (node, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected node=value, got {:?}", s))?;
    let node = node.trim();
    if node.is_empty() {
        return Err(format!("missing node name in {:?}", s));
    }
    let value = value
        .parse::<Value>()
        .map_err(|e| format!("invalid value in {:?}: {}", s, e))?;
    Ok((node.to_string(), value))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn write_output(output: Option<&Path>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, content).with_context(|| format!("Cannot write {}", path.display()))?;
            tracing::info!(path = %path.display(), "output written");
        }
        None => println!("{}", content),
    }
    Ok(())
}

fn load_graph(path: &Path) -> Result<CausalGraph> {
    let dto: GraphDto = read_json(path)?;
    CausalGraph::try_from(dto).with_context(|| format!("Invalid graph in {}", path.display()))
}

fn load_model(path: &Path) -> Result<StructuralCausalModel> {
    let record: ModelRecord = read_json(path)?;
    record::deserialize(&record).with_context(|| format!("Invalid model in {}", path.display()))
}

impl GraphInput {
    fn load(&self) -> Result<CausalGraph> {
        match (&self.graph, &self.model) {
            (Some(path), _) => load_graph(path),
            (None, Some(path)) => Ok(load_model(path)?.graph().clone()),
            (None, None) => anyhow::bail!("Provide --graph or --model"),
        }
    }
}

fn collect_sources(args: &SourceArgs) -> Result<Vec<SourceFile>> {
    let mut all_sources = Vec::new();
    for input_file in &args.input {
        all_sources.extend(ProjectLoader::load_path(input_file, "input")?);
    }
    for folder in &args.folder {
        all_sources.extend(ProjectLoader::load_path(folder, "input")?);
    }
    if let Some(manifest) = &args.workspace {
        all_sources.extend(ProjectLoader::load_workspace(manifest)?);
    }
    if all_sources.is_empty() {
        anyhow::bail!("Please provide at least one --input <file>, --folder <dir> or --workspace <Cargo.toml>");
    }
    Ok(all_sources)
}

fn run(cli: Cli) -> Result<()> {
    let config = LiftConfig::load(&cli.config_dir).context("Failed to load configuration")?;
    if let Err(e) = init_thread_pool(cli.threads) {
        tracing::debug!(error = %e, "thread pool already initialized");
    }

    match cli.command {
        Command::Extract {
            sources,
            output,
            format,
        } => {
            let files = collect_sources(&sources)?;
            let extractor = if sources.strict {
                SynElementExtractor::strict()
            } else {
                SynElementExtractor::new()
            };
            let builder = GraphBuilder::with_classifier(config.builder.classifier());
            let usecase = AnalyzeUsecase {
                extractor: &extractor,
                builder: &builder,
                exporter: &DotExporter,
            };
            let (graph, report) = usecase.build_graph(&files)?;
            if !report.pruned_sinks.is_empty() {
                tracing::info!(pruned = ?report.pruned_sinks, "pruned side-effect sinks");
            }
            let rendered = match format {
                GraphFormat::Json => serde_json::to_string_pretty(&GraphDto::from(&graph))?,
                GraphFormat::Dot => DotExporter.render(&graph),
            };
            write_output(output.as_deref(), &rendered)
        }

        Command::Fit {
            graph,
            traces,
            static_only,
            accept_low_score,
            output,
            store,
            name,
        } => {
            let graph = load_graph(&graph)?;
            let traces: Option<TraceTable> = traces.as_deref().map(read_json::<TraceTable>).transpose()?;
            let fitter = MechanismFitter::new(config.fitting.clone());
            let model = FitUsecase {
                fitter: &fitter,
                accept_low_score,
            }
            .run(graph, traces.as_ref(), static_only)?;

            let record = record::serialize(&model);
            if let (Some(dir), Some(name)) = (store, name) {
                let store = DiskModelStore::open(&dir)
                    .with_context(|| format!("Cannot open store {}", dir.display()))?;
                store.put(&name, &record)?;
                store.flush()?;
                tracing::info!(%name, store = %dir.display(), "model stored");
            }
            write_output(output.as_deref(), &record.to_json()?)
        }

        Command::Impact {
            model,
            set,
            samples,
        } => {
            let scm = load_model(&model)?;
            let intervention: InterventionSpec = set.into_iter().collect::<BTreeMap<_, _>>();
            let engine = SimulationEngine::new(config.simulation.clone());
            let num_samples = samples.unwrap_or_else(|| engine.config().effective_num_samples());
            let estimate = engine.estimate_impact(&scm, &intervention, num_samples)?;
            write_output(None, &serde_json::to_string_pretty(&estimate)?)
        }

        Command::Paths {
            input,
            source,
            target,
            max_paths,
        } => {
            let graph = input.load()?;
            let found = paths::causal_paths(&graph, &source, &target, max_paths)?;
            let dto = PathsDto {
                source,
                target,
                paths: found,
            };
            write_output(None, &serde_json::to_string_pretty(&dto)?)
        }

        Command::Roots { input, node } => {
            let graph = input.load()?;
            let roots = paths::root_causes(&graph, &node)?;
            write_output(None, &serde_json::to_string_pretty(&roots)?)
        }

        Command::Export { input, output } => {
            let graph = input.load()?;
            DotExporter
                .export(&graph, &output)
                .with_context(|| format!("Cannot write {}", output.display()))?;
            tracing::info!(path = %output.display(), "graph exported");
            Ok(())
        }

        Command::Serve { port, store } => {
            let mut state = ServerState::new(config.simulation.clone());
            if let Some(dir) = store {
                let store: Arc<dyn ModelStore> = Arc::new(
                    DiskModelStore::open(&dir)
                        .with_context(|| format!("Cannot open store {}", dir.display()))?,
                );
                state = state.with_store(store);
            }
            start_server(port, state)
        }
    }
}

fn main() -> ExitCode {
    init_tracing();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            match e.downcast_ref::<FitError>() {
                Some(FitError::Validation(_)) => ExitCode::from(EXIT_LOW_SCORE),
                _ => ExitCode::FAILURE,
            }
        }
    }
}
