use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use mergeset_core::batch::{run_batch, tally};
use mergeset_core::config::Settings;
use mergeset_core::logging::{init_logging, log_file_path};
use std::path::{Path, PathBuf};
use token_merge::{ContextIndex, MergeBackend, Pipeline, ScorerKind};

#[derive(Parser)]
#[command(
    name = "mergeset",
    about = "Build token-level merge conflict datasets"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (JSON). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the dataset root
    #[arg(long, global = true)]
    input_dir: Option<PathBuf>,

    /// Override the output file
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// Override the merge backend
    #[arg(long, global = true, value_enum)]
    backend: Option<BackendArg>,

    /// Override the match scorer
    #[arg(long, global = true, value_enum)]
    scorer: Option<ScorerArg>,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every metadata file under the input directory
    Run,
    /// Merge three files at token level and print the result
    Merge {
        #[arg(long)]
        ours: PathBuf,
        #[arg(long)]
        base: PathBuf,
        #[arg(long)]
        theirs: PathBuf,
        /// Developer resolution to score the result against
        #[arg(long)]
        resolution: Option<PathBuf>,
    },
    /// Count conflicts and perfect matches per file in an output file
    Tally {
        output_file: PathBuf,
    },
    /// Print the effective settings as JSON
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Diff3,
    Git,
}

#[derive(Clone, Copy, ValueEnum)]
enum ScorerArg {
    EditDistance,
    Jaccard,
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(dir) = &cli.input_dir {
        settings.input_dir = dir.clone();
    }
    if let Some(out) = &cli.output {
        settings.output_file = out.clone();
    }
    if let Some(backend) = cli.backend {
        settings.pipeline.backend = match backend {
            BackendArg::Diff3 => MergeBackend::Diff3,
            BackendArg::Git => MergeBackend::git(),
        };
    }
    if let Some(scorer) = cli.scorer {
        settings.pipeline.scorer = match scorer {
            ScorerArg::EditDistance => ScorerKind::EditDistance,
            ScorerArg::Jaccard => ScorerKind::Jaccard,
        };
    }
    Ok(settings)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    match &cli.command {
        Commands::Run => cmd_run(&settings),
        Commands::Merge {
            ours,
            base,
            theirs,
            resolution,
        } => cmd_merge(&settings, ours, base, theirs, resolution.as_deref()),
        Commands::Tally { output_file } => cmd_tally(output_file),
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

fn cmd_run(settings: &Settings) -> anyhow::Result<()> {
    let _guard = init_logging(&settings.log_dir)?;
    tracing::info!(log = %log_file_path(&settings.log_dir).display(), "mergeset starting");

    let stats = run_batch(settings)?;

    println!();
    println!("Tuples:         {}", stats.line_all_count);
    println!("Merged:         {} ({} skipped)", stats.fit_merge, stats.unfit_merge);
    println!("Marker-free:    {}", stats.merge_succeed);
    println!("Perfect:        {} ({:.2}%)", stats.merge_correct, stats.correct_rate());
    println!("Files:          {} ok, {} failed", stats.files_processed, stats.files_failed);
    println!("Output:         {}", settings.output_file.display());
    Ok(())
}

fn read(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn cmd_merge(
    settings: &Settings,
    ours: &Path,
    base: &Path,
    theirs: &Path,
    resolution: Option<&Path>,
) -> anyhow::Result<()> {
    let pipeline = Pipeline::new(settings.pipeline.clone(), &settings.work_dir);
    let resolution_text = match resolution {
        Some(path) => Some(read(path)?),
        None => None,
    };
    let outcome = pipeline.process(
        &read(ours)?,
        &read(base)?,
        &read(theirs)?,
        resolution_text.as_deref().unwrap_or_default(),
        &ContextIndex::default(),
    )?;

    println!("{}", outcome.token_level_result);
    eprintln!(
        "conflicts: {}, marker-free: {}",
        outcome.key_information.len(),
        outcome.can_merge_succeed
    );
    if resolution_text.is_some() {
        eprintln!("match rate: {:.2}", outcome.match_rate);
    }
    Ok(())
}

fn cmd_tally(output_file: &Path) -> anyhow::Result<()> {
    let per_file = tally(output_file)?;
    let mut total_conflicts = 0;
    let mut total_perfect = 0;
    for (file, t) in &per_file {
        println!("{file}\t{}\t{}", t.conflicts, t.perfect);
        total_conflicts += t.conflicts;
        total_perfect += t.perfect;
    }
    println!("total\t{total_conflicts}\t{total_perfect}");
    Ok(())
}
