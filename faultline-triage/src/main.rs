use clap::{Parser, Subcommand};
use faultline_core::models::JobRef;
use faultline_core::{Assignment, FaultlineConfig, FileStore, MatchDecision};
use faultline_ingest::AzureDevOpsClient;
use tracing_subscriber::{fmt, EnvFilter};

use faultline_triage::subsystems::{categorize, embedder, fetch, localize};

#[derive(Debug, Parser)]
#[command(author, version, about = "Localize CI build failures and group them by similarity")]
struct Cli {
    #[arg(short, long, default_value = "faultline.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download recent failed builds, their timelines and failing-job logs
    Fetch {
        /// Number of failed builds to mirror (defaults to `azure.max_builds`)
        #[arg(long)]
        max_builds: Option<u32>,
    },

    /// Print the root-cause failed jobs of a stored build
    Localize {
        #[arg(long)]
        build: u64,
    },

    /// Embed localized failures of one or all stored builds
    Embed {
        #[arg(long)]
        build: Option<u64>,

        /// Re-embed jobs that already have a stored embedding
        #[arg(long)]
        force: bool,
    },

    /// Score a failed job against all clusters and optionally assign it
    Categorize {
        #[arg(long)]
        build: u64,

        #[arg(long)]
        job: String,

        /// Add the job to an existing cluster
        #[arg(long, conflicts_with = "new")]
        assign: Option<String>,

        /// Start a new cluster with the job as its first reference
        #[arg(long)]
        new: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// List clusters with reference-job counts and cohesion
    Clusters {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (tokens for local runs)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = match FaultlineConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", cli.config, e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level. Logs go to stderr so stdout
    // stays machine-readable.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let store = FileStore::new(config.service.store_path());
    let concurrency = config.clustering.concurrency;

    match cli.command {
        Commands::Fetch { max_builds } => {
            let client = AzureDevOpsClient::new(&config.azure)?;
            let max_builds = max_builds.unwrap_or(config.azure.max_builds);
            let summary =
                fetch::fetch_failed_builds(&client, &store, max_builds, concurrency).await?;
            println!(
                "Fetched {} build(s): {} new timeline(s), {} failed job(s), {} new log(s)",
                summary.builds, summary.timelines, summary.failed_jobs, summary.logs
            );
        }

        Commands::Localize { build } => {
            let failures = localize::localize_build(&store, build).await?;
            print!("{}", localize::render_failures(build, &failures));
        }

        Commands::Embed { build, force } => {
            let backend = embedder::create_backend_from_config(&config)?;
            let builds = match build {
                Some(id) => vec![id],
                None => store.list_builds().await?,
            };
            let summary =
                embedder::embed_builds(&store, &backend, builds, force, concurrency).await?;
            println!(
                "Embedded {} job(s), skipped {} already embedded ({} cache hit(s))",
                summary.embedded,
                summary.skipped,
                backend.hits()
            );
        }

        Commands::Categorize {
            build,
            job,
            assign,
            new,
            json,
        } => {
            let assignment = match (assign, new) {
                (Some(name), _) => Some(Assignment::Existing(name)),
                (None, Some(name)) => Some(Assignment::New(name)),
                (None, None) => None,
            };
            let job = JobRef { build_id: build, job_id: job };
            let outcome =
                categorize::categorize_job(&store, &job, assignment, &config.clustering).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_outcome(&outcome, config.clustering.threshold);
            }
        }

        Commands::Clusters { json } => {
            let summaries = categorize::cluster_summaries(&store, concurrency).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else if summaries.is_empty() {
                println!("No clusters yet");
            } else {
                for s in &summaries {
                    println!(
                        "{:<32} {:>4} job(s)  cohesion {:.3}",
                        s.name, s.reference_jobs, s.self_similarity
                    );
                }
            }
        }
    }

    Ok(())
}

fn print_outcome(outcome: &categorize::CategorizeOutcome, threshold: f64) {
    println!("Candidate {}", outcome.candidate);
    for m in &outcome.ranking {
        println!(
            "  {:<32} combined {:.3}  issues {:.3}  log {:.3}",
            m.name, m.similarity.combined, m.similarity.issues_similarity, m.similarity.log_similarity
        );
    }

    match &outcome.decision {
        MatchDecision::NoClustersYet => {
            println!("No clusters yet: start one with --new <name>");
        }
        MatchDecision::BelowThreshold { best } => println!(
            "Best match {} ({:.3}) is below {:.2}: --assign an existing cluster or --new <name>",
            best.name, best.similarity.combined, threshold
        ),
        MatchDecision::AboveThreshold { best } => println!(
            "Matches {} ({:.3}); confirm with --assign {}",
            best.name, best.similarity.combined, best.name
        ),
    }

    if let Some(name) = &outcome.assigned {
        println!("Assigned to {name}");
    }
}
