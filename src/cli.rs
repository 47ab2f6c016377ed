use std::fmt::Display;
use std::io::Write;
use std::path::PathBuf;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use clap::builder::styling::{AnsiColor, Color, Style, Styles};
use clap::{ArgAction, Args, ColorChoice, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::aot::{Generator, Shell, generate};
use clap_complete_nushell::Nushell;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use tracing::{info, warn};

use crate::cluster::assigner::AssignerConfig;
use crate::{AppResult, cluster, dedup, enrich, io_utils, report, store, whatsapp};

const STYLES: Styles = Styles::styled()
    .header(Style::new().bold())
    .usage(Style::new().bold())
    .error(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Red))))
    .literal(
        Style::new()
            .bold()
            .fg_color(Some(Color::Ansi(AnsiColor::Green))),
    )
    .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Yellow))))
    .valid(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan))))
    .invalid(Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightRed))))
    .context(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Magenta))))
    .context_value(
        Style::new()
            .bold()
            .fg_color(Some(Color::Ansi(AnsiColor::Cyan))),
    );

/// Long-form CLI description shown in `--help`.
const LONG_ABOUT: &str = "Dichoteca - A corpus of Costa Rican dichos

This tool manages a small SQLite corpus of Costa Rican proverbs:
- parses WhatsApp chat exports into candidate dichos
- imports externally-enriched dichos (translation, context, difficulty)
- assigns each dicho to up to three semantic clusters using sentence
  embeddings and similarity thresholds
- answers search and reporting queries over the corpus

Embeddings come from an OpenAI-compatible server (like \x1b]8;;https://lmstudio.ai/\x1b\\\x1b[4;36mLM Studio\x1b[24;39m\x1b]8;;\x1b\\),
or from a local sentence encoder when built with the local-ml feature.";

/// Default embedding model; the corpus was clustered with 384-dim vectors.
static DEFAULT_EMBED_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Dichoteca - Manage and cluster a corpus of Costa Rican dichos.
#[derive(Parser, Debug, Clone)]
#[command(author, version, propagate_version = true, about, long_about = Some(LONG_ABOUT), styles = STYLES)]
pub struct Cli {
    /// Color choice for the output
    #[arg(long, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    /// Subcommand to run
    #[command(subcommand)]
    pub cmd: Cmd,
}

static INGEST_CMD_ABOUT: &str = "Parse a WhatsApp chat export into candidate dichos
Filters messages against the newest stored contribution timestamp,
detects near-duplicates of stored dichos, and writes the unique
candidates as a TSV for the external LLM enrichment step.";

static IMPORT_CMD_ABOUT: &str = "Import an enrichment TSV and assign clusters
The TSV is produced manually with an LLM from the candidates file.
Malformed rows are skipped and reported; the rest are inserted and the
corpus is reassigned to clusters.";

/// Top-level commands supported by the CLI.
#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    #[command(about = "Parse a WhatsApp export into candidate dichos", long_about = INGEST_CMD_ABOUT)]
    Ingest {
        /// WhatsApp chat export file
        input: PathBuf,

        /// Output TSV path for the enrichment step
        #[arg(short, long, default_value = "candidate_dichos.tsv")]
        output: PathBuf,

        /// Process the whole export instead of only messages newer than the
        /// stored cutoff
        #[arg(long, default_value_t = false, action = ArgAction::SetTrue)]
        all: bool,

        #[command(flatten)]
        db: DbArgs,
        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },

    #[command(about = "Import enriched dichos and assign clusters", long_about = IMPORT_CMD_ABOUT)]
    Import {
        /// Enrichment TSV file
        input: PathBuf,

        #[command(flatten)]
        db: DbArgs,
        #[command(flatten)]
        embed: EmbedArgs,
        #[command(flatten)]
        thresholds: ThresholdArgs,
        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },

    /// Recompute cluster assignments for the corpus
    ///
    /// Re-running over an unchanged corpus and unchanged cluster keywords
    /// reproduces the stored assignments exactly
    Assign {
        /// Reassign only this dicho id
        #[arg(long)]
        dicho: Option<i64>,

        #[command(flatten)]
        db: DbArgs,
        #[command(flatten)]
        embed: EmbedArgs,
        #[command(flatten)]
        thresholds: ThresholdArgs,
        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },

    /// Manage semantic cluster definitions
    Clusters {
        #[command(subcommand)]
        cmd: ClustersCmd,
    },

    /// Search dichos by text
    Search {
        /// Search term
        query: String,

        /// Which columns to search
        #[arg(short = 'L', long, value_enum, default_value_t = LanguageArg::Both)]
        language: LanguageArg,

        /// Maximum results to return
        #[arg(short, long, default_value_t = 20)]
        limit: u32,

        /// Also write the results to a JSON file
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        db: DbArgs,
        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },

    /// Show one dicho with its cluster assignments
    Show {
        /// Dicho id
        dicho: i64,

        #[command(flatten)]
        db: DbArgs,
        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },

    /// Read-only reports over the corpus
    Report {
        #[command(subcommand)]
        cmd: ReportCmd,
    },

    /// Generate shell completion for a given shell
    Completion {
        /// Output file to write the completion script to
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// The shell to generate the completion for
        #[arg(value_enum)]
        shell: CompletionShell,

        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },
}

/// Subcommands for managing cluster definitions.
#[derive(Subcommand, Debug, Clone)]
pub enum ClustersCmd {
    /// Load (or update) cluster definitions from a JSON file
    Load {
        /// JSON file with an array of cluster definitions
        input: PathBuf,

        #[command(flatten)]
        db: DbArgs,
        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },

    /// List all cluster definitions
    List {
        #[command(flatten)]
        db: DbArgs,
        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },

    /// Show the dichos assigned to one cluster
    Members {
        /// Cluster id
        cluster: i64,

        #[command(flatten)]
        db: DbArgs,
        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },

    /// Extend a cluster's representative keyword set
    ///
    /// Run `assign` afterwards so the new keywords take effect
    Extend {
        /// Cluster id
        cluster: i64,

        /// Keywords to add
        #[arg(required = true)]
        keywords: Vec<String>,

        #[command(flatten)]
        db: DbArgs,
        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },
}

/// Read-only reporting subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum ReportCmd {
    /// Similarity score statistics per assignment rank
    Ranks {
        #[command(flatten)]
        db: DbArgs,
        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },

    /// Pairs of clusters sharing dichos
    Overlap {
        #[command(flatten)]
        db: DbArgs,
        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },

    /// Dicho counts per difficulty level
    Difficulty {
        #[command(flatten)]
        db: DbArgs,
        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },
}

/// Supported completion targets for shell auto-completion.
#[derive(ValueEnum, Clone, Debug)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
    Nushell,
}

impl Display for CompletionShell {
    /// Render the canonical shell name string.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompletionShell::Bash => "bash",
            CompletionShell::Zsh => "zsh",
            CompletionShell::Fish => "fish",
            CompletionShell::PowerShell => "powershell",
            CompletionShell::Elvish => "elvish",
            CompletionShell::Nushell => "nushell",
        };
        write!(f, "{}", s)
    }
}

impl Generator for &CompletionShell {
    fn generate(&self, cmd: &clap::builder::Command, buf: &mut dyn Write) {
        match self {
            CompletionShell::Bash => Shell::Bash.generate(cmd, buf),
            CompletionShell::Zsh => Shell::Zsh.generate(cmd, buf),
            CompletionShell::Fish => Shell::Fish.generate(cmd, buf),
            CompletionShell::PowerShell => Shell::PowerShell.generate(cmd, buf),
            CompletionShell::Elvish => Shell::Elvish.generate(cmd, buf),
            CompletionShell::Nushell => Nushell.generate(cmd, buf),
        }
    }

    fn file_name(&self, name: &str) -> String {
        match self {
            CompletionShell::Bash => Shell::Bash.file_name(name),
            CompletionShell::Zsh => Shell::Zsh.file_name(name),
            CompletionShell::Fish => Shell::Fish.file_name(name),
            CompletionShell::PowerShell => Shell::PowerShell.file_name(name),
            CompletionShell::Elvish => Shell::Elvish.file_name(name),
            CompletionShell::Nushell => Nushell.file_name(name),
        }
    }
}

/// Which columns a search runs over.
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum LanguageArg {
    /// Search the Spanish source text and usage context
    Spanish,
    /// Search the English translation
    English,
    /// Search everything
    Both,
}

impl From<LanguageArg> for store::SearchLanguage {
    fn from(arg: LanguageArg) -> Self {
        match arg {
            LanguageArg::Spanish => store::SearchLanguage::Spanish,
            LanguageArg::English => store::SearchLanguage::English,
            LanguageArg::Both => store::SearchLanguage::Both,
        }
    }
}

/// Database location options shared across commands.
#[derive(Args, Debug, Clone)]
pub struct DbArgs {
    /// Path to the corpus database
    ///
    /// Defaults to ./dichoteca.db if present, then $DICHOTECA_DB_PATH,
    /// then the per-user data directory
    #[arg(long = "db")]
    pub db_path: Option<PathBuf>,
}

/// Embedding server options shared by commands that embed text.
#[derive(Args, Debug, Clone)]
pub struct EmbedArgs {
    /// Whether to use a secure connection (HTTPS) to the embedding server
    /// Defaults to false for local servers (i.e. `localhost` and private subnets)
    /// Defaults to true for public IP addresses and hostnames
    /// Note: This is not a flag. You must provide a value (true or false) if you use this option.
    #[arg(long)]
    pub secure: Option<bool>,

    /// Host for the embedding server
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Port for the embedding server
    #[arg(long, default_value_t = 1234)]
    pub port: u16,

    /// OpenAI API version for the embedding server
    ///
    /// Defaults to "v1" (the standard OpenAI API version)
    #[arg(long, default_value = "v1")]
    pub api_version: String,

    /// Embedding model name
    #[arg(short, long, default_value = DEFAULT_EMBED_MODEL)]
    pub model: String,
}

fn is_local_host(host: &str) -> bool {
    host == "localhost"
        || host.ends_with(".local")
        || host.ends_with(".internal")
        || host.ends_with(".lan")
        || host.ends_with(".home.arpa")
        || host.ends_with(".test")
        || host
            .parse::<std::net::Ipv4Addr>()
            .is_ok_and(|ip| ip.is_loopback() || ip.is_private() || ip.is_link_local())
        || host.parse::<std::net::Ipv6Addr>().is_ok_and(|ip| {
            ip.is_loopback() || ip.is_unique_local() || ip.is_unicast_link_local()
        })
}

impl EmbedArgs {
    pub fn get_client(&self) -> Client<OpenAIConfig> {
        let schema = match self.secure {
            Some(true) => "https",
            Some(false) => "http",
            None if is_local_host(&self.host) => "http",
            None => "https",
        };
        let config = OpenAIConfig::default().with_api_base(format!(
            "{schema}://{}:{}/{}",
            self.host, self.port, self.api_version
        ));

        Client::with_config(config)
    }
}

/// Assignment threshold options; see `assign --help`.
#[derive(Args, Debug, Clone)]
pub struct ThresholdArgs {
    /// Rank-2 gap threshold, as a fraction of the rank-1 score
    #[arg(long, default_value_t = 0.10)]
    pub gap_threshold: f64,

    /// Minimum absolute similarity for a rank-2 assignment
    #[arg(long, default_value_t = 0.35)]
    pub rank2_threshold: f64,

    /// Minimum absolute similarity for a rank-3 assignment
    #[arg(long, default_value_t = 0.30)]
    pub rank3_threshold: f64,

    /// Maximum cluster assignments per dicho
    #[arg(long, default_value_t = 3)]
    pub max_ranks: usize,
}

impl From<&ThresholdArgs> for AssignerConfig {
    fn from(args: &ThresholdArgs) -> Self {
        AssignerConfig {
            gap_threshold_fraction: args.gap_threshold,
            rank2_absolute_threshold: args.rank2_threshold,
            rank3_absolute_threshold: args.rank3_threshold,
            max_ranks: args.max_ranks,
        }
    }
}

/// Helper trait for accessing verbosity flags on commands.
pub trait GetVerbosity {
    fn get_verbosity(&self) -> &Verbosity<InfoLevel>;
}

impl GetVerbosity for Cmd {
    fn get_verbosity(&self) -> &Verbosity<InfoLevel> {
        match self {
            Cmd::Ingest { verbosity, .. } => verbosity,
            Cmd::Import { verbosity, .. } => verbosity,
            Cmd::Assign { verbosity, .. } => verbosity,
            Cmd::Clusters { cmd } => cmd.get_verbosity(),
            Cmd::Search { verbosity, .. } => verbosity,
            Cmd::Show { verbosity, .. } => verbosity,
            Cmd::Report { cmd } => cmd.get_verbosity(),
            Cmd::Completion { verbosity, .. } => verbosity,
        }
    }
}

impl GetVerbosity for ClustersCmd {
    fn get_verbosity(&self) -> &Verbosity<InfoLevel> {
        match self {
            ClustersCmd::Load { verbosity, .. } => verbosity,
            ClustersCmd::List { verbosity, .. } => verbosity,
            ClustersCmd::Members { verbosity, .. } => verbosity,
            ClustersCmd::Extend { verbosity, .. } => verbosity,
        }
    }
}

impl GetVerbosity for ReportCmd {
    fn get_verbosity(&self) -> &Verbosity<InfoLevel> {
        match self {
            ReportCmd::Ranks { verbosity, .. } => verbosity,
            ReportCmd::Overlap { verbosity, .. } => verbosity,
            ReportCmd::Difficulty { verbosity, .. } => verbosity,
        }
    }
}

/// Build an embedder per the build features and run an assignment pass.
async fn run_assignment(
    pool: &sqlx::SqlitePool,
    embed: &EmbedArgs,
    thresholds: &ThresholdArgs,
    only_dicho: Option<i64>,
) -> AppResult<cluster::AssignReport> {
    let config = AssignerConfig::from(thresholds);

    #[cfg(feature = "local-ml")]
    {
        let embedder = cluster::bert::BertEmbedder::new_from_pretrained(&embed.model).await?;
        cluster::assign_corpus(&embedder, pool, &config, only_dicho).await
    }

    #[cfg(not(feature = "local-ml"))]
    {
        let client = embed.get_client();
        let embedder = cluster::openai::OAIEmbedder::new(&client, embed.model.clone());
        cluster::assign_corpus(&embedder, pool, &config, only_dicho).await
    }
}

impl Cmd {
    /// Execute the chosen top-level command.
    #[tracing::instrument(name = "Running command", level = "info", skip(self))]
    pub async fn run(&self) -> AppResult<()> {
        match self {
            Cmd::Ingest {
                input,
                output,
                all,
                db,
                ..
            } => {
                let pool = store::connect(db.db_path.clone()).await?;
                let messages = whatsapp::parse_export(input).await?;
                let cutoff = if *all {
                    None
                } else {
                    store::max_date_time(&pool).await?
                };
                let fresh = whatsapp::filter_after(messages, cutoff);
                if fresh.is_empty() {
                    info!("No new messages since the stored cutoff");
                    return Ok(());
                }
                let candidates = dedup::extract_candidates(&fresh);
                let existing = store::existing_dicho_texts(&pool).await?;
                let (unique, duplicates) = dedup::split_unique(candidates, &existing);
                report::print_ingest_summary(&unique, &duplicates);
                if unique.is_empty() {
                    info!("No new unique dichos found");
                    return Ok(());
                }
                io_utils::write_candidates_tsv(output, &unique).await?;
                info!(
                    "Wrote {} candidate(s) to {} for external enrichment",
                    unique.len(),
                    output.display()
                );
                Ok(())
            }
            Cmd::Import {
                input,
                db,
                embed,
                thresholds,
                ..
            } => {
                let pool = store::connect(db.db_path.clone()).await?;
                let batch = enrich::read_enriched(input).await?;
                let mut inserted = 0usize;
                for row in &batch.rows {
                    match store::insert_dicho(&pool, row).await {
                        Ok(id) => {
                            inserted += 1;
                            info!("Inserted dicho {}: {}", id, row.dicho);
                        }
                        Err(e) => warn!("Skipping '{}': {}", row.dicho, e),
                    }
                }
                info!(
                    "Imported {} dicho(s), {} row(s) skipped",
                    inserted,
                    batch.skipped.len()
                );
                if inserted > 0 {
                    let summary = run_assignment(&pool, embed, thresholds, None).await?;
                    report::print_assign_report(&summary);
                }
                Ok(())
            }
            Cmd::Assign {
                dicho,
                db,
                embed,
                thresholds,
                ..
            } => {
                let pool = store::connect(db.db_path.clone()).await?;
                let summary = run_assignment(&pool, embed, thresholds, *dicho).await?;
                report::print_assign_report(&summary);
                Ok(())
            }
            Cmd::Clusters { cmd } => cmd.run().await,
            Cmd::Search {
                query,
                language,
                limit,
                output,
                db,
                ..
            } => {
                let pool = store::connect(db.db_path.clone()).await?;
                let hits = store::search_dichos(&pool, query, (*language).into(), *limit).await?;
                report::print_search_hits(&hits);
                if let Some(output_path) = output {
                    io_utils::write_json_output(output_path, &hits).await?;
                    info!("Wrote {} result(s) to {}", hits.len(), output_path.display());
                }
                Ok(())
            }
            Cmd::Show { dicho, db, .. } => {
                let pool = store::connect(db.db_path.clone()).await?;
                let stored = store::dicho_by_id(&pool, *dicho).await?;
                let assignments = store::assignments_for(&pool, *dicho).await?;
                let clusters = store::load_clusters(&pool).await?;
                report::print_dicho(&stored, &assignments, &clusters);
                Ok(())
            }
            Cmd::Report { cmd } => cmd.run().await,
            Cmd::Completion { shell, output, .. } => {
                let mut cmd = Cli::command();
                if let Some(output_path) = output {
                    let mut file = std::fs::OpenOptions::new()
                        .write(true)
                        .truncate(true)
                        .create(true)
                        .open(output_path)?;
                    // Write completion script to the requested file.
                    generate(shell, &mut cmd, "dichoteca", &mut file);
                    info!(
                        "Generated completion script for {} at {}",
                        shell,
                        output_path.display()
                    );
                } else {
                    // Fallback: print completion script to stdout.
                    generate(shell, &mut cmd, "dichoteca", &mut std::io::stdout());
                }
                std::process::exit(0);
            }
        }
    }
}

impl ClustersCmd {
    #[tracing::instrument(name = "Managing clusters", level = "info", skip(self))]
    pub async fn run(&self) -> AppResult<()> {
        match self {
            ClustersCmd::Load { input, db, .. } => {
                let pool = store::connect(db.db_path.clone()).await?;
                let raw = tokio::fs::read_to_string(input).await?;
                let defs: Vec<store::ClusterDef> = serde_json::from_str(&raw)?;
                for def in &defs {
                    store::upsert_cluster(&pool, def).await?;
                }
                info!("Loaded {} cluster definition(s)", defs.len());
                Ok(())
            }
            ClustersCmd::List { db, .. } => {
                let pool = store::connect(db.db_path.clone()).await?;
                let clusters = store::load_clusters(&pool).await?;
                report::print_clusters(&clusters);
                Ok(())
            }
            ClustersCmd::Members { cluster, db, .. } => {
                let pool = store::connect(db.db_path.clone()).await?;
                let defs = store::load_clusters(&pool).await?;
                let def = defs.iter().find(|d| d.id == *cluster).ok_or_else(|| {
                    crate::AppError::Other(format!("no cluster with id {}", cluster))
                })?;
                let members = store::cluster_members(&pool, *cluster).await?;
                report::print_members(def, &members);
                Ok(())
            }
            ClustersCmd::Extend {
                cluster,
                keywords,
                db,
                ..
            } => {
                let pool = store::connect(db.db_path.clone()).await?;
                let updated = store::extend_cluster_keywords(&pool, *cluster, keywords).await?;
                info!(
                    "Cluster {} now carries {} keyword(s); run `assign` to apply",
                    updated.name,
                    updated.representative_keywords.len()
                );
                Ok(())
            }
        }
    }
}

impl ReportCmd {
    #[tracing::instrument(name = "Reporting", level = "info", skip(self))]
    pub async fn run(&self) -> AppResult<()> {
        match self {
            ReportCmd::Ranks { db, .. } => {
                let pool = store::connect(db.db_path.clone()).await?;
                let stats = store::rank_statistics(&pool).await?;
                report::print_rank_stats(&stats);
                Ok(())
            }
            ReportCmd::Overlap { db, .. } => {
                let pool = store::connect(db.db_path.clone()).await?;
                let pairs = store::cluster_overlap(&pool).await?;
                report::print_overlap(&pairs);
                Ok(())
            }
            ReportCmd::Difficulty { db, .. } => {
                let pool = store::connect(db.db_path.clone()).await?;
                let buckets = store::difficulty_distribution(&pool).await?;
                report::print_difficulty(&buckets);
                Ok(())
            }
        }
    }
}
