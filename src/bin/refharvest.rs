//! CLI binary for refharvest.
//!
//! Usage: refharvest submit references.txt

#[cfg(feature = "cli")]
mod cli {
    use clap::{Parser, Subcommand};
    use refharvest::error::{HarvestError, Result};
    use refharvest::{
        ArtifactKind, Config, Entry, JobReport, JobResult, Orchestrator, Resolution,
    };
    use std::io::Read;
    use std::path::{Path, PathBuf};

    #[derive(Parser)]
    #[command(name = "refharvest", about = "Resolve reference lists against PubMed", version)]
    struct Cli {
        /// Config file (default: <config dir>/refharvest/config.toml)
        #[arg(long, global = true)]
        config: Option<PathBuf>,

        /// Directory for the job and entry logs (overrides config)
        #[arg(long, global = true)]
        data_dir: Option<PathBuf>,

        /// Output format
        #[arg(long, global = true, default_value = "table")]
        output: OutputFormat,

        #[command(subcommand)]
        command: Commands,
    }

    #[derive(Clone, Copy, clap::ValueEnum)]
    enum OutputFormat {
        Table,
        Json,
    }

    #[derive(Subcommand)]
    enum Commands {
        /// Submit a reference list and process it
        Submit {
            /// File with the references, `-` for stdin
            file: PathBuf,
            /// Stay until the job finishes and print its results. Without it the
            /// job id is printed and `recover` or `serve` finishes the job later
            #[arg(long)]
            wait: bool,
        },
        /// Show a job's status and progress
        Status { job_id: String },
        /// Show per-citation results of a job
        Results { job_id: String },
        /// Cancel a job
        Cancel { job_id: String },
        /// List recent jobs
        Jobs {
            #[arg(short, long)]
            limit: Option<usize>,
        },
        /// Resolve a single title to a PubMed record
        Resolve {
            title: String,
            #[arg(short, long)]
            author: Option<String>,
        },
        /// List or search stored entries
        Entries {
            /// Case-insensitive filter on title, first author or PMID
            query: Option<String>,
        },
        /// Show the stored entry for a PMID
        Entry { pmid: String },
        /// List entries whose search or retrieval failed
        Failed,
        /// Print or save a stored artifact for a PMID
        Artifact {
            pmid: String,
            /// text, pdf or references
            #[arg(short, long, default_value = "text")]
            kind: ArtifactKind,
            /// Write to this file instead of stdout (required for PDFs)
            #[arg(long)]
            out: Option<PathBuf>,
        },
        /// Entry statistics
        Stats,
        /// Fetch missing reference lists for stored entries
        BackfillRefs,
        /// Resume (or fail, per config) jobs left unfinished
        Recover,
        /// Start MCP server (stdio)
        Serve,
    }

    fn load_config(cli: &Cli) -> Result<Config> {
        let path = cli.config.clone().or_else(|| {
            dirs::config_dir().map(|d| d.join("refharvest").join("config.toml"))
        });
        let mut config = Config::load(path.as_deref())?;
        if let Some(dir) = &cli.data_dir {
            config.storage.data_dir = dir.clone();
        }
        Ok(config)
    }

    fn read_input(file: &Path) -> Result<String> {
        if file.as_os_str() == "-" {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            Ok(text)
        } else {
            Ok(std::fs::read_to_string(file)?)
        }
    }

    fn truncate(text: &str, max: usize) -> String {
        if text.chars().count() > max {
            let cut: String = text.chars().take(max - 3).collect();
            format!("{}...", cut)
        } else {
            text.to_string()
        }
    }

    fn print_jobs_table(jobs: &[JobReport]) {
        use comfy_table::{ContentArrangement, Table};

        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["Job", "Status", "Items", "Completed", "Failed", "Progress", "Created"]);
        for r in jobs {
            table.add_row(vec![
                r.job.job_id.clone(),
                r.job.status.to_string(),
                r.job.total_items.to_string(),
                r.job.completed_count.to_string(),
                r.job.failed_count.to_string(),
                format!("{:.1}%", r.progress_percentage),
                r.job.created_at.format("%Y-%m-%d %H:%M").to_string(),
            ]);
        }
        println!("{table}");
    }

    fn print_results_table(results: &[JobResult]) {
        use comfy_table::{ContentArrangement, Table};

        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["#", "Status", "PMID", "Title", "Error"]);
        for r in results {
            table.add_row(vec![
                (r.item_index + 1).to_string(),
                r.status.to_string(),
                r.canonical_id.clone().unwrap_or_default(),
                truncate(r.query_title.as_deref().unwrap_or("-"), 60),
                r.error_message.clone().unwrap_or_default(),
            ]);
        }
        println!("{table}");
    }

    fn print_entries_table(entries: &[Entry]) {
        use comfy_table::{ContentArrangement, Table};

        let yes_no = |b: bool| if b { "yes" } else { "-" };
        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["PMID", "Status", "First Author", "Title", "Text", "PDF", "Refs"]);
        for e in entries {
            let title = e.matched_title.as_deref().unwrap_or(&e.query_title);
            table.add_row(vec![
                e.canonical_id.clone().unwrap_or_else(|| "-".to_string()),
                e.status.to_string(),
                e.first_author.clone(),
                truncate(title, 60),
                yes_no(e.artifacts.text).to_string(),
                yes_no(e.artifacts.pdf).to_string(),
                yes_no(e.artifacts.references).to_string(),
            ]);
        }
        println!("{table}");
    }

    fn print_report(report: &JobReport) {
        let job = &report.job;
        println!("Job {}", job.job_id);
        println!("  Status:    {}", job.status);
        println!(
            "  Progress:  {}/{} ({:.1}%)",
            report.processed_items, job.total_items, report.progress_percentage
        );
        println!("  Completed: {}", job.completed_count);
        println!("  Failed:    {}", job.failed_count);
        println!("  Updated:   {}", job.updated_at.to_rfc3339());
    }

    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        let cli = Cli::parse();
        let config = load_config(&cli)?;
        refharvest::logging::init(&config.logging);

        let orchestrator = Orchestrator::from_config(&config).await?;
        let json = matches!(cli.output, OutputFormat::Json);

        match cli.command {
            Commands::Submit { file, wait } => {
                let text = read_input(&file)?;
                let submitted = orchestrator.submit(&text).await?;
                if !wait {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&submitted)?);
                    } else {
                        println!(
                            "Submitted job {} ({} citations)",
                            submitted.job_id, submitted.total_items
                        );
                    }
                    return Ok(());
                }

                eprintln!(
                    "Processing {} citations as job {}...",
                    submitted.total_items, submitted.job_id
                );
                let report = orchestrator.wait(&submitted.job_id).await?;
                let results = orchestrator.list_job_results(&submitted.job_id).await?;
                if json {
                    let body = serde_json::json!({ "job": report, "results": results });
                    println!("{}", serde_json::to_string_pretty(&body)?);
                } else {
                    print_report(&report);
                    print_results_table(&results);
                }
            }

            Commands::Status { job_id } => {
                let report = orchestrator.get_job(&job_id).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else {
                    print_report(&report);
                }
            }

            Commands::Results { job_id } => {
                let results = orchestrator.list_job_results(&job_id).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&results)?);
                } else {
                    print_results_table(&results);
                }
            }

            Commands::Cancel { job_id } => {
                let outcome = orchestrator.cancel(&job_id).await?;
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            }

            Commands::Jobs { limit } => {
                let jobs = orchestrator.list_jobs(limit).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&jobs)?);
                } else {
                    print_jobs_table(&jobs);
                }
            }

            Commands::Resolve { title, author } => {
                match orchestrator.resolve_title(&title, author.as_deref()).await? {
                    Resolution::Matched { record, strategy } => {
                        if json {
                            println!("{}", serde_json::to_string_pretty(&record)?);
                        } else {
                            println!("{} → PMID {} (strategy {})", title, record.id, strategy + 1);
                            println!("  {}", record.title);
                            if let Some(journal) = &record.journal {
                                println!("  {} {}", journal, record.year.map(|y| y.to_string()).unwrap_or_default());
                            }
                        }
                    }
                    Resolution::NotFound => {
                        return Err(HarvestError::NotFound(format!("No PubMed match for: {}", title)));
                    }
                }
            }

            Commands::Entries { query } => {
                let entries = orchestrator
                    .search_entries(query.as_deref().unwrap_or(""))
                    .await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&entries)?);
                } else {
                    println!("{} entries:", entries.len());
                    print_entries_table(&entries);
                }
            }

            Commands::Entry { pmid } => {
                let entry = orchestrator.get_entry(&pmid).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&entry)?);
                } else {
                    print_entries_table(std::slice::from_ref(&entry));
                    if let Some(doi) = &entry.doi {
                        println!("DOI: {}", doi);
                    }
                    println!("Citation: {}", entry.raw_text);
                }
            }

            Commands::Failed => {
                let entries = orchestrator.failed_entries().await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&entries)?);
                } else {
                    println!("{} failed entries:", entries.len());
                    for entry in &entries {
                        println!("  [{}] {}", entry.status, truncate(&entry.raw_text, 100));
                    }
                }
            }

            Commands::Artifact { pmid, kind, out } => {
                let bytes = orchestrator.read_artifact(&pmid, kind).await?;
                match out {
                    Some(path) => {
                        std::fs::write(&path, &bytes)?;
                        eprintln!("Wrote {} bytes to {}", bytes.len(), path.display());
                    }
                    None if kind == ArtifactKind::Pdf => {
                        return Err(HarvestError::InvalidInput(
                            "PDF output needs --out <file>".to_string(),
                        ));
                    }
                    None => print!("{}", String::from_utf8_lossy(&bytes)),
                }
            }

            Commands::Stats => {
                let stats = orchestrator.entry_statistics().await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&stats)?);
                } else {
                    println!("Entries:        {}", stats.total_entries);
                    println!("Successful:     {}", stats.successful);
                    println!("Failed:         {}", stats.failed);
                    println!("Full text:      {}", stats.text_available);
                    println!("PDF:            {}", stats.pdf_available);
                    println!("Reference list: {}", stats.references_available);
                    println!("Text and PDF:   {}", stats.text_and_pdf);
                    println!("Success rate:   {:.1}%", stats.success_rate * 100.0);
                }
            }

            Commands::BackfillRefs => {
                let fetched = orchestrator.backfill_reference_lists().await?;
                println!("Fetched {} reference lists", fetched);
            }

            Commands::Recover => {
                let report = orchestrator.recover().await?;
                for job_id in &report.resumed {
                    let done = orchestrator.wait(job_id).await?;
                    eprintln!("Job {} finished: {}", job_id, done.job.status);
                }
                println!("{}", serde_json::to_string_pretty(&report)?);
            }

            Commands::Serve => {
                let report = orchestrator.recover().await?;
                if !report.resumed.is_empty() || !report.failed.is_empty() {
                    tracing::info!(
                        resumed = report.resumed.len(),
                        failed = report.failed.len(),
                        "Recovered unfinished jobs"
                    );
                }
                refharvest::mcp::run_server(orchestrator).await?;
            }
        }

        Ok(())
    }
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() {
    if let Err(e) = cli::run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("This binary requires the 'cli' feature. Build with: cargo build --features cli");
    std::process::exit(1);
}
