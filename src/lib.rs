//! # refharvest
//!
//! Resolve pasted reference lists to PubMed records, fetch their full text,
//! PDF and reference lists from PubMed Central, and track the work as
//! resumable background jobs.
//!
//! Provides:
//! - **Library**: [`Orchestrator`] plus the pieces it drives (extraction,
//!   query strategies, title matching, content retrieval, durable store)
//! - **CLI**: `refharvest` binary for terminal use (includes `refharvest serve` for MCP)
//!
//! ## Quick Start
//!
//! ```no_run
//! # async fn example() -> refharvest::error::Result<()> {
//! use refharvest::{Config, Orchestrator};
//!
//! let config = Config::load(None)?;
//! let orchestrator = Orchestrator::from_config(&config).await?;
//!
//! let job = orchestrator
//!     .submit("1. Smith J. Long COVID in adults. Lancet. 2021.\n2. ...")
//!     .await?;
//! let report = orchestrator.wait(&job.job_id).await?;
//! println!("{}: {}%", report.job.status, report.progress_percentage);
//! # Ok(())
//! # }
//! ```
//!
//! ## Query Builder
//!
//! ```
//! use refharvest::QueryBuilder;
//!
//! let query = QueryBuilder::new()
//!     .title_words("sleep deprivation")
//!     .and()
//!     .year(2019)
//!     .build();
//! assert_eq!(query, "sleep deprivation[Title] AND 2019[pdat]");
//! ```

pub mod client;
pub mod config;
pub mod content;
pub mod error;
pub mod extract;
pub mod logging;
pub mod matching;
pub mod orchestrator;
pub mod parse;
pub mod query;
pub mod rate_limit;
pub mod resolver;
pub mod search;
pub mod store;
pub mod types;

pub mod mcp;

// Re-export key types at the crate root.
pub use client::PubMedClient;
pub use config::Config;
pub use error::{HarvestError, Result};
pub use orchestrator::{CancelOutcome, Orchestrator, SubmittedJob};
pub use query::QueryBuilder;
pub use resolver::{ArticleResolver, Resolution};
pub use types::*;
