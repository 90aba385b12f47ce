mod adapters;
mod db;
mod extract;
mod models;
mod normalize;
mod platform;
mod reconcile;
mod sync;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use db::Database;
use extract::{ExtractorConfig, OpenAiExtractor};
use platform::{detect, Platform};
use sync::{SyncEngine, SyncOptions};

#[derive(Parser)]
#[command(name = "jobsync")]
#[command(about = "Job listing aggregator - sync postings from ATS platforms into a local store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Manage companies (sync accounts)
    Company {
        #[command(subcommand)]
        command: CompanyCommands,
    },

    /// Detect the ATS platform behind a careers-page URL
    Detect {
        /// Careers page URL
        url: String,
    },

    /// List stored listings
    List {
        /// Filter by company name
        #[arg(short, long)]
        company: Option<String>,

        /// Include listings marked removed
        #[arg(long)]
        removed: bool,
    },

    /// Show listing details
    Show {
        /// Listing ID
        id: i64,
    },

    /// Reconcile stored listings against upstream sources
    Sync {
        /// Sync a single company by name
        company: Option<String>,

        /// Maximum new listings to add per company per run
        #[arg(long, default_value = "4")]
        max_new: usize,

        /// Skip companies synced within the last N hours
        #[arg(long)]
        min_age_hours: Option<i64>,

        /// Extraction model to use
        #[arg(long)]
        model: Option<String>,
    },
}

#[derive(Subcommand)]
enum CompanyCommands {
    /// Register a company to sync
    Add {
        /// Company name
        name: String,

        /// Careers page / job board URL
        #[arg(long)]
        job_website: String,

        /// Company homepage
        #[arg(long)]
        website: Option<String>,

        /// Logo URL
        #[arg(long)]
        logo: Option<String>,

        /// Force a platform instead of detecting it (use "webpage" for
        /// careers pages with no supported ATS)
        #[arg(long)]
        platform: Option<String>,
    },

    /// List all companies
    List,

    /// Show company details
    Show {
        /// Company name
        name: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let db = Database::open()?;

    match cli.command {
        Commands::Init => {
            db.init()?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::Company { command } => {
            db.ensure_initialized()?;
            match command {
                CompanyCommands::Add {
                    name,
                    job_website,
                    website,
                    logo,
                    platform,
                } => {
                    let platform = match platform.as_deref() {
                        Some(s) => {
                            let parsed = Platform::parse(s);
                            if parsed == Platform::Unknown && s != "unknown" {
                                return Err(anyhow!(
                                    "Unknown platform '{}'. Available: greenhouse, lever, ashby, webpage",
                                    s
                                ));
                            }
                            parsed
                        }
                        None => detect(&job_website).platform,
                    };

                    let id = db.create_company(
                        &name,
                        website.as_deref(),
                        &job_website,
                        logo.as_deref(),
                        platform,
                    )?;
                    println!("Added company '{}' (ID: {}, platform: {})", name, id, platform.as_str());
                }

                CompanyCommands::List => {
                    let companies = db.list_companies()?;
                    if companies.is_empty() {
                        println!("No companies found.");
                    } else {
                        println!(
                            "{:<6} {:<24} {:<12} {:<20}",
                            "ID", "NAME", "PLATFORM", "LAST SYNCED"
                        );
                        println!("{}", "-".repeat(64));
                        for company in companies {
                            println!(
                                "{:<6} {:<24} {:<12} {:<20}",
                                company.id,
                                truncate(&company.name, 22),
                                company.platform.as_str(),
                                truncate(&company.last_synced_at.unwrap_or_else(|| "-".to_string()), 18)
                            );
                        }
                    }
                }

                CompanyCommands::Show { name } => match db.get_company_by_name(&name)? {
                    Some(company) => {
                        println!("Company #{}", company.id);
                        println!("Name: {}", company.name);
                        println!("Careers page: {}", company.job_website);
                        if let Some(website) = &company.website {
                            println!("Website: {}", website);
                        }
                        if let Some(logo) = &company.logo {
                            println!("Logo: {}", logo);
                        }
                        println!("Platform: {}", company.platform.as_str());
                        match &company.last_synced_at {
                            Some(ts) => println!("Last synced: {}", ts),
                            None => println!("Last synced: never"),
                        }
                        let active = db.active_jobs(company.id)?;
                        println!("Active listings: {}", active.len());
                        println!("Added: {}", company.created_at);
                        println!("Updated: {}", company.updated_at);
                    }
                    None => {
                        println!("Company '{}' not found.", name);
                    }
                },
            }
        }

        Commands::List { company, removed } => {
            db.ensure_initialized()?;
            let jobs = db.list_jobs(company.as_deref(), removed)?;
            if jobs.is_empty() {
                println!("No listings found.");
            } else {
                println!(
                    "{:<6} {:<20} {:<30} {:<12} {:>12}",
                    "ID", "COMPANY", "TITLE", "PLATFORM", "SALARY"
                );
                println!("{}", "-".repeat(84));
                for job in jobs {
                    let salary = match (job.salary_min, job.salary_max) {
                        (Some(min), Some(max)) => format!("${}-${}k", min / 1000, max / 1000),
                        (Some(min), None) => format!("${}k+", min / 1000),
                        (None, Some(max)) => format!("<${}k", max / 1000),
                        (None, None) => "-".to_string(),
                    };
                    println!(
                        "{:<6} {:<20} {:<30} {:<12} {:>12}",
                        job.id,
                        truncate(&job.company, 18),
                        truncate(&job.title, 28),
                        job.platform.as_str(),
                        salary
                    );
                }
            }
        }

        Commands::Show { id } => {
            db.ensure_initialized()?;
            match db.get_job(id)? {
                Some(job) => {
                    println!("Listing #{}", job.id);
                    println!("Title: {}", job.title);
                    println!("Company: {} (#{})", job.company, job.company_id);
                    println!("Role: {} / {}", job.primary_role, job.position_type.as_str());
                    println!(
                        "Location: {} ({}, {})",
                        job.locations,
                        job.location_type.as_str(),
                        job.country
                    );
                    match (job.salary_min, job.salary_max) {
                        (Some(min), Some(max)) => {
                            println!("Salary: {} {} - {}", job.currency, min, max)
                        }
                        (Some(min), None) => println!("Salary: {} {}+", job.currency, min),
                        (None, Some(max)) => println!("Salary: up to {} {}", job.currency, max),
                        (None, None) => {}
                    }
                    if let (Some(min), Some(max)) = (job.equity_min, job.equity_max) {
                        println!("Equity: {}% - {}%", min, max);
                    }
                    if job.crypto_payment {
                        println!("Crypto payment: yes");
                    }
                    println!("Apply: {}", job.application_method.as_str());
                    if let Some(url) = &job.application_url {
                        println!("URL: {}", url);
                    }
                    if let Some(email) = &job.application_email {
                        println!("Email: {}", email);
                    }
                    println!("Platform: {}", job.platform.as_str());
                    println!(
                        "Status: {}{}",
                        if job.published { "published" } else { "unpublished" },
                        if job.deprecated { ", removed" } else { "" }
                    );
                    println!("Payment: {}", job.payment_status);
                    if let Some(logo) = &job.company_logo {
                        println!("Logo: {}", logo);
                    }
                    if let Some(published_at) = &job.published_at {
                        println!("Published: {}", published_at);
                    }
                    if let Some(expires_at) = &job.expires_at {
                        println!("Expires: {}", expires_at);
                    }
                    if let Some(deprecated_at) = &job.deprecated_at {
                        println!("Removed: {}", deprecated_at);
                    }
                    println!("Created: {}", job.created_at);
                    println!("Updated: {}", job.updated_at);
                    if let Some(keywords) = &job.keywords {
                        println!("Keywords: {}", keywords);
                    }
                    println!("\n--- Description ---\n{}", job.description);
                }
                None => {
                    println!("Listing #{} not found.", id);
                }
            }
        }

        Commands::Detect { url } => {
            let detection = detect(&url);
            println!("Platform: {}", detection.platform.as_str());
            match detection.slug {
                Some(slug) => println!("Account identifier: {}", slug),
                None => println!("Account identifier: none"),
            }
        }

        Commands::Sync {
            company,
            max_new,
            min_age_hours,
            model,
        } => {
            db.ensure_initialized()?;

            // Startup failures (no store, no credentials) are the only
            // fatal exits; per-company errors just count
            let config = ExtractorConfig::from_env(model.as_deref())?;
            println!("Extraction model: {}", config.model);
            let extractor = OpenAiExtractor::new(config)?;

            let options = SyncOptions {
                max_new,
                min_age_hours,
                ..Default::default()
            };
            let engine = SyncEngine::new(&db, &extractor, options)?;
            let stats = engine.run(company.as_deref())?;

            println!("\n{}", "=".repeat(70));
            println!("SYNC COMPLETE");
            println!("{}", "=".repeat(70));
            println!("  Companies processed: {}", stats.companies);
            println!("  Companies skipped:   {}", stats.skipped);
            println!("  New jobs added:      {}", stats.added);
            println!("  Existing (unchanged): {}", stats.unchanged);
            println!("  Jobs removed:        {}", stats.removed);
            if stats.errors > 0 {
                println!("  Errors:              {}", stats.errors);
            }
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max.saturating_sub(3)])
    }
}
