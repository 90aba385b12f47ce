use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDateTime, Utc};
use std::thread;
use std::time::Duration;

use crate::adapters::{adapter_for, SourceAdapter};
use crate::db::Database;
use crate::extract::Extractor;
use crate::models::{Company, CompanyStats, RunStats, SourceJobRef};
use crate::normalize::normalize;
use crate::platform::{detect, Platform};
use crate::reconcile::diff;

const SQLITE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Cap on additions per account per run; refs beyond it are deferred to
    /// the next run. Bounds the cost of the extraction step.
    pub max_new: usize,
    /// Skip accounts synced within the last N hours.
    pub min_age_hours: Option<i64>,
    pub item_delay: Duration,
    pub company_delay: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_new: 4,
            min_age_hours: None,
            item_delay: Duration::from_secs(1),
            company_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Expected steady-state condition, counted apart from errors.
    UnsupportedPlatform,
    /// Entry URL matched a platform but yielded no account identifier.
    InvalidUrl,
}

impl SkipReason {
    fn describe(&self) -> &'static str {
        match self {
            SkipReason::UnsupportedPlatform => "no supported platform detected",
            SkipReason::InvalidUrl => "could not extract account identifier",
        }
    }
}

#[derive(Debug)]
pub enum CompanyOutcome {
    Skipped(SkipReason),
    Synced(CompanyStats),
}

/// Drives one full reconciliation run. The only component that writes to
/// the store.
pub struct SyncEngine<'a> {
    db: &'a Database,
    extractor: &'a dyn Extractor,
    http: reqwest::blocking::Client,
    options: SyncOptions,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        db: &'a Database,
        extractor: &'a dyn Extractor,
        options: SyncOptions,
    ) -> Result<Self> {
        let http = crate::adapters::http_client()?;
        Ok(Self {
            db,
            extractor,
            http,
            options,
        })
    }

    /// Sequential pass over every eligible account. One account's failure
    /// never aborts the rest; everything lands in the aggregate stats.
    pub fn run(&self, filter: Option<&str>) -> Result<RunStats> {
        let companies = match filter {
            Some(name) => {
                let company = self
                    .db
                    .get_company_by_name(name)?
                    .ok_or_else(|| anyhow!("Company '{}' not found", name))?;
                vec![company]
            }
            None => self.db.list_companies()?,
        };

        let now = Utc::now().naive_utc();
        let companies: Vec<Company> = companies
            .into_iter()
            .filter(|c| is_due(c, self.options.min_age_hours, now))
            .collect();

        println!("Found {} companies to sync", companies.len());

        let mut totals = RunStats::default();
        for (i, company) in companies.iter().enumerate() {
            if i > 0 {
                thread::sleep(self.options.company_delay);
            }
            totals.companies += 1;

            match self.sync_company(company) {
                Ok(CompanyOutcome::Skipped(reason)) => {
                    totals.skipped += 1;
                    println!("  skipped: {}", reason.describe());
                }
                Ok(CompanyOutcome::Synced(stats)) => {
                    totals.added += stats.added;
                    totals.unchanged += stats.unchanged;
                    totals.removed += stats.removed;
                    totals.errors += stats.errors;
                }
                Err(e) => {
                    // Index fetch and the like: skipped this run, retried by
                    // the next scheduled run
                    totals.errors += 1;
                    eprintln!("  error syncing {}: {:#}", company.name, e);
                }
            }
        }

        Ok(totals)
    }

    fn sync_company(&self, company: &Company) -> Result<CompanyOutcome> {
        println!("\n{}", "=".repeat(70));
        println!("Syncing: {}", company.name);
        println!("{}", "=".repeat(70));

        let detection = detect(&company.job_website);
        let platform = effective_platform(detection.platform, company.platform);

        if platform == Platform::Unknown {
            return Ok(CompanyOutcome::Skipped(SkipReason::UnsupportedPlatform));
        }

        // The generic adapter takes the careers-page URL itself as the
        // account identifier
        let slug = match platform {
            Platform::Webpage => Some(company.job_website.clone()),
            _ => detection.slug,
        };
        let Some(slug) = slug else {
            return Ok(CompanyOutcome::Skipped(SkipReason::InvalidUrl));
        };

        let Some(adapter) = adapter_for(platform, &self.http, self.extractor) else {
            return Ok(CompanyOutcome::Skipped(SkipReason::UnsupportedPlatform));
        };

        println!("  platform: {} ({})", platform.as_str(), slug);
        self.sync_resolved(company, platform, &slug, adapter.as_ref())
    }

    fn sync_resolved(
        &self,
        company: &Company,
        platform: Platform,
        slug: &str,
        adapter: &dyn SourceAdapter,
    ) -> Result<CompanyOutcome> {
        let refs = adapter
            .fetch_index(slug)
            .with_context(|| format!("Failed to fetch listing index for {}", company.name))?;
        println!("  found {} jobs upstream", refs.len());

        let stored = self.db.active_jobs(company.id)?;
        println!("  found {} active jobs in database", stored.len());

        let recon = diff(&refs, &stored, self.options.max_new);

        let mut stats = CompanyStats {
            unchanged: recon.unchanged,
            ..Default::default()
        };

        // Removals are applied before additions
        for job in &recon.to_remove {
            println!("  - removing: {}", job.title);
            match self.db.deprecate_job(job.id) {
                Ok(()) => stats.removed += 1,
                Err(e) => {
                    stats.errors += 1;
                    eprintln!("    failed to mark removed: {:#}", e);
                }
            }
        }

        // Listings still present upstream get their logo patched in place
        // when the account record has one
        if let Some(logo) = company.logo.as_deref().filter(|l| !l.is_empty()) {
            for job in &stored {
                let removed = recon.to_remove.iter().any(|r| r.id == job.id);
                let missing_logo = job
                    .company_logo
                    .as_deref()
                    .map_or(true, |l| l.is_empty() || l == "null");
                if !removed && missing_logo {
                    if let Err(e) = self.db.set_job_logo(job.id, logo) {
                        stats.errors += 1;
                        eprintln!("    failed to backfill logo: {:#}", e);
                    }
                }
            }
        }

        if recon.deferred > 0 {
            println!(
                "  deferring {} new jobs beyond the per-run limit of {}",
                recon.deferred, self.options.max_new
            );
        }

        for (i, job_ref) in recon.to_add.iter().enumerate() {
            if i > 0 {
                thread::sleep(self.options.item_delay);
            }
            println!("  + new: {}", job_ref.title);
            println!("      location: {}", job_ref.location);
            println!("      url: {}", job_ref.url);
            match self.add_listing(adapter, slug, company, job_ref) {
                Ok(()) => stats.added += 1,
                Err(e) => {
                    stats.errors += 1;
                    eprintln!("      {:#}", e);
                }
            }
        }

        // Metadata save comes last; a failure here never rolls back the
        // listing changes already committed
        if let Err(e) = self.db.update_company_sync(company.id, platform) {
            stats.errors += 1;
            eprintln!("  failed to update account metadata: {:#}", e);
        }

        println!(
            "  summary: {} added, {} unchanged, {} removed, {} errors",
            stats.added, stats.unchanged, stats.removed, stats.errors
        );
        Ok(CompanyOutcome::Synced(stats))
    }

    fn add_listing(
        &self,
        adapter: &dyn SourceAdapter,
        slug: &str,
        company: &Company,
        job_ref: &SourceJobRef,
    ) -> Result<()> {
        let detail = adapter
            .fetch_detail(slug, job_ref)
            .context("Failed to fetch job details")?;
        let record =
            normalize(company, &detail, self.extractor).context("Failed to normalize job")?;
        self.db
            .insert_job(&record)
            .context("Failed to save job")?;
        Ok(())
    }
}

/// Detection wins; a stored operator-assigned `webpage` platform fills in
/// when detection has nothing.
fn effective_platform(detected: Platform, stored: Platform) -> Platform {
    if detected == Platform::Unknown && stored == Platform::Webpage {
        Platform::Webpage
    } else {
        detected
    }
}

fn is_due(company: &Company, min_age_hours: Option<i64>, now: NaiveDateTime) -> bool {
    let Some(hours) = min_age_hours else {
        return true;
    };
    let Some(last) = company.last_synced_at.as_deref() else {
        return true;
    };
    // Timestamps the store cannot parse count as stale
    match NaiveDateTime::parse_from_str(last, SQLITE_TIMESTAMP_FORMAT) {
        Ok(last) => now - last >= chrono::Duration::hours(hours),
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{DetailPayload, SourceDetail};
    use crate::models::{ApplicationMethod, JobDraft, LocationType, PositionType};
    use std::collections::HashSet;

    struct StubAdapter {
        index: Vec<SourceJobRef>,
        fail_detail_for: HashSet<String>,
    }

    impl StubAdapter {
        fn new(urls: &[&str]) -> Self {
            Self {
                index: urls
                    .iter()
                    .map(|url| SourceJobRef {
                        id: url.to_string(),
                        url: url.to_string(),
                        title: format!("Role {}", url),
                        location: "Remote".to_string(),
                    })
                    .collect(),
                fail_detail_for: HashSet::new(),
            }
        }

        fn failing_detail(mut self, url: &str) -> Self {
            self.fail_detail_for.insert(url.to_string());
            self
        }
    }

    impl SourceAdapter for StubAdapter {
        fn fetch_index(&self, _slug: &str) -> Result<Vec<SourceJobRef>> {
            Ok(self.index.clone())
        }

        fn fetch_detail(&self, _slug: &str, job: &SourceJobRef) -> Result<SourceDetail> {
            if self.fail_detail_for.contains(&job.url) {
                anyhow::bail!("detail fetch timed out");
            }
            Ok(SourceDetail {
                platform: Platform::Greenhouse,
                application_url: job.url.clone(),
                published_at: None,
                category_hint: Some("Engineering".to_string()),
                payload: DetailPayload::Text(format!("Job posting at {}", job.url)),
            })
        }
    }

    struct StubExtractor;

    impl Extractor for StubExtractor {
        fn extract_job(&self, _: &str, company: &str, category: &str) -> Result<JobDraft> {
            Ok(JobDraft {
                company: company.to_string(),
                company_logo: None,
                title: "Stubbed Engineer".to_string(),
                primary_role: category.to_string(),
                position_type: PositionType::FullTime,
                location_type: LocationType::Remote,
                country: "USA".to_string(),
                locations: "Remote".to_string(),
                description: "A job.".to_string(),
                keywords: None,
                currency: "USD".to_string(),
                salary_min: None,
                salary_max: None,
                equity_min: None,
                equity_max: None,
                crypto_payment: false,
                application_method: ApplicationMethod::Website,
                application_url: String::new(),
            })
        }

        fn extract_links(&self, _: &str) -> Result<Vec<(String, String)>> {
            Ok(vec![])
        }
    }

    fn test_options(max_new: usize) -> SyncOptions {
        SyncOptions {
            max_new,
            min_age_hours: None,
            item_delay: Duration::ZERO,
            company_delay: Duration::ZERO,
        }
    }

    fn setup_company(db: &Database) -> Company {
        db.create_company(
            "Acme",
            None,
            "https://boards.greenhouse.io/acme",
            None,
            Platform::Unknown,
        )
        .unwrap();
        db.get_company_by_name("Acme").unwrap().unwrap()
    }

    fn run_against(
        db: &Database,
        company: &Company,
        adapter: &StubAdapter,
        max_new: usize,
    ) -> CompanyStats {
        let extractor = StubExtractor;
        let engine = SyncEngine::new(db, &extractor, test_options(max_new)).unwrap();
        match engine
            .sync_resolved(company, Platform::Greenhouse, "acme", adapter)
            .unwrap()
        {
            CompanyOutcome::Synced(stats) => stats,
            other => panic!("expected sync, got {:?}", other),
        }
    }

    #[test]
    fn test_scenario_a_empty_store_adds_all() {
        let db = Database::open_in_memory().unwrap();
        let company = setup_company(&db);
        let adapter = StubAdapter::new(&["https://a/1", "https://a/2"]);

        let stats = run_against(&db, &company, &adapter, 2);
        assert_eq!(stats.added, 2);
        assert_eq!(stats.removed, 0);
        assert_eq!(stats.unchanged, 0);
        assert_eq!(stats.errors, 0);
        assert_eq!(db.active_jobs(company.id).unwrap().len(), 2);
    }

    #[test]
    fn test_scenario_b_stale_listing_soft_removed() {
        let db = Database::open_in_memory().unwrap();
        let company = setup_company(&db);

        // Seed both listings, then shrink upstream to just the first
        let adapter = StubAdapter::new(&["https://a/1", "https://a/2"]);
        run_against(&db, &company, &adapter, 4);

        let adapter = StubAdapter::new(&["https://a/1"]);
        let stats = run_against(&db, &company, &adapter, 4);
        assert_eq!(stats.added, 0);
        assert_eq!(stats.unchanged, 1);
        assert_eq!(stats.removed, 1);

        let active = db.active_jobs(company.id).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].application_url.as_deref(), Some("https://a/1"));

        // The removed listing survives with its flag and timestamp set
        let all_ids: Vec<i64> = (1..=2).collect();
        let removed: Vec<_> = all_ids
            .iter()
            .filter_map(|id| db.get_job(*id).unwrap())
            .filter(|j| j.deprecated)
            .collect();
        assert_eq!(removed.len(), 1);
        assert!(removed[0].deprecated_at.is_some());
    }

    #[test]
    fn test_scenario_c_cap_spreads_over_runs() {
        let db = Database::open_in_memory().unwrap();
        let company = setup_company(&db);
        let adapter = StubAdapter::new(&["https://a/1", "https://a/2", "https://a/3"]);

        let stats = run_against(&db, &company, &adapter, 1);
        assert_eq!(stats.added, 1);
        assert_eq!(stats.errors, 0);
        let active = db.active_jobs(company.id).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].application_url.as_deref(), Some("https://a/1"));

        // Same upstream next run: exactly one more, in index order
        let stats = run_against(&db, &company, &adapter, 1);
        assert_eq!(stats.added, 1);
        assert_eq!(stats.unchanged, 1);
        let active = db.active_jobs(company.id).unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(active[1].application_url.as_deref(), Some("https://a/2"));
    }

    #[test]
    fn test_scenario_d_detail_failure_skips_item_only() {
        let db = Database::open_in_memory().unwrap();
        let company = setup_company(&db);
        let adapter =
            StubAdapter::new(&["https://a/1", "https://a/2"]).failing_detail("https://a/1");

        let stats = run_against(&db, &company, &adapter, 4);
        assert_eq!(stats.added, 1);
        assert_eq!(stats.errors, 1);

        let active = db.active_jobs(company.id).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].application_url.as_deref(), Some("https://a/2"));

        // The failed item is still new next run and goes through cleanly
        let adapter = StubAdapter::new(&["https://a/1", "https://a/2"]);
        let stats = run_against(&db, &company, &adapter, 4);
        assert_eq!(stats.added, 1);
        assert_eq!(stats.errors, 0);
    }

    #[test]
    fn test_rerun_with_no_upstream_change_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let company = setup_company(&db);
        let adapter = StubAdapter::new(&["https://a/1", "https://a/2"]);

        run_against(&db, &company, &adapter, 4);
        let stats = run_against(&db, &company, &adapter, 4);
        assert_eq!(stats.added, 0);
        assert_eq!(stats.removed, 0);
        assert_eq!(stats.unchanged, 2);
        assert_eq!(db.active_jobs(company.id).unwrap().len(), 2);
    }

    #[test]
    fn test_sync_updates_account_metadata() {
        let db = Database::open_in_memory().unwrap();
        let company = setup_company(&db);
        assert!(company.last_synced_at.is_none());

        let adapter = StubAdapter::new(&["https://a/1"]);
        run_against(&db, &company, &adapter, 4);

        let company = db.get_company_by_name("Acme").unwrap().unwrap();
        assert_eq!(company.platform, Platform::Greenhouse);
        assert!(company.last_synced_at.is_some());
    }

    #[test]
    fn test_normalized_listing_carries_account_identity() {
        let db = Database::open_in_memory().unwrap();
        let company = setup_company(&db);
        let adapter = StubAdapter::new(&["https://a/1"]);
        run_against(&db, &company, &adapter, 4);

        let jobs = db.active_jobs(company.id).unwrap();
        assert_eq!(jobs[0].company, "Acme");
        assert_eq!(jobs[0].company_id, company.id);
        assert_eq!(jobs[0].primary_role, "Engineering");
        assert!(jobs[0].published);
        assert_eq!(jobs[0].payment_status, "paid");
    }

    #[test]
    fn test_logo_backfill_for_unchanged_listings() {
        let db = Database::open_in_memory().unwrap();
        db.create_company(
            "Acme",
            None,
            "https://boards.greenhouse.io/acme",
            Some("https://cdn.example.com/acme.png"),
            Platform::Unknown,
        )
        .unwrap();
        let company = db.get_company_by_name("Acme").unwrap().unwrap();

        // A listing stored before the account record had a logo
        db.insert_job(&crate::models::NewJob {
            company_id: company.id,
            company: company.name.clone(),
            company_logo: None,
            title: "Old Listing".to_string(),
            primary_role: "Engineering".to_string(),
            position_type: PositionType::FullTime,
            location_type: LocationType::Remote,
            country: "USA".to_string(),
            locations: "Remote".to_string(),
            description: "A job.".to_string(),
            keywords: None,
            currency: "USD".to_string(),
            salary_min: None,
            salary_max: None,
            equity_min: None,
            equity_max: None,
            crypto_payment: false,
            application_method: ApplicationMethod::Website,
            application_url: Some("https://a/1".to_string()),
            platform: Platform::Greenhouse,
            published: true,
            payment_status: "paid".to_string(),
            published_at: None,
            expires_at: None,
        })
        .unwrap();

        // Still present upstream, so it counts unchanged and gets the logo
        // patched in place
        let adapter = StubAdapter::new(&["https://a/1"]);
        let stats = run_against(&db, &company, &adapter, 4);
        assert_eq!(stats.unchanged, 1);
        assert_eq!(stats.added, 0);

        let jobs = db.active_jobs(company.id).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(
            jobs[0].company_logo.as_deref(),
            Some("https://cdn.example.com/acme.png")
        );
    }

    #[test]
    fn test_unknown_platform_is_skipped_not_errored() {
        let db = Database::open_in_memory().unwrap();
        db.create_company(
            "NoAts",
            None,
            "https://careers.example.com/jobs",
            None,
            Platform::Unknown,
        )
        .unwrap();
        let company = db.get_company_by_name("NoAts").unwrap().unwrap();

        let extractor = StubExtractor;
        let engine = SyncEngine::new(&db, &extractor, test_options(4)).unwrap();
        match engine.sync_company(&company).unwrap() {
            CompanyOutcome::Skipped(SkipReason::UnsupportedPlatform) => {}
            other => panic!("expected unsupported-platform skip, got {:?}", other),
        }
        // The account keeps its state; nothing was synced
        let company = db.get_company_by_name("NoAts").unwrap().unwrap();
        assert!(company.last_synced_at.is_none());
    }

    #[test]
    fn test_slugless_url_is_skipped_as_invalid() {
        let db = Database::open_in_memory().unwrap();
        db.create_company(
            "NoSlug",
            None,
            "https://jobs.lever.co/",
            None,
            Platform::Unknown,
        )
        .unwrap();
        let company = db.get_company_by_name("NoSlug").unwrap().unwrap();

        let extractor = StubExtractor;
        let engine = SyncEngine::new(&db, &extractor, test_options(4)).unwrap();
        match engine.sync_company(&company).unwrap() {
            CompanyOutcome::Skipped(SkipReason::InvalidUrl) => {}
            other => panic!("expected invalid-url skip, got {:?}", other),
        }
    }

    #[test]
    fn test_effective_platform_fallback() {
        assert_eq!(
            effective_platform(Platform::Unknown, Platform::Webpage),
            Platform::Webpage
        );
        // Detection wins when it has an answer
        assert_eq!(
            effective_platform(Platform::Lever, Platform::Webpage),
            Platform::Lever
        );
        // A stale stored ATS platform never overrides a failed detection
        assert_eq!(
            effective_platform(Platform::Unknown, Platform::Greenhouse),
            Platform::Unknown
        );
    }

    #[test]
    fn test_is_due_filter() {
        let mut company = Company {
            id: 1,
            name: "Acme".to_string(),
            website: None,
            job_website: "https://boards.greenhouse.io/acme".to_string(),
            logo: None,
            platform: Platform::Greenhouse,
            last_synced_at: None,
            created_at: String::new(),
            updated_at: String::new(),
        };
        let now = NaiveDateTime::parse_from_str("2026-08-06 12:00:00", SQLITE_TIMESTAMP_FORMAT)
            .unwrap();

        // Never synced: always due
        assert!(is_due(&company, Some(24), now));
        // No filter: always due
        company.last_synced_at = Some("2026-08-06 11:00:00".to_string());
        assert!(is_due(&company, None, now));
        // Synced an hour ago: not due under a 24h filter
        assert!(!is_due(&company, Some(24), now));
        // Synced two days ago: due
        company.last_synced_at = Some("2026-08-04 11:00:00".to_string());
        assert!(is_due(&company, Some(24), now));
        // Unparseable timestamp counts as stale
        company.last_synced_at = Some("last tuesday".to_string());
        assert!(is_due(&company, Some(24), now));
    }
}
