use std::collections::HashSet;

use crate::models::{Job, SourceJobRef};

#[derive(Debug, Default)]
pub struct Reconciliation {
    /// Upstream refs with no stored counterpart, in upstream index order,
    /// capped at `max_new`.
    pub to_add: Vec<SourceJobRef>,
    /// Stored listings no longer present upstream; marked removed, never
    /// hard-deleted.
    pub to_remove: Vec<Job>,
    /// Present on both sides.
    pub unchanged: usize,
    /// New refs beyond the cap, left for the next run.
    pub deferred: usize,
}

/// Three-way diff between one account's upstream index and its stored
/// active listings. Matching is exact URL equality - formatting drift
/// upstream shows up as a remove/add pair rather than being fuzzily
/// papered over. Running twice with no upstream change yields an empty
/// diff. Duplicate URLs within one index are collapsed, first occurrence
/// wins.
pub fn diff(upstream: &[SourceJobRef], stored: &[Job], max_new: usize) -> Reconciliation {
    let stored_urls: HashSet<&str> = stored
        .iter()
        .map(|job| job.application_url.as_deref().unwrap_or(""))
        .collect();

    let mut recon = Reconciliation::default();
    let mut seen: HashSet<&str> = HashSet::new();

    for job_ref in upstream {
        if !seen.insert(job_ref.url.as_str()) {
            continue;
        }
        if stored_urls.contains(job_ref.url.as_str()) {
            recon.unchanged += 1;
        } else if recon.to_add.len() < max_new {
            recon.to_add.push(job_ref.clone());
        } else {
            recon.deferred += 1;
        }
    }

    for job in stored {
        let url = job.application_url.as_deref().unwrap_or("");
        if !seen.contains(url) {
            recon.to_remove.push(job.clone());
        }
    }

    recon
}
