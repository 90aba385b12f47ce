use anyhow::{anyhow, bail, Context, Result};
use chrono::TimeZone;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::extract::Extractor;
use crate::models::SourceJobRef;
use crate::normalize::strip_noise;
use crate::platform::Platform;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

const GREENHOUSE_API_BASE: &str = "https://boards-api.greenhouse.io/v1/boards";
const LEVER_API_BASE: &str = "https://api.lever.co/v0/postings";
const ASHBY_GRAPHQL_URL: &str =
    "https://jobs.ashbyhq.com/api/non-user-graphql?op=ApiJobBoardWithTeams";
const ASHBY_JOBS_BASE: &str = "https://jobs.ashbyhq.com";

// Some hosted job pages refuse requests without a browser user agent
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Full detail for one listing, in whatever shape the source provides.
/// The metadata fields come from the source's own structured data so the
/// normalizer can trust them over anything extracted from free text.
#[derive(Debug)]
pub struct SourceDetail {
    pub platform: Platform,
    pub application_url: String,
    pub published_at: Option<String>,
    pub category_hint: Option<String>,
    pub payload: DetailPayload,
}

#[derive(Debug)]
pub enum DetailPayload {
    /// Typed JSON; normalized by fixed field-mapping rules.
    Structured(GreenhouseDetail),
    /// Pre-combined plain text; goes through generative extraction.
    Text(String),
    /// Raw page HTML; goes through generative extraction.
    Html(String),
}

/// One upstream source. A failure from either call fails the account (index)
/// or the item (detail) for this run only; the next scheduled run is the
/// retry.
pub trait SourceAdapter {
    fn fetch_index(&self, slug: &str) -> Result<Vec<SourceJobRef>>;
    fn fetch_detail(&self, slug: &str, job: &SourceJobRef) -> Result<SourceDetail>;
}

/// Shared blocking client with the fixed per-request timeout. Adapters
/// never retry; cron re-runs do.
pub fn http_client() -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")
}

/// Single exhaustive dispatch from platform tag to adapter.
pub fn adapter_for<'a>(
    platform: Platform,
    client: &reqwest::blocking::Client,
    extractor: &'a dyn Extractor,
) -> Option<Box<dyn SourceAdapter + 'a>> {
    match platform {
        Platform::Greenhouse => Some(Box::new(GreenhouseAdapter::new(client.clone()))),
        Platform::Lever => Some(Box::new(LeverAdapter::new(client.clone()))),
        Platform::Ashby => Some(Box::new(AshbyAdapter::new(client.clone()))),
        Platform::Webpage => Some(Box::new(WebpageAdapter::new(client.clone(), extractor))),
        Platform::Unknown => None,
    }
}

// --- Greenhouse ---
// Public job-board API, no authentication. Index and detail are typed JSON;
// unknown fields are ignored, missing required fields fail the item.

#[derive(Debug, Deserialize)]
struct GreenhouseIndex {
    #[serde(default)]
    jobs: Vec<GreenhouseIndexJob>,
}

#[derive(Debug, Deserialize)]
struct GreenhouseIndexJob {
    id: Option<i64>,
    absolute_url: Option<String>,
    title: Option<String>,
    #[serde(default)]
    location: Option<GreenhouseLocation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GreenhouseLocation {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GreenhouseDepartment {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GreenhouseMetadata {
    pub name: Option<String>,
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GreenhouseDetail {
    pub title: Option<String>,
    pub content: Option<String>,
    pub absolute_url: Option<String>,
    pub company_name: Option<String>,
    #[serde(default)]
    pub location: Option<GreenhouseLocation>,
    #[serde(default)]
    pub departments: Vec<GreenhouseDepartment>,
    #[serde(default)]
    pub metadata: Vec<GreenhouseMetadata>,
    pub first_published: Option<String>,
}

pub struct GreenhouseAdapter {
    client: reqwest::blocking::Client,
}

impl GreenhouseAdapter {
    pub fn new(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

impl SourceAdapter for GreenhouseAdapter {
    fn fetch_index(&self, slug: &str) -> Result<Vec<SourceJobRef>> {
        let url = format!("{}/{}/jobs", GREENHOUSE_API_BASE, slug);
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .with_context(|| format!("Failed to fetch Greenhouse jobs for '{}'", slug))?;

        if !response.status().is_success() {
            bail!(
                "Greenhouse index request for '{}' failed with status {}",
                slug,
                response.status()
            );
        }

        let index: GreenhouseIndex = response
            .json()
            .context("Failed to parse Greenhouse index response")?;
        Ok(greenhouse_refs(index))
    }

    fn fetch_detail(&self, slug: &str, job: &SourceJobRef) -> Result<SourceDetail> {
        let url = format!("{}/{}/jobs/{}", GREENHOUSE_API_BASE, slug, job.id);
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .with_context(|| format!("Failed to fetch Greenhouse job {}", job.id))?;

        if !response.status().is_success() {
            bail!(
                "Greenhouse detail request for job {} failed with status {}",
                job.id,
                response.status()
            );
        }

        let detail: GreenhouseDetail = response
            .json()
            .context("Failed to parse Greenhouse detail response")?;

        let application_url = detail
            .absolute_url
            .clone()
            .unwrap_or_else(|| job.url.clone());
        let category_hint = detail
            .departments
            .first()
            .and_then(|d| d.name.clone())
            .or_else(|| Some("General".to_string()));

        Ok(SourceDetail {
            platform: Platform::Greenhouse,
            application_url,
            published_at: detail.first_published.clone(),
            category_hint,
            payload: DetailPayload::Structured(detail),
        })
    }
}

fn greenhouse_refs(index: GreenhouseIndex) -> Vec<SourceJobRef> {
    index
        .jobs
        .into_iter()
        .filter_map(|job| {
            Some(SourceJobRef {
                id: job.id?.to_string(),
                url: job.absolute_url?,
                title: job.title?,
                location: job
                    .location
                    .and_then(|l| l.name)
                    .unwrap_or_else(|| "Not specified".to_string()),
            })
        })
        .collect()
}

// --- Lever ---
// Public postings API. Index and detail share one shape; detail content is
// combined into a single text block for extraction.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeverPosting {
    pub id: Option<String>,
    pub text: Option<String>,
    pub hosted_url: Option<String>,
    #[serde(default)]
    pub categories: Option<LeverCategories>,
    pub workplace_type: Option<String>,
    /// Epoch milliseconds.
    pub created_at: Option<i64>,
    pub description_plain: Option<String>,
    #[serde(default)]
    pub lists: Vec<LeverList>,
    pub additional_plain: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LeverCategories {
    pub location: Option<String>,
    pub team: Option<String>,
    pub department: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LeverList {
    pub text: Option<String>,
    pub content: Option<String>,
}

pub struct LeverAdapter {
    client: reqwest::blocking::Client,
}

impl LeverAdapter {
    pub fn new(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

impl SourceAdapter for LeverAdapter {
    fn fetch_index(&self, slug: &str) -> Result<Vec<SourceJobRef>> {
        let url = format!("{}/{}", LEVER_API_BASE, slug);
        let response = self
            .client
            .get(&url)
            .query(&[("mode", "json")])
            .header("Accept", "application/json")
            .send()
            .with_context(|| format!("Failed to fetch Lever jobs for '{}'", slug))?;

        if !response.status().is_success() {
            bail!(
                "Lever index request for '{}' failed with status {}",
                slug,
                response.status()
            );
        }

        let postings: Vec<LeverPosting> = response
            .json()
            .context("Failed to parse Lever index response")?;
        Ok(lever_refs(postings))
    }

    fn fetch_detail(&self, slug: &str, job: &SourceJobRef) -> Result<SourceDetail> {
        let url = format!("{}/{}/{}", LEVER_API_BASE, slug, job.id);
        let response = self
            .client
            .get(&url)
            .query(&[("mode", "json")])
            .send()
            .with_context(|| format!("Failed to fetch Lever job {}", job.id))?;

        if !response.status().is_success() {
            bail!(
                "Lever detail request for job {} failed with status {}",
                job.id,
                response.status()
            );
        }

        let posting: LeverPosting = response
            .json()
            .context("Failed to parse Lever detail response")?;

        let application_url = posting
            .hosted_url
            .clone()
            .unwrap_or_else(|| job.url.clone());
        let published_at = posting.created_at.and_then(|ms| {
            chrono::Utc
                .timestamp_millis_opt(ms)
                .single()
                .map(|dt| dt.to_rfc3339())
        });
        let category_hint = posting
            .categories
            .as_ref()
            .and_then(|c| c.team.clone().or_else(|| c.department.clone()))
            .or_else(|| Some("General".to_string()));

        Ok(SourceDetail {
            platform: Platform::Lever,
            application_url,
            published_at,
            category_hint,
            payload: DetailPayload::Text(lever_payload_text(&posting)),
        })
    }
}

fn lever_refs(postings: Vec<LeverPosting>) -> Vec<SourceJobRef> {
    postings
        .into_iter()
        .filter_map(|posting| {
            let location = posting
                .categories
                .as_ref()
                .and_then(|c| c.location.clone())
                .or_else(|| posting.workplace_type.clone())
                .unwrap_or_else(|| "Not specified".to_string());
            Some(SourceJobRef {
                id: posting.id?,
                url: posting.hosted_url?,
                title: posting.text?,
                location,
            })
        })
        .collect()
}

/// Flatten every text section of a Lever posting into one block so the
/// extraction service sees all job details consistently.
fn combine_lever_content(posting: &LeverPosting) -> Result<String> {
    let mut full = String::new();

    if let Some(description) = &posting.description_plain {
        full.push_str(description);
        full.push_str("\n\n");
    }

    let tag_re = regex::Regex::new(r"<[^>]+>")?;
    for list in &posting.lists {
        if let Some(text) = &list.text {
            full.push_str("## ");
            full.push_str(text);
            full.push('\n');
        }
        if let Some(content) = &list.content {
            let plain = content.replace("<li>", "- ").replace("</li>", "\n");
            full.push_str(&tag_re.replace_all(&plain, ""));
            full.push_str("\n\n");
        }
    }

    if let Some(additional) = &posting.additional_plain {
        full.push_str(additional);
        full.push_str("\n\n");
    }

    Ok(full.trim().to_string())
}

fn lever_payload_text(posting: &LeverPosting) -> String {
    let combined = combine_lever_content(posting).unwrap_or_default();
    let location = posting
        .categories
        .as_ref()
        .and_then(|c| c.location.clone())
        .or_else(|| posting.workplace_type.clone())
        .unwrap_or_else(|| "Not specified".to_string());
    format!(
        "JOB CONTENT (all sections combined):\n{}\n\nMETADATA:\n- Title: {}\n- Location: {}\n- URL: {}\n",
        combined,
        posting.text.as_deref().unwrap_or(""),
        location,
        posting.hosted_url.as_deref().unwrap_or(""),
    )
}

// --- Ashby ---
// GraphQL index; detail is the hosted job page HTML, left to generative
// extraction downstream.

#[derive(Debug, Deserialize)]
struct AshbyGraphqlResponse {
    data: Option<AshbyData>,
}

#[derive(Debug, Deserialize)]
struct AshbyData {
    #[serde(rename = "jobBoard")]
    job_board: Option<AshbyJobBoard>,
}

#[derive(Debug, Deserialize)]
struct AshbyJobBoard {
    #[serde(rename = "jobPostings", default)]
    job_postings: Vec<AshbyJobPosting>,
}

#[derive(Debug, Deserialize)]
struct AshbyJobPosting {
    id: Option<String>,
    title: Option<String>,
}

pub struct AshbyAdapter {
    client: reqwest::blocking::Client,
}

impl AshbyAdapter {
    pub fn new(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

impl SourceAdapter for AshbyAdapter {
    fn fetch_index(&self, slug: &str) -> Result<Vec<SourceJobRef>> {
        let body = json!({
            "operationName": "ApiJobBoardWithTeams",
            "variables": { "organizationHostedJobsPageName": slug },
            "query": "query ApiJobBoardWithTeams($organizationHostedJobsPageName: String!) {\n\
                jobBoard: jobBoardWithTeams(\n\
                    organizationHostedJobsPageName: $organizationHostedJobsPageName\n\
                ) {\n\
                    jobPostings {\n\
                        id\n\
                        title\n\
                    }\n\
                }\n\
            }"
        });

        let response = self
            .client
            .post(ASHBY_GRAPHQL_URL)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .with_context(|| format!("Failed to fetch Ashby jobs for '{}'", slug))?;

        if !response.status().is_success() {
            bail!(
                "Ashby index request for '{}' failed with status {}",
                slug,
                response.status()
            );
        }

        let parsed: AshbyGraphqlResponse = response
            .json()
            .context("Failed to parse Ashby index response")?;
        ashby_refs(slug, parsed)
    }

    fn fetch_detail(&self, _slug: &str, job: &SourceJobRef) -> Result<SourceDetail> {
        let response = self
            .client
            .get(&job.url)
            .header("User-Agent", BROWSER_USER_AGENT)
            .send()
            .with_context(|| format!("Failed to fetch Ashby job page {}", job.url))?;

        if !response.status().is_success() {
            bail!(
                "Ashby job page {} returned status {}",
                job.url,
                response.status()
            );
        }

        let html = response.text().context("Failed to read Ashby job page")?;

        Ok(SourceDetail {
            platform: Platform::Ashby,
            application_url: job.url.clone(),
            published_at: None,
            category_hint: None,
            payload: DetailPayload::Html(html),
        })
    }
}

fn ashby_refs(slug: &str, response: AshbyGraphqlResponse) -> Result<Vec<SourceJobRef>> {
    let postings = response
        .data
        .and_then(|d| d.job_board)
        .map(|b| b.job_postings)
        .ok_or_else(|| anyhow!("Unexpected Ashby API response structure"))?;

    Ok(postings
        .into_iter()
        .filter_map(|posting| {
            let id = posting.id?;
            let title = posting.title?;
            Some(SourceJobRef {
                url: format!("{}/{}/{}", ASHBY_JOBS_BASE, slug, id),
                id,
                title,
                location: "Not specified".to_string(),
            })
        })
        .collect())
}

// --- Generic careers page ---
// Fallback for accounts with no supported ATS; the operator assigns
// `platform = webpage` and the slug is the careers-page URL itself. The
// index is whatever links the extraction service finds on the page.

pub struct WebpageAdapter<'a> {
    client: reqwest::blocking::Client,
    extractor: &'a dyn Extractor,
}

impl<'a> WebpageAdapter<'a> {
    pub fn new(client: reqwest::blocking::Client, extractor: &'a dyn Extractor) -> Self {
        Self { client, extractor }
    }
}

impl SourceAdapter for WebpageAdapter<'_> {
    fn fetch_index(&self, slug: &str) -> Result<Vec<SourceJobRef>> {
        let response = self
            .client
            .get(slug)
            .header("User-Agent", BROWSER_USER_AGENT)
            .send()
            .with_context(|| format!("Failed to fetch careers page {}", slug))?;

        if !response.status().is_success() {
            bail!("Careers page {} returned status {}", slug, response.status());
        }

        let html = response.text().context("Failed to read careers page")?;
        let links = self.extractor.extract_links(&strip_noise(&html))?;

        let base = reqwest::Url::parse(slug)
            .with_context(|| format!("Invalid careers page URL {}", slug))?;

        let mut refs = Vec::new();
        for (category, link) in links {
            // Tolerate relative links in the extracted set
            let Ok(resolved) = base.join(&link) else {
                continue;
            };
            let url = resolved.to_string();
            refs.push(SourceJobRef {
                id: url.clone(),
                title: url.clone(),
                url,
                location: category,
            });
        }
        Ok(refs)
    }

    fn fetch_detail(&self, _slug: &str, job: &SourceJobRef) -> Result<SourceDetail> {
        let response = self
            .client
            .get(&job.url)
            .header("User-Agent", BROWSER_USER_AGENT)
            .send()
            .with_context(|| format!("Failed to fetch job page {}", job.url))?;

        if !response.status().is_success() {
            bail!("Job page {} returned status {}", job.url, response.status());
        }

        let html = response.text().context("Failed to read job page")?;

        Ok(SourceDetail {
            platform: Platform::Webpage,
            application_url: job.url.clone(),
            published_at: None,
            category_hint: None,
            payload: DetailPayload::Html(html),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greenhouse_refs_from_index_payload() {
        let payload = r#"{
            "jobs": [
                {
                    "id": 4011,
                    "absolute_url": "https://boards.greenhouse.io/acme/jobs/4011",
                    "title": "Site Reliability Engineer",
                    "location": { "name": "New York, NY" },
                    "updated_at": "2025-05-01T00:00:00-04:00"
                },
                {
                    "id": 4012,
                    "absolute_url": "https://boards.greenhouse.io/acme/jobs/4012",
                    "title": "Recruiter"
                }
            ],
            "meta": { "total": 2 }
        }"#;

        let index: GreenhouseIndex = serde_json::from_str(payload).unwrap();
        let refs = greenhouse_refs(index);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].id, "4011");
        assert_eq!(refs[0].location, "New York, NY");
        assert_eq!(refs[1].location, "Not specified");
    }

    #[test]
    fn test_greenhouse_refs_skip_entries_missing_required_fields() {
        let payload = r#"{
            "jobs": [
                { "id": 1, "title": "No URL here" },
                { "id": 2, "absolute_url": "https://boards.greenhouse.io/acme/jobs/2", "title": "Ok" }
            ]
        }"#;

        let index: GreenhouseIndex = serde_json::from_str(payload).unwrap();
        let refs = greenhouse_refs(index);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].id, "2");
    }

    #[test]
    fn test_lever_refs_prefer_category_location() {
        let payload = r#"[
            {
                "id": "abc-123",
                "text": "Backend Engineer",
                "hostedUrl": "https://jobs.lever.co/acme/abc-123",
                "categories": { "location": "Paris, France", "team": "Platform" },
                "workplaceType": "hybrid"
            },
            {
                "id": "def-456",
                "text": "Designer",
                "hostedUrl": "https://jobs.lever.co/acme/def-456",
                "workplaceType": "remote"
            }
        ]"#;

        let postings: Vec<LeverPosting> = serde_json::from_str(payload).unwrap();
        let refs = lever_refs(postings);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].location, "Paris, France");
        assert_eq!(refs[1].location, "remote");
    }

    #[test]
    fn test_combine_lever_content_flattens_lists() {
        let payload = r#"{
            "id": "abc",
            "text": "Backend Engineer",
            "hostedUrl": "https://jobs.lever.co/acme/abc",
            "descriptionPlain": "We build infrastructure.",
            "lists": [
                {
                    "text": "What you'll do",
                    "content": "<li>Ship code</li><li>Review <b>PRs</b></li>"
                }
            ],
            "additionalPlain": "Great benefits."
        }"#;

        let posting: LeverPosting = serde_json::from_str(payload).unwrap();
        let combined = combine_lever_content(&posting).unwrap();
        assert!(combined.starts_with("We build infrastructure."));
        assert!(combined.contains("## What you'll do"));
        assert!(combined.contains("- Ship code"));
        assert!(combined.contains("- Review PRs"));
        assert!(!combined.contains("<li>"));
        assert!(combined.ends_with("Great benefits."));
    }

    #[test]
    fn test_lever_payload_text_carries_metadata() {
        let payload = r#"{
            "id": "abc",
            "text": "Backend Engineer",
            "hostedUrl": "https://jobs.lever.co/acme/abc",
            "categories": { "location": "Remote - Europe" },
            "descriptionPlain": "Body."
        }"#;

        let posting: LeverPosting = serde_json::from_str(payload).unwrap();
        let text = lever_payload_text(&posting);
        assert!(text.contains("- Title: Backend Engineer"));
        assert!(text.contains("- Location: Remote - Europe"));
        assert!(text.contains("- URL: https://jobs.lever.co/acme/abc"));
    }

    #[test]
    fn test_ashby_refs_construct_hosted_urls() {
        let payload = r#"{
            "data": {
                "jobBoard": {
                    "jobPostings": [
                        { "id": "11111111-2222", "title": "ML Engineer" },
                        { "id": "33333333-4444", "title": "Account Executive" }
                    ]
                }
            }
        }"#;

        let parsed: AshbyGraphqlResponse = serde_json::from_str(payload).unwrap();
        let refs = ashby_refs("acme", parsed).unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].url, "https://jobs.ashbyhq.com/acme/11111111-2222");
        assert_eq!(refs[1].title, "Account Executive");
    }

    #[test]
    fn test_ashby_refs_reject_unexpected_structure() {
        let parsed: AshbyGraphqlResponse =
            serde_json::from_str(r#"{ "data": null }"#).unwrap();
        assert!(ashby_refs("acme", parsed).is_err());
    }

    #[test]
    #[ignore] // requires network
    fn test_fetch_greenhouse_index_live() {
        let client = http_client().unwrap();
        let adapter = GreenhouseAdapter::new(client);
        let refs = adapter.fetch_index("gleanwork").unwrap();
        assert!(!refs.is_empty());
    }
}
