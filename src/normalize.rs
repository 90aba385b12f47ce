use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use regex::Regex;
use scraper::Html;

use crate::adapters::{DetailPayload, GreenhouseDetail, SourceDetail};
use crate::extract::Extractor;
use crate::models::{
    ApplicationMethod, Company, JobDraft, LocationType, NewJob, PositionType,
};

const LISTING_TTL_DAYS: i64 = 30;

/// Convert one source detail into a persistable listing. Structured payloads
/// are mapped by fixed rules; text and HTML payloads go through the
/// extraction service and fail closed on any validation error. Either way,
/// fields already known internally (account name, category, application URL,
/// publication time) override whatever the source text or the extraction
/// service produced, and synchronized listings are stamped live: these are
/// pre-vetted employer accounts, not self-serve submissions awaiting
/// payment.
pub fn normalize(
    company: &Company,
    detail: &SourceDetail,
    extractor: &dyn Extractor,
) -> Result<NewJob> {
    let category = detail.category_hint.as_deref().unwrap_or("General");

    let draft = match &detail.payload {
        DetailPayload::Structured(gh) => greenhouse_draft(gh)?,
        DetailPayload::Text(text) => extractor
            .extract_job(text, &company.name, category)
            .context("Extraction failed for text payload")?,
        DetailPayload::Html(html) => extractor
            .extract_job(&strip_noise(html), &company.name, category)
            .context("Extraction failed for HTML payload")?,
    };

    let now = Utc::now();
    let published_at = detail
        .published_at
        .clone()
        .unwrap_or_else(|| now.to_rfc3339());

    Ok(NewJob {
        company_id: company.id,
        // Exact account name from the store, never the parsed one
        company: company.name.clone(),
        company_logo: company
            .logo
            .clone()
            .filter(|logo| !logo.is_empty())
            .or(draft.company_logo),
        title: draft.title,
        primary_role: detail
            .category_hint
            .clone()
            .unwrap_or(draft.primary_role),
        position_type: draft.position_type,
        location_type: draft.location_type,
        country: draft.country,
        locations: draft.locations,
        description: draft.description,
        keywords: draft.keywords,
        currency: draft.currency,
        salary_min: draft.salary_min,
        salary_max: draft.salary_max,
        equity_min: draft.equity_min,
        equity_max: draft.equity_max,
        crypto_payment: draft.crypto_payment,
        application_method: draft.application_method,
        application_url: Some(detail.application_url.clone()),
        platform: detail.platform,
        published: true,
        payment_status: "paid".to_string(),
        published_at: Some(published_at),
        expires_at: Some((now + Duration::days(LISTING_TTL_DAYS)).to_rfc3339()),
    })
}

/// Direct field mapping for the structured Greenhouse payload; no
/// generative call involved.
fn greenhouse_draft(detail: &GreenhouseDetail) -> Result<JobDraft> {
    let title = detail
        .title
        .clone()
        .context("Greenhouse detail missing title")?;
    let application_url = detail
        .absolute_url
        .clone()
        .context("Greenhouse detail missing application URL")?;

    let content = detail.content.clone().unwrap_or_default();
    let description = decode_entities(&content);
    let plain_text = html_to_text(&description);
    let (salary_min, salary_max) = extract_salary_range(&content);

    let location = detail.location.as_ref().and_then(|l| l.name.clone());
    let location_type = detail
        .metadata
        .iter()
        .find(|m| m.name.as_deref() == Some("Location Type"))
        .and_then(|m| m.value.as_ref())
        .and_then(|v| v.as_str())
        .and_then(LocationType::parse)
        .unwrap_or(LocationType::OnSite);

    Ok(JobDraft {
        company: detail.company_name.clone().unwrap_or_default(),
        company_logo: None,
        title,
        primary_role: detail
            .departments
            .first()
            .and_then(|d| d.name.clone())
            .unwrap_or_else(|| "General".to_string()),
        // Greenhouse does not always specify
        position_type: PositionType::FullTime,
        location_type,
        country: extract_country(location.as_deref()),
        locations: location.unwrap_or_else(|| "Remote".to_string()),
        description,
        keywords: extract_keywords(&plain_text),
        currency: "USD".to_string(),
        salary_min,
        salary_max,
        equity_min: None,
        equity_max: None,
        crypto_payment: false,
        application_method: ApplicationMethod::Website,
        application_url,
    })
}

/// Best-effort country from a free-text location string. Unparseable input
/// falls back to USA; this is a bounded heuristic, not a geocoder.
pub fn extract_country(location: Option<&str>) -> String {
    let Some(location) = location else {
        return "USA".to_string();
    };

    let parts: Vec<&str> = location.split(',').map(|s| s.trim()).collect();

    if parts.len() == 1 {
        return if location.to_lowercase().contains("remote") {
            "Remote".to_string()
        } else {
            "USA".to_string()
        };
    }

    // Last segment is usually the country or state
    let last = parts[parts.len() - 1];
    match last {
        "US" => "USA",
        "UK" => "United Kingdom",
        "CA" => "Canada",
        "IE" => "Ireland",
        "DE" => "Germany",
        "FR" => "France",
        other => other,
    }
    .to_string()
}

/// Best-effort "$N - $M" range from free text. Both bounds None when the
/// pattern is absent; no attempt to validate that the numbers are salaries.
pub fn extract_salary_range(text: &str) -> (Option<i64>, Option<i64>) {
    let Ok(re) = Regex::new(r"\$?([\d,]+)\s*-\s*\$?([\d,]+)") else {
        return (None, None);
    };
    let Some(caps) = re.captures(text) else {
        return (None, None);
    };

    let parse = |idx: usize| {
        caps.get(idx)
            .and_then(|m| m.as_str().replace(',', "").parse::<i64>().ok())
    };
    (parse(1), parse(2))
}

const TECH_KEYWORDS: [&str; 20] = [
    "React",
    "Python",
    "JavaScript",
    "TypeScript",
    "Node.js",
    "AWS",
    "Docker",
    "Kubernetes",
    "Machine Learning",
    "AI",
    "TensorFlow",
    "PyTorch",
    "SQL",
    "MongoDB",
    "PostgreSQL",
    "Git",
    "CI/CD",
    "API",
    "REST",
    "GraphQL",
];

/// Fixed technology-term scan over the plain-text description.
pub fn extract_keywords(text: &str) -> Option<String> {
    let found: Vec<&str> = TECH_KEYWORDS
        .iter()
        .filter(|keyword| text.contains(*keyword))
        .copied()
        .collect();

    if found.is_empty() {
        None
    } else {
        Some(found.join(", "))
    }
}

/// Greenhouse ships descriptions with their HTML escaped once over.
pub fn decode_entities(html: &str) -> String {
    html.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    document
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

/// Drop script and style blocks before handing a page to the extraction
/// service; they carry no listing content.
pub fn strip_noise(html: &str) -> String {
    let mut cleaned = html.to_string();
    for pattern in [
        r"(?is)<script\b[^>]*>.*?</script>",
        r"(?is)<style\b[^>]*>.*?</style>",
    ] {
        if let Ok(re) = Regex::new(pattern) {
            cleaned = re.replace_all(&cleaned, "").into_owned();
        }
    }
    cleaned
}
