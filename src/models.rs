use serde::{Deserialize, Serialize};

use crate::platform::Platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: i64,
    pub name: String,
    pub website: Option<String>,
    pub job_website: String,
    pub logo: Option<String>,
    pub platform: Platform,
    pub last_synced_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One entry of an upstream listing index. Held only for the duration of a
/// reconciliation pass; never persisted.
#[derive(Debug, Clone)]
pub struct SourceJobRef {
    pub id: String,
    pub url: String,
    pub title: String,
    pub location: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionType {
    #[serde(rename = "Full-Time")]
    FullTime,
    #[serde(rename = "Part-Time")]
    PartTime,
    #[serde(rename = "Contract")]
    Contract,
}

impl PositionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionType::FullTime => "Full-Time",
            PositionType::PartTime => "Part-Time",
            PositionType::Contract => "Contract",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Full-Time" => Some(PositionType::FullTime),
            "Part-Time" => Some(PositionType::PartTime),
            "Contract" => Some(PositionType::Contract),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationType {
    #[serde(rename = "Remote")]
    Remote,
    #[serde(rename = "On Site")]
    OnSite,
    #[serde(rename = "Hybrid")]
    Hybrid,
}

impl LocationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationType::Remote => "Remote",
            LocationType::OnSite => "On Site",
            LocationType::Hybrid => "Hybrid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Remote" => Some(LocationType::Remote),
            "On Site" => Some(LocationType::OnSite),
            "Hybrid" => Some(LocationType::Hybrid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplicationMethod {
    #[serde(rename = "Apply by website")]
    Website,
    #[serde(rename = "Apply by email")]
    Email,
}

impl ApplicationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationMethod::Website => "Apply by website",
            ApplicationMethod::Email => "Apply by email",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Apply by website" => Some(ApplicationMethod::Website),
            "Apply by email" => Some(ApplicationMethod::Email),
            _ => None,
        }
    }
}

/// The canonical listing as stored. `(company_id, application_url)` is the
/// reconciliation key; removal is soft (deprecated + deprecated_at).
#[derive(Debug, Clone)]
pub struct Job {
    pub id: i64,
    pub company_id: i64,
    pub company: String,
    pub company_logo: Option<String>,
    pub title: String,
    pub primary_role: String,
    pub position_type: PositionType,
    pub location_type: LocationType,
    pub country: String,
    pub locations: String,
    pub description: String,
    pub keywords: Option<String>,
    pub currency: String,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub equity_min: Option<f64>,
    pub equity_max: Option<f64>,
    pub crypto_payment: bool,
    pub application_method: ApplicationMethod,
    pub application_url: Option<String>,
    pub application_email: Option<String>,
    pub platform: Platform,
    pub published: bool,
    pub payment_status: String,
    pub published_at: Option<String>,
    pub expires_at: Option<String>,
    pub deprecated: bool,
    pub deprecated_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// The shape the extraction service must return, and what the structured
/// mapping path assembles. Field names match the extraction response wire
/// format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDraft {
    pub company: String,
    #[serde(default)]
    pub company_logo: Option<String>,
    pub title: String,
    pub primary_role: String,
    pub position_type: PositionType,
    pub location_type: LocationType,
    pub country: String,
    pub locations: String,
    pub description: String,
    #[serde(default)]
    pub keywords: Option<String>,
    pub currency: String,
    #[serde(default)]
    pub salary_min: Option<i64>,
    #[serde(default)]
    pub salary_max: Option<i64>,
    #[serde(default)]
    pub equity_min: Option<f64>,
    #[serde(default)]
    pub equity_max: Option<f64>,
    pub crypto_payment: bool,
    pub application_method: ApplicationMethod,
    pub application_url: String,
}

/// A fully normalized listing ready to be persisted.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub company_id: i64,
    pub company: String,
    pub company_logo: Option<String>,
    pub title: String,
    pub primary_role: String,
    pub position_type: PositionType,
    pub location_type: LocationType,
    pub country: String,
    pub locations: String,
    pub description: String,
    pub keywords: Option<String>,
    pub currency: String,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub equity_min: Option<f64>,
    pub equity_max: Option<f64>,
    pub crypto_payment: bool,
    pub application_method: ApplicationMethod,
    pub application_url: Option<String>,
    pub platform: Platform,
    pub published: bool,
    pub payment_status: String,
    pub published_at: Option<String>,
    pub expires_at: Option<String>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CompanyStats {
    pub added: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub errors: usize,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RunStats {
    pub companies: usize,
    pub skipped: usize,
    pub added: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub errors: usize,
}
