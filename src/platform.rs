use regex::Regex;
use serde::{Deserialize, Serialize};

/// Which applicant-tracking system serves an account's listings.
///
/// `Webpage` is never produced by detection; it is assigned by an operator
/// for careers pages with no supported ATS, and routes the account through
/// the generic page adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Greenhouse,
    Lever,
    Ashby,
    Webpage,
    Unknown,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Greenhouse => "greenhouse",
            Platform::Lever => "lever",
            Platform::Ashby => "ashby",
            Platform::Webpage => "webpage",
            Platform::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Platform {
        match s {
            "greenhouse" => Platform::Greenhouse,
            "lever" => Platform::Lever,
            "ashby" => Platform::Ashby,
            "webpage" => Platform::Webpage,
            _ => Platform::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Detection {
    pub platform: Platform,
    pub slug: Option<String>,
}

/// Classify a careers-page URL by its shape. Ordered first-match scan over
/// the supported ATS hosts; anything else is `Unknown`. Pure - no network,
/// no errors, malformed input simply fails to match.
pub fn detect(url: &str) -> Detection {
    let lower = url.to_lowercase();

    let (platform, host) = if lower.contains("greenhouse.io") {
        (Platform::Greenhouse, "greenhouse.io")
    } else if lower.contains("lever.co") {
        (Platform::Lever, "lever.co")
    } else if lower.contains("ashbyhq.com") {
        (Platform::Ashby, "ashbyhq.com")
    } else {
        return Detection {
            platform: Platform::Unknown,
            slug: None,
        };
    };

    Detection {
        platform,
        slug: extract_slug(url, host),
    }
}

/// The first path segment after the ATS host, e.g.
/// `https://boards.greenhouse.io/gleanwork` -> `gleanwork`. Trailing
/// slashes, query strings and fragments are tolerated.
fn extract_slug(url: &str, host: &str) -> Option<String> {
    let pattern = format!(r"(?i){}/([^/?#]+)", regex::escape(host));
    let re = Regex::new(&pattern).ok()?;
    re.captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
