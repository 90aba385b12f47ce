use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use crate::models::JobDraft;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

// gpt-4o-mini pricing, dollars per million tokens
const INPUT_COST_PER_MTOK: f64 = 0.150;
const OUTPUT_COST_PER_MTOK: f64 = 0.600;

/// Everything the extraction client needs, built once at startup and passed
/// by reference. No ambient global client.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl ExtractorConfig {
    pub fn from_env(model: Option<&str>) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY").context(
            "OPENAI_API_KEY environment variable not set. Set it with: export OPENAI_API_KEY=your-key-here",
        )?;
        Ok(Self {
            api_key,
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
            timeout: Duration::from_secs(60),
        })
    }
}

/// Generative text-extraction service. `extract_job` turns one raw source
/// payload into a canonical listing draft; `extract_links` pulls job URLs
/// out of a careers page for the generic adapter. Both fail closed: a
/// transport error or a response that does not deserialize is a failure,
/// never a partial record.
pub trait Extractor {
    fn extract_job(&self, payload: &str, company: &str, category: &str) -> Result<JobDraft>;
    fn extract_links(&self, html: &str) -> Result<Vec<(String, String)>>;
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    response_format: Value,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug)]
pub struct OpenAiExtractor {
    config: ExtractorConfig,
    client: reqwest::blocking::Client,
}

impl OpenAiExtractor {
    pub fn new(config: ExtractorConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build extraction HTTP client")?;
        Ok(Self { config, client })
    }

    fn complete(
        &self,
        system: &str,
        prompt: &str,
        response_format: Value,
        temperature: f32,
    ) -> Result<String> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            response_format,
            temperature,
        };

        let response = self
            .client
            .post(OPENAI_API_URL)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .context("Failed to send request to extraction service")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "Extraction request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: ChatResponse = response
            .json()
            .context("Failed to parse extraction service response")?;

        if let Some(usage) = &api_response.usage {
            let cost = usage.prompt_tokens as f64 * INPUT_COST_PER_MTOK / 1_000_000.0
                + usage.completion_tokens as f64 * OUTPUT_COST_PER_MTOK / 1_000_000.0;
            eprintln!(
                "      extraction: {} in + {} out tokens = ${:.4}",
                usage.prompt_tokens, usage.completion_tokens, cost
            );
        }

        api_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("No choices in extraction service response"))
    }
}

impl Extractor for OpenAiExtractor {
    fn extract_job(&self, payload: &str, company: &str, category: &str) -> Result<JobDraft> {
        let system = "You are a job posting analyzer. Extract job details and return only \
             valid JSON matching the specified schema. Make educated guesses for missing \
             fields based on context. Ensure all required fields have values.";

        let prompt = format!(
            "Please analyze this job posting content and extract information to fill the \
             job schema enforced by the response format.\n\n\
             IMPORTANT:\n\
             - Use the EXACT original job description text for the description field\n\
             - Add appropriate markdown formatting for the description:\n\
               * Use ## for main section headers (e.g., \"## About Us\", \"## Responsibilities\")\n\
               * Use bullet points (- or *) for lists\n\
               * Use **bold** for emphasis on important terms\n\
               * Add line breaks between sections for readability\n\
               * Do not summarize or remove any content\n\
             - If currency is not specified, use \"USD\"\n\
             - If cryptoPayment is not specified, use false\n\
             - If applicationMethod is not clear, use \"Apply by website\"\n\
             - For the locations field: if Remote, use \"Remote\" or \"Remote - [Country]\"\n\
             - Extract the title from the \"title\" or \"text\" field in the data\n\n\
             FULL JOB DATA:\n{payload}\n\n\
             Company name: {company}\n\
             Role category: {category}\n",
        );

        let content = self.complete(system, &prompt, job_schema(), 0.7)?;

        // Deserializing into the draft is the schema check; anything that
        // does not conform is a failure for this item, not a partial record.
        serde_json::from_str(&content).context("Extraction response failed schema validation")
    }

    fn extract_links(&self, html: &str) -> Result<Vec<(String, String)>> {
        let system = "You are a job link extraction specialist. Return only a valid JSON \
             object mapping category names to arrays of job posting URLs.";

        let prompt = format!(
            "Analyze this careers/jobs page HTML and return a JSON object where:\n\
             - Keys are job categories found on the page (e.g., \"Engineering\", \"Marketing\")\n\
             - Values are arrays of job posting URLs that belong to each category\n\n\
             IMPORTANT INSTRUCTIONS:\n\
             1. Identify all job categories present on the page\n\
             2. Group job links under their appropriate categories\n\
             3. Include both relative and absolute URLs\n\
             4. Ensure no job links are skipped\n\
             5. If no clear categories exist, use \"All Positions\" as the category\n\
             6. Return ONLY the JSON object, no additional text\n\n\
             HTML Content:\n{html}\n",
        );

        let content = self.complete(system, &prompt, json!({"type": "json_object"}), 0.0)?;

        let categorized: BTreeMap<String, Vec<String>> = serde_json::from_str(&content)
            .context("Link extraction response failed schema validation")?;

        let mut links = Vec::new();
        for (category, urls) in categorized {
            for url in urls {
                links.push((category.clone(), url));
            }
        }
        Ok(links)
    }
}

/// Response format constraining the extraction output to the canonical
/// draft schema. Strict mode requires every property to be listed as
/// required, with optional fields made nullable.
fn job_schema() -> Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": "job_posting",
            "strict": true,
            "schema": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "company": { "type": "string" },
                    "companyLogo": { "type": ["string", "null"] },
                    "title": { "type": "string" },
                    "primaryRole": { "type": "string" },
                    "positionType": {
                        "type": "string",
                        "enum": ["Full-Time", "Part-Time", "Contract"]
                    },
                    "locationType": {
                        "type": "string",
                        "enum": ["Remote", "On Site", "Hybrid"]
                    },
                    "country": { "type": "string" },
                    "locations": { "type": "string" },
                    "description": { "type": "string" },
                    "keywords": { "type": ["string", "null"] },
                    "currency": { "type": "string" },
                    "salaryMin": { "type": ["integer", "null"] },
                    "salaryMax": { "type": ["integer", "null"] },
                    "equityMin": { "type": ["number", "null"] },
                    "equityMax": { "type": ["number", "null"] },
                    "cryptoPayment": { "type": "boolean" },
                    "applicationMethod": {
                        "type": "string",
                        "enum": ["Apply by website", "Apply by email"]
                    },
                    "applicationUrl": { "type": "string" }
                },
                "required": [
                    "company", "companyLogo", "title", "primaryRole", "positionType",
                    "locationType", "country", "locations", "description", "keywords",
                    "currency", "salaryMin", "salaryMax", "equityMin", "equityMax",
                    "cryptoPayment", "applicationMethod", "applicationUrl"
                ]
            }
        }
    })
}
