// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use reqwest::StatusCode;
use reqwest::blocking::Client as HttpClient;
use serde::Deserialize;
use snapbridge_app::{Document, Plan, PlanData, PlanId, ServiceType, ServiceTypeId};
use std::fmt;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.planningcenteronline.com/services/v2";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_PLAN_COUNT: u32 = 5;

const USER_AGENT: &str = concat!("snapbridge/", env!("CARGO_PKG_VERSION"));
const SERVICE_TYPES_PAGE: &str = "200";
const ITEMS_PAGE: &str = "100";
const PLAN_TIMES_PAGE: &str = "50";

/// Personal access token pair for the planning API.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    app_id: String,
    secret: String,
}

impl Credentials {
    pub fn new(app_id: &str, secret: &str) -> Result<Self> {
        let app_id = app_id.trim();
        let secret = secret.trim();
        if app_id.is_empty() || secret.is_empty() {
            bail!(
                "enter the PCO app id and secret first; set [pco].app_id/secret or SNAPBRIDGE_PCO_APP_ID/SNAPBRIDGE_PCO_SECRET"
            );
        }
        Ok(Self {
            app_id: app_id.to_owned(),
            secret: secret.to_owned(),
        })
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("app_id", &self.app_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Client {
    base_url: String,
    credentials: Credentials,
    timeout: Duration,
    http: HttpClient,
}

impl Client {
    pub fn new(base_url: &str, credentials: Credentials, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_owned();
        if base_url.is_empty() {
            bail!("pco.base_url must not be empty");
        }
        let parsed = url::Url::parse(&base_url)
            .with_context(|| format!("pco.base_url {base_url:?} is not a valid URL"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("pco.base_url must use http or https, got {base_url:?}");
        }

        let http = HttpClient::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("build HTTP client")?;

        Ok(Self {
            base_url,
            credentials,
            timeout,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Cheapest authenticated request; fails when the credentials are rejected.
    pub fn ping(&self) -> Result<()> {
        self.get_document("/service_types", &[("per_page", "1")])
            .context("connect to PCO")?;
        Ok(())
    }

    pub fn service_types(&self) -> Result<Vec<ServiceType>> {
        let document = self
            .get_document(
                "/service_types",
                &[("per_page", SERVICE_TYPES_PAGE), ("order", "name")],
            )
            .context("fetch service types")?;
        Ok(ServiceType::list_from_document(&document))
    }

    pub fn future_plans(&self, service_type: &ServiceTypeId, count: u32) -> Result<Vec<Plan>> {
        let per_page = count.to_string();
        let document = self
            .get_document(
                &format!("/service_types/{service_type}/plans"),
                &[
                    ("filter", "future"),
                    ("order", "sort_date"),
                    ("per_page", per_page.as_str()),
                ],
            )
            .with_context(|| format!("fetch plans for service type {service_type}"))?;
        Ok(Plan::list_from_document(&document))
    }

    /// Items (with their item-times) and plan-times for one plan.
    pub fn plan_data(&self, service_type: &ServiceTypeId, plan: &PlanId) -> Result<PlanData> {
        let base = format!("/service_types/{service_type}/plans/{plan}");
        let items = self
            .get_document(
                &format!("{base}/items"),
                &[("per_page", ITEMS_PAGE), ("include", "item_times")],
            )
            .with_context(|| format!("fetch items for plan {plan}"))?;
        if items.data.is_none() {
            bail!("no items returned for plan {plan}");
        }
        let times = self
            .get_document(
                &format!("{base}/plan_times"),
                &[("per_page", PLAN_TIMES_PAGE)],
            )
            .with_context(|| format!("fetch plan times for plan {plan}"))?;
        PlanData::from_documents(&items, &times)
    }

    fn get_document(&self, path: &str, query: &[(&str, &str)]) -> Result<Document> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "GET");
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.credentials.app_id, Some(&self.credentials.secret))
            .query(query)
            .send()
            .map_err(|error| connection_error(&self.base_url, error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(clean_error_response(status, &body));
        }

        response.json().context("decode JSON:API document")
    }
}

fn connection_error(base_url: &str, error: reqwest::Error) -> anyhow::Error {
    anyhow!(
        "cannot reach {} -- check the network connection and [pco].base_url ({})",
        base_url,
        error
    )
}

fn clean_error_response(status: StatusCode, body: &str) -> anyhow::Error {
    let hint = if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        " -- check the PCO app id and secret"
    } else {
        ""
    };

    if let Ok(parsed) = serde_json::from_str::<ErrorEnvelope>(body)
        && let Some(error) = parsed.errors.into_iter().next()
    {
        let message = match (error.title, error.detail) {
            (Some(title), Some(detail)) if !detail.is_empty() => format!("{title}: {detail}"),
            (Some(title), _) => title,
            (None, Some(detail)) => detail,
            (None, None) => String::new(),
        };
        if !message.is_empty() {
            return anyhow!("server error ({}): {message}{hint}", status.as_u16());
        }
    }

    if !body.is_empty() && body.len() < 100 && !body.contains('{') {
        return anyhow!("server error ({}): {}{hint}", status.as_u16(), body.trim());
    }

    anyhow!("server returned {}{hint}", status.as_u16())
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    title: Option<String>,
    detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::{Client, Credentials, DEFAULT_TIMEOUT, clean_error_response};
    use reqwest::StatusCode;

    #[test]
    fn credentials_require_both_values() {
        let error = Credentials::new("app", "  ").expect_err("blank secret should fail");
        assert!(error.to_string().contains("app id and secret"));
        assert!(Credentials::new("", "secret").is_err());
    }

    #[test]
    fn credentials_debug_redacts_secret() {
        let credentials = Credentials::new("app", "hunter2").expect("valid credentials");
        let rendered = format!("{credentials:?}");
        assert!(rendered.contains("app"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn client_rejects_non_http_base_url() {
        let credentials = Credentials::new("app", "secret").expect("valid credentials");
        let error = Client::new("ftp://example.com", credentials.clone(), DEFAULT_TIMEOUT)
            .expect_err("ftp should fail");
        assert!(error.to_string().contains("http or https"));

        let client = Client::new("https://example.com/services/v2//", credentials, DEFAULT_TIMEOUT)
            .expect("https base url");
        assert_eq!(client.base_url(), "https://example.com/services/v2");
    }

    #[test]
    fn json_api_errors_are_flattened() {
        let body = r#"{"errors":[{"status":"401","title":"Unauthorized","detail":"bad token"}]}"#;
        let message = clean_error_response(StatusCode::UNAUTHORIZED, body).to_string();
        assert_eq!(
            message,
            "server error (401): Unauthorized: bad token -- check the PCO app id and secret"
        );
    }

    #[test]
    fn plain_and_opaque_bodies_fall_back() {
        let plain = clean_error_response(StatusCode::BAD_GATEWAY, "upstream down").to_string();
        assert_eq!(plain, "server error (502): upstream down");

        let opaque = clean_error_response(StatusCode::INTERNAL_SERVER_ERROR, "{\"oops\":1}");
        assert_eq!(opaque.to_string(), "server returned 500");
    }
}
