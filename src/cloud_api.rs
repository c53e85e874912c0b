use crate::opt_env_var;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

// This file implements the subset of the Nature Remo Cloud API
// that we need, as described at <https://swagger.nature.global/>.
// Paths passed to `RemoApi::post` are relative to SERVER, so
// that `/appliances/{id}/tv` maps to `/1/appliances/{id}/tv`.

const SERVER: &str = "https://api.nature.global/1";

fn endpoint(path: &str) -> String {
    format!("{SERVER}{path}")
}

#[derive(clap::Parser, Debug)]
pub struct RemoApiArguments {
    /// The Nature Remo access token. If not passed here, it will be read
    /// from the REMO_ACCESS_TOKEN environment variable.
    /// Tokens are issued at <https://home.nature.global/>
    #[arg(long, global = true)]
    pub access_token: Option<String>,
}

impl RemoApiArguments {
    pub fn opt_access_token(&self) -> anyhow::Result<Option<String>> {
        match &self.access_token {
            Some(token) => Ok(Some(token.to_string())),
            None => opt_env_var("REMO_ACCESS_TOKEN"),
        }
    }

    pub fn access_token(&self) -> anyhow::Result<String> {
        self.opt_access_token()?.ok_or_else(|| {
            anyhow::anyhow!(
                "Please specify the access token either via the \
                --access-token parameter or by setting $REMO_ACCESS_TOKEN"
            )
        })
    }

    pub fn api_client(&self) -> anyhow::Result<RemoApiClient> {
        let token = self.access_token()?;
        Ok(RemoApiClient::new(token))
    }
}

/// The operations that the rest of the service needs from the cloud.
#[async_trait]
pub trait RemoApi: Send + Sync {
    /// Returns every appliance registered to the account
    async fn get_appliances(&self) -> anyhow::Result<Vec<Appliance>>;

    /// POST a flat set of fields to `path`.
    /// Use `is_empty_response` to decide whether the result counts
    /// as a successful reply.
    async fn post(&self, path: &str, body: &JsonValue) -> anyhow::Result<JsonValue>;
}

/// A reply that carries nothing is treated the same as no reply at all.
/// That is `null` or an empty body, string, array or object.
/// Any scalar, including `false` and `0`, counts as a reply.
pub fn is_empty_response(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::Bool(_) | JsonValue::Number(_) => false,
        JsonValue::String(s) => s.is_empty(),
        JsonValue::Array(a) => a.is_empty(),
        JsonValue::Object(o) => o.is_empty(),
    }
}

#[derive(Clone)]
pub struct RemoApiClient {
    token: String,
}

impl RemoApiClient {
    pub fn new<T: Into<String>>(token: T) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl RemoApi for RemoApiClient {
    async fn get_appliances(&self) -> anyhow::Result<Vec<Appliance>> {
        let url = endpoint("/appliances");
        self.get_request_with_json_response(url)
            .await
            .context("get_appliances")
    }

    async fn post(&self, path: &str, body: &JsonValue) -> anyhow::Result<JsonValue> {
        if !body.is_object() {
            anyhow::bail!("POST {path}: body must be a JSON object, got {body}");
        }
        let url = endpoint(path);
        self.request_with_form_body(Method::POST, url, body)
            .await
            .with_context(|| format!("POST {path}"))
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Appliance {
    pub id: String,
    #[serde(default)]
    pub nickname: Option<String>,
    pub device: ApplianceDevice,
    #[serde(default)]
    pub model: Option<ApplianceModel>,
    #[serde(default, rename = "type", deserialize_with = "lenient_appliance_type")]
    pub appliance_type: ApplianceType,
    #[serde(default)]
    pub tv: Option<TvSettings>,
}

impl Appliance {
    /// The nickname assigned in the Nature Remo app, falling back
    /// to the name of the Remo device that hosts the appliance.
    pub fn display_name(&self) -> String {
        match &self.nickname {
            Some(nick) if !nick.is_empty() => nick.to_string(),
            _ => self.device.name.to_string(),
        }
    }

    pub fn is_tv(&self) -> bool {
        self.appliance_type == ApplianceType::Tv
    }

    pub fn tv_buttons(&self) -> &[Button] {
        self.tv
            .as_ref()
            .map(|tv| tv.buttons.as_slice())
            .unwrap_or(&[])
    }

    pub fn manufacturer(&self) -> Option<&str> {
        self.model.as_ref()?.manufacturer.as_deref()
    }

    pub fn model_name(&self) -> Option<&str> {
        self.model.as_ref()?.name.as_deref()
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ApplianceDevice {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub firmware_version: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct ApplianceModel {
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(
    Deserialize, Serialize, Debug, Default, Clone, Copy, PartialEq, Eq, strum_macros::Display,
)]
pub enum ApplianceType {
    #[serde(rename = "AC")]
    #[strum(serialize = "AC")]
    Ac,
    #[serde(rename = "TV")]
    #[strum(serialize = "TV")]
    Tv,
    #[serde(rename = "LIGHT")]
    #[strum(serialize = "LIGHT")]
    Light,
    #[serde(rename = "IR")]
    #[strum(serialize = "IR")]
    Ir,
    #[serde(other)]
    #[default]
    Other,
}

/// Appliances whose type is null, or not even a string, are
/// treated like any other unrecognized type rather than failing
/// to decode the whole appliance list.
fn lenient_appliance_type<'de, D>(deserializer: D) -> Result<ApplianceType, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    Ok(ApplianceType::deserialize(value).unwrap_or_default())
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct TvSettings {
    #[serde(default)]
    pub state: Option<JsonValue>,
    #[serde(default)]
    pub buttons: Vec<Button>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct Button {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

pub fn from_json<T: serde::de::DeserializeOwned, S: AsRef<[u8]>>(text: S) -> anyhow::Result<T> {
    let text = text.as_ref();
    serde_json_path_to_error::from_slice(text)
        .map_err(|err| anyhow::anyhow!("{err}. Input: {}", String::from_utf8_lossy(text)))
}

pub async fn json_body<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> anyhow::Result<T> {
    let url = response.url().clone();
    let data = response
        .bytes()
        .await
        .with_context(|| format!("read {url} response body"))?;
    if data.is_empty() {
        // Some endpoints reply with no content at all
        return from_json("null");
    }
    from_json(&data).with_context(|| format!("parsing {url} response"))
}

pub async fn http_response_body<R: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> anyhow::Result<R> {
    let url = response.url().clone();

    let status = response.status();
    if !status.is_success() {
        let body_bytes = response.bytes().await.with_context(|| {
            format!(
                "request {url} status {}: {}, and failed to read response body",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )
        })?;

        anyhow::bail!(
            "request {url} status {}: {}. Response body: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
            String::from_utf8_lossy(&body_bytes)
        );
    }
    json_body(response).await.with_context(|| {
        format!(
            "request {url} status {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        )
    })
}

impl RemoApiClient {
    async fn get_request_with_json_response<T: reqwest::IntoUrl, R: serde::de::DeserializeOwned>(
        &self,
        url: T,
    ) -> anyhow::Result<R> {
        let response = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?
            .request(Method::GET, url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        http_response_body(response).await
    }

    /// The Nature Remo API takes form-encoded request bodies
    async fn request_with_form_body<
        T: reqwest::IntoUrl,
        B: serde::Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    >(
        &self,
        method: Method,
        url: T,
        body: &B,
    ) -> anyhow::Result<R> {
        let response = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?
            .request(method, url)
            .bearer_auth(&self.token)
            .form(body)
            .send()
            .await?;

        http_response_body(response).await
    }
}
