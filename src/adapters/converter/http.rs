//! HTTP client for the external document conversion service
//!
//! The service accepts `POST {base}/convertToFhir?api-version=...` with a
//! JSON body naming the input format, the root template and the document,
//! and answers `{"result": Bundle}`. `OperationOutcome` entries in the
//! returned bundle are reported as conversion warnings instead of resources.

use super::{ConversionOutput, DocumentConverter};
use crate::config::{ConverterConfig, SecretString};
use crate::domain::codec::decode_bundle;
use crate::domain::{
    ConversionError, ConversionWarning, Generation, InputFormat, MeridianError, Result,
};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Request body of a conversion call
#[derive(Debug, Serialize)]
struct ConvertRequest<'a> {
    #[serde(rename = "InputDataFormat")]
    input_data_format: &'static str,
    #[serde(rename = "RootTemplateName")]
    root_template_name: &'a str,
    #[serde(rename = "InputDataString")]
    input_data_string: &'a str,
}

#[derive(Debug, Deserialize)]
struct ConvertResponse {
    result: Value,
}

/// Document converter backed by the HTTP conversion service
///
/// # Example
///
/// ```no_run
/// use meridian::adapters::converter::{DocumentConverter, HttpDocumentConverter};
/// use meridian::config::ConverterConfig;
/// use meridian::domain::InputFormat;
///
/// # async fn example(config: ConverterConfig, xml: &str) -> meridian::domain::Result<()> {
/// let converter = HttpDocumentConverter::new(&config)?;
/// let output = converter.convert(xml, InputFormat::Ccda, "CCD").await?;
/// println!("{} resources", output.resources.len());
/// # Ok(())
/// # }
/// ```
pub struct HttpDocumentConverter {
    base_url: Url,
    endpoint: Url,
    api_version: String,
    api_key: Option<SecretString>,
    client: Client,
}

impl HttpDocumentConverter {
    /// Create a converter client from configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the base URL does not parse or the
    /// HTTP client cannot be built.
    pub fn new(config: &ConverterConfig) -> Result<Self> {
        let invalid =
            |e: url::ParseError| MeridianError::Configuration(format!("Invalid converter base URL: {e}"));
        let base_url = Url::parse(&format!("{}/", config.base_url.trim_end_matches('/')))
            .map_err(invalid)?;
        let endpoint = base_url.join("convertToFhir").map_err(invalid)?;

        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(config.timeout_seconds.min(30)))
            .build()
            .map_err(|e| {
                MeridianError::Configuration(format!("Failed to build converter client: {e}"))
            })?;

        Ok(Self {
            base_url,
            endpoint,
            api_version: config.api_version.clone(),
            api_key: config.api_key.clone(),
            client,
        })
    }

    fn input_data_format(format: InputFormat) -> Result<&'static str> {
        match format {
            InputFormat::Ccda => Ok("Ccda"),
            InputFormat::Hl7v2 => Ok("Hl7v2"),
            InputFormat::FhirR4 => Err(ConversionError::UnsupportedFormat(format.to_string()).into()),
        }
    }

    fn request_error(e: reqwest::Error) -> MeridianError {
        if e.is_timeout() {
            ConversionError::Timeout(e.to_string()).into()
        } else {
            ConversionError::ConnectionFailed(e.to_string()).into()
        }
    }
}

/// Splits `OperationOutcome` entries off a bundle as warnings
fn take_outcomes(bundle: &mut Value) -> Vec<ConversionWarning> {
    let Some(entries) = bundle.get_mut("entry").and_then(Value::as_array_mut) else {
        return Vec::new();
    };
    let mut warnings = Vec::new();
    entries.retain(|entry| {
        let resource = entry.get("resource");
        if resource.and_then(|r| r.get("resourceType")).and_then(Value::as_str)
            != Some("OperationOutcome")
        {
            return true;
        }
        let issues = resource
            .and_then(|r| r.get("issue"))
            .and_then(Value::as_array)
            .into_iter()
            .flatten();
        for issue in issues {
            let text = issue
                .get("diagnostics")
                .and_then(Value::as_str)
                .or_else(|| issue.get("code").and_then(Value::as_str))
                .unwrap_or("unspecified issue");
            warnings.push(ConversionWarning(text.to_string()));
        }
        false
    });
    warnings
}

#[async_trait]
impl DocumentConverter for HttpDocumentConverter {
    async fn convert(
        &self,
        raw: &str,
        format: InputFormat,
        template: &str,
    ) -> Result<ConversionOutput> {
        let body = ConvertRequest {
            input_data_format: Self::input_data_format(format)?,
            root_template_name: template,
            input_data_string: raw,
        };
        tracing::debug!(format = %format, template = %template, "Sending document to converter");

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .query(&[("api-version", self.api_version.as_str())])
            .json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(Self::request_error)?;

        let status = response.status();
        if !status.is_success() {
            // body can echo the submitted document; only its size is kept
            let body_len = response.bytes().await.map(|b| b.len()).unwrap_or(0);
            tracing::warn!(status = status.as_u16(), body_len, "Converter rejected document");
            let message = format!("response body of {body_len} bytes withheld");
            let error = if status.is_server_error() {
                ConversionError::ServerError {
                    status: status.as_u16(),
                    message,
                }
            } else {
                ConversionError::ClientError {
                    status: status.as_u16(),
                    message,
                }
            };
            return Err(error.into());
        }

        let ConvertResponse { result: mut bundle } = response
            .json()
            .await
            .map_err(|e| ConversionError::InvalidResponse(e.to_string()))?;

        let warnings = take_outcomes(&mut bundle);
        let resources = decode_bundle(&bundle, Generation::A)
            .map_err(|e| ConversionError::InvalidResponse(e.to_string()))?;

        tracing::info!(
            format = %format,
            template = %template,
            resources = resources.len(),
            warnings = warnings.len(),
            "Document converted"
        );

        Ok(ConversionOutput {
            resources,
            warnings,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.get(self.base_url.clone()).send().await {
            // the service has no health route; a 404 from the root still proves it is up
            Ok(response) => Ok(response.status().is_success() || response.status().as_u16() == 404),
            Err(e) => {
                tracing::warn!(error = %e, "Converter health check failed");
                Ok(false)
            }
        }
    }
}
