use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, StatusCode, Url};
use serde_json::Value;
use survey_core::{
    EntityKind, GroupRecord, ProjectRecord, Reachability, RecordId, RemoteRecord, RemoteRequest,
    RemoteService, SectionRecord, SurveyError, TreeRecord,
};
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3000";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_REACHABILITY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpServiceConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub reachability_timeout: Duration,
}

impl Default for HttpServiceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reachability_timeout: DEFAULT_REACHABILITY_TIMEOUT,
        }
    }
}

/// Survey backend reached over HTTP: `POST /api/<collection>` creates,
/// `PUT /api/<collection>/<id>` updates, `GET /api/projects` doubles as the reachability probe.
#[derive(Clone)]
pub struct HttpSurveyService {
    config: HttpServiceConfig,
    base: Url,
    client: Client,
}

impl HttpSurveyService {
    pub fn new(config: HttpServiceConfig) -> Result<Self, SurveyError> {
        let base_url = config.base_url.trim().to_owned();
        let base = Url::parse(&base_url)
            .ok()
            .filter(|url| matches!(url.scheme(), "http" | "https") && !url.cannot_be_a_base())
            .ok_or_else(|| {
                SurveyError::Configuration(format!(
                    "server base url '{base_url}' must be an http:// or https:// url"
                ))
            })?;

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );
        let client = Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|error| {
                SurveyError::Configuration(format!("failed to build HTTP client: {error}"))
            })?;

        Ok(Self {
            config: HttpServiceConfig { base_url, ..config },
            base,
            client,
        })
    }

    pub fn config(&self) -> &HttpServiceConfig {
        &self.config
    }

    /// `<base>/api/<segments..>`, each segment percent-encoded on its own.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, SurveyError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| {
                SurveyError::Configuration(format!(
                    "server base url '{}' cannot carry a path",
                    self.base
                ))
            })?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    async fn request_json(&self, request: RequestBuilder) -> Result<(StatusCode, Value), SurveyError> {
        let response = request
            .send()
            .await
            .map_err(|error| self.transport_error(error))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| self.transport_error(error))?;

        if !status.is_success() {
            return Err(SurveyError::RemoteRejected {
                status: status.as_u16(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Ok((status, Value::Null));
        }

        let payload = serde_json::from_str(&body).map_err(|error| SurveyError::RemoteRejected {
            status: status.as_u16(),
            body: format!("response was malformed JSON ({error}): {body}"),
        })?;
        Ok((status, payload))
    }

    fn transport_error(&self, error: reqwest::Error) -> SurveyError {
        if error.is_timeout() {
            SurveyError::RequestTimedOut {
                seconds: self.config.request_timeout.as_secs(),
            }
        } else {
            SurveyError::RequestFailed(error.to_string())
        }
    }
}

#[async_trait]
impl RemoteService for HttpSurveyService {
    async fn create(&self, request: RemoteRequest) -> Result<RemoteRecord, SurveyError> {
        let kind = request.kind();
        let call = self
            .client
            .post(self.endpoint(&[kind.collection()])?)
            .json(&request);
        let (status, payload) = self.request_json(call).await?;

        if let Some(record) = full_record(kind, &payload) {
            return Ok(record);
        }
        let id = acknowledged_id(&payload).ok_or_else(|| SurveyError::RemoteRejected {
            status: status.as_u16(),
            body: format!("create of {kind} answered without an id: {payload}"),
        })?;
        debug!(kind = %kind, id = %id, "create acknowledged");
        Ok(RemoteRecord::from_request(id, request))
    }

    async fn update(
        &self,
        id: &RecordId,
        request: RemoteRequest,
    ) -> Result<RemoteRecord, SurveyError> {
        let kind = request.kind();
        let call = self
            .client
            .put(self.endpoint(&[kind.collection(), id.as_str()])?)
            .json(&request);
        let (_, payload) = self.request_json(call).await?;

        if let Some(record) = full_record(kind, &payload) {
            return Ok(record);
        }
        debug!(kind = %kind, id = %id, "update acknowledged");
        Ok(RemoteRecord::from_request(id.clone(), request))
    }
}

#[async_trait]
impl Reachability for HttpSurveyService {
    async fn is_reachable(&self) -> bool {
        let url = match self.endpoint(&[EntityKind::Project.collection()]) {
            Ok(url) => url,
            Err(error) => {
                warn!(error = %error, "reachability probe has no usable url");
                return false;
            }
        };
        let probe = self
            .client
            .get(url)
            .timeout(self.config.reachability_timeout);
        match probe.send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(status = %response.status(), "reachability probe answered with an error status");
                false
            }
            Err(error) => {
                warn!(error = %error, "reachability probe failed");
                false
            }
        }
    }
}

/// A response that is itself a complete record of the expected kind.
fn full_record(kind: EntityKind, payload: &Value) -> Option<RemoteRecord> {
    if !payload.is_object() {
        return None;
    }
    let payload = payload.clone();
    match kind {
        EntityKind::Project => serde_json::from_value::<ProjectRecord>(payload)
            .ok()
            .map(RemoteRecord::Project),
        EntityKind::Section => serde_json::from_value::<SectionRecord>(payload)
            .ok()
            .map(RemoteRecord::Section),
        EntityKind::Group => serde_json::from_value::<GroupRecord>(payload)
            .ok()
            .map(RemoteRecord::Group),
        EntityKind::Tree => serde_json::from_value::<TreeRecord>(payload)
            .ok()
            .map(RemoteRecord::Tree),
    }
}

/// The `id` of a bare `{ "id": .. }` acknowledgement.
fn acknowledged_id(payload: &Value) -> Option<RecordId> {
    let raw = payload.get("id")?;
    serde_json::from_value(raw.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn endpoint_joins_base_and_collection() {
        let service = HttpSurveyService::new(HttpServiceConfig {
            base_url: "http://survey.local:3000/".to_owned(),
            ..HttpServiceConfig::default()
        })
        .expect("service");
        assert_eq!(
            service.endpoint(&["groups", "42"]).expect("url").as_str(),
            "http://survey.local:3000/api/groups/42"
        );
    }

    #[test]
    fn server_ids_are_encoded_as_a_single_path_segment() {
        let service = HttpSurveyService::new(HttpServiceConfig {
            base_url: "https://survey.local/v2".to_owned(),
            ..HttpServiceConfig::default()
        })
        .expect("service");
        let url = service
            .endpoint(&["trees", "a/b?c#d"])
            .expect("url");
        assert_eq!(url.as_str(), "https://survey.local/v2/api/trees/a%2Fb%3Fc%23d");
        assert_eq!(url.query(), None);
        assert_eq!(url.path_segments().map(Iterator::count), Some(4));
    }

    #[test]
    fn base_url_without_scheme_is_rejected() {
        for base_url in ["survey.local", "ftp://survey.local", "mailto:survey@local"] {
            let result = HttpSurveyService::new(HttpServiceConfig {
                base_url: base_url.to_owned(),
                ..HttpServiceConfig::default()
            });
            assert!(
                matches!(result, Err(SurveyError::Configuration(_))),
                "{base_url} accepted"
            );
        }
    }

    #[test]
    fn bare_acknowledgements_yield_ids() {
        assert_eq!(acknowledged_id(&json!({"id": 7})), Some(RecordId::from(7)));
        assert_eq!(
            acknowledged_id(&json!({"id": "srv-9"})),
            Some(RecordId::from("srv-9"))
        );
        assert_eq!(acknowledged_id(&json!({"id": ""})), None);
        assert_eq!(acknowledged_id(&json!({"success": true})), None);
    }

    #[test]
    fn only_complete_records_of_the_right_kind_are_taken_verbatim() {
        let project = json!({"id": 3, "name": "Elm", "created_at": "2024-05-01T10:00:00Z"});
        let record = full_record(EntityKind::Project, &project).expect("full project");
        assert_eq!(record.id(), &RecordId::from(3));

        assert!(full_record(EntityKind::Project, &json!({"id": 3})).is_none());
        assert!(full_record(EntityKind::Section, &project).is_none());
        assert!(full_record(EntityKind::Project, &json!({"success": true})).is_none());
    }
}
