//! REST provider implementation
//!
//! Wire contract:
//! - request: `POST <url>` with `{"data": [{"url": "<data URL>"}]}`
//! - response: `{"data": [{"label": "<label>"}, <confidence>, ...]}`
//!
//! Anything else in the response is a protocol violation.

use super::{confidence_from_json, shape_error, InferenceProvider};
use crate::error::{ClassifierError, Result};
use crate::types::{Image, RawInferenceResult};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error};

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    data: [ImagePayload<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ImagePayload<'a> {
    url: &'a str,
}

pub struct RestProvider {
    url: String,
    client: reqwest::Client,
}

impl RestProvider {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClassifierError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Extract `(label, confidence)` from a REST response body.
pub(crate) fn parse_response(body: &Value) -> Result<RawInferenceResult> {
    let data = body
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| shape_error("response has no 'data' array"))?;

    if data.len() < 2 {
        return Err(shape_error(format!(
            "'data' has {} element(s), expected at least 2",
            data.len()
        )));
    }

    let label = data[0]
        .get("label")
        .and_then(Value::as_str)
        .ok_or_else(|| shape_error("data[0].label is missing"))?;
    let confidence = confidence_from_json(&data[1])
        .ok_or_else(|| shape_error("data[1] is not a numeric confidence"))?;

    RawInferenceResult::new(label, confidence)
}

#[async_trait]
impl InferenceProvider for RestProvider {
    async fn infer(&self, image: &Image) -> Result<RawInferenceResult> {
        let data_url = image.to_data_url();
        let request = PredictRequest {
            data: [ImagePayload { url: &data_url }],
        };

        debug!("Sending request to: {}", self.url);
        let response = self.client.post(&self.url).json(&request).send().await?;

        let status = response.status();
        debug!("Response status: {}", status);

        let response_text = response.text().await?;
        if !status.is_success() {
            error!("Request failed: {}", response_text);
            return Err(ClassifierError::Transport(format!(
                "server answered {status}"
            )));
        }

        let body: Value = serde_json::from_str(&response_text)
            .map_err(|e| shape_error(format!("response is not JSON: {e}")))?;
        parse_response(&body)
    }

    fn name(&self) -> &'static str {
        "rest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;
    use tracing_test::traced_test;

    fn sample_image() -> Image {
        Image::new(vec![0xff, 0xd8, 0xff, 0xe0], "image/jpeg").unwrap()
    }

    #[test]
    fn test_parse_response_shapes() {
        let ok = parse_response(&json!({"data": [{"label": "Metal"}, 0.64]})).unwrap();
        assert_eq!(ok, RawInferenceResult::new("Metal", 0.64).unwrap());

        let extra = parse_response(&json!({"data": [{"label": "paper"}, 0.5, "ignored"]}));
        assert!(extra.is_ok());

        for bad in [
            json!({"data": [{"label": "paper"}]}),
            json!({"data": [{"name": "paper"}, 0.5]}),
            json!({"data": [{"label": "paper"}, "high"]}),
            json!({"data": [{"label": "paper"}, 1.5]}),
            json!({"result": "paper"}),
            json!([{"label": "paper"}, 0.5]),
        ] {
            assert!(
                matches!(parse_response(&bad), Err(ClassifierError::InvalidResponseShape(_))),
                "accepted {bad}"
            );
        }
    }

    #[test]
    fn test_empty_label_is_left_for_the_safety_gate() {
        let raw = parse_response(&json!({"data": [{"label": ""}, 0.9]})).unwrap();
        assert_eq!(raw.label(), "");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_successful_predict() {
        let mut server = Server::new_async().await;
        let image = sample_image();

        let mock = server
            .mock("POST", "/run/predict")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(json!({"data": [{"url": image.to_data_url()}]})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data": [{"label": "Plastic"}, 0.91]}"#)
            .expect(1)
            .create_async()
            .await;

        let provider = RestProvider::new(
            format!("{}/run/predict", server.url()),
            Duration::from_secs(5),
        )
        .unwrap();
        let raw = provider.infer(&image).await.unwrap();

        assert_eq!(raw.label(), "Plastic");
        assert_eq!(raw.confidence(), 0.91);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_2xx_is_transport_error() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/run/predict")
            .with_status(503)
            .with_body("model warming up")
            .create_async()
            .await;

        let provider = RestProvider::new(
            format!("{}/run/predict", server.url()),
            Duration::from_secs(5),
        )
        .unwrap();
        let result = provider.infer(&sample_image()).await;

        assert!(matches!(result, Err(ClassifierError::Transport(msg)) if msg.contains("503")));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_short_array_is_shape_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/run/predict")
            .with_status(200)
            .with_body(r#"{"data": [{"label": "glass"}]}"#)
            .create_async()
            .await;

        let provider = RestProvider::new(
            format!("{}/run/predict", server.url()),
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(matches!(
            provider.infer(&sample_image()).await,
            Err(ClassifierError::InvalidResponseShape(_))
        ));
    }

    /// Accepts connections and never answers them.
    async fn silent_listener() -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_silent_endpoint_times_out_as_transport_error() {
        let addr = silent_listener().await;
        let provider =
            RestProvider::new(format!("http://{addr}/run/predict"), Duration::from_millis(300))
                .unwrap();

        let started = std::time::Instant::now();
        let result = provider.infer(&sample_image()).await;
        assert!(
            matches!(&result, Err(ClassifierError::Transport(msg)) if msg.contains("timed out")),
            "{result:?}"
        );
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        // Port 9 (discard) is closed on test machines.
        let provider =
            RestProvider::new("http://127.0.0.1:9/run/predict", Duration::from_secs(2)).unwrap();
        assert!(matches!(
            provider.infer(&sample_image()).await,
            Err(ClassifierError::Transport(_))
        ));
    }
}
