use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use super::{ProviderJob, ProviderStatus, VideoProvider};
use crate::{config::ProviderConfig, generations::repo_types::GenerationKind};

const MOTION_BUCKET_ID: u32 = 127;

/// Replicate predictions API client.
#[derive(Clone)]
pub struct ReplicateClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model_version: String,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl ReplicateClient {
    pub fn new(cfg: &ProviderConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            model_version: cfg.model_version.clone(),
        })
    }
}

fn build_input(job: &ProviderJob) -> anyhow::Result<Value> {
    let input = match job.kind {
        GenerationKind::TextToVideo => json!({
            "prompt": job.prompt,
            "num_frames": job.settings.num_frames(),
            "fps": job.settings.fps,
            "resolution": job.settings.resolution.as_str(),
        }),
        GenerationKind::ImageToVideo => {
            let image = job
                .image_url
                .as_deref()
                .context("image URL required for image-to-video generation")?;
            json!({
                "image": image,
                "motion_bucket_id": MOTION_BUCKET_ID,
                "fps": job.settings.fps,
            })
        }
    };
    Ok(input)
}

/// First URL of a prediction's output, which is either a string or a list.
fn first_output(output: Option<&Value>) -> Option<String> {
    match output? {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.first().and_then(Value::as_str).map(String::from),
        _ => None,
    }
}

fn interpret(p: &Prediction) -> ProviderStatus {
    match p.status.as_str() {
        "succeeded" => ProviderStatus::Succeeded {
            video_url: first_output(p.output.as_ref()),
        },
        "failed" | "canceled" => ProviderStatus::Failed {
            reason: match &p.error {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => format!("prediction {}", p.status),
            },
        },
        _ => ProviderStatus::Running,
    }
}

#[async_trait]
impl VideoProvider for ReplicateClient {
    #[instrument(skip(self, job), fields(kind = %job.kind))]
    async fn submit(&self, job: &ProviderJob) -> anyhow::Result<String> {
        let body = json!({
            "version": self.model_version,
            "input": build_input(job)?,
        });
        let prediction: Prediction = self
            .http
            .post(format!("{}/v1/predictions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("replicate create prediction")?
            .error_for_status()
            .context("replicate create prediction")?
            .json()
            .await
            .context("decode prediction")?;
        debug!(provider_id = %prediction.id, status = %prediction.status, "prediction created");
        Ok(prediction.id)
    }

    #[instrument(skip(self))]
    async fn poll(&self, provider_id: &str) -> anyhow::Result<ProviderStatus> {
        let prediction: Prediction = self
            .http
            .get(format!("{}/v1/predictions/{}", self.base_url, provider_id))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("replicate get prediction")?
            .error_for_status()
            .context("replicate get prediction")?
            .json()
            .await
            .context("decode prediction")?;
        Ok(interpret(&prediction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{Resolution, VideoSettings};

    fn job(kind: GenerationKind, image_url: Option<&str>) -> ProviderJob {
        ProviderJob {
            kind,
            prompt: "A cat astronaut floating in space".into(),
            image_url: image_url.map(Into::into),
            settings: VideoSettings {
                duration: 4,
                fps: 30,
                resolution: Resolution::P1080,
            },
        }
    }

    fn prediction(status: &str, output: Option<Value>, error: Option<Value>) -> Prediction {
        Prediction {
            id: "p1".into(),
            status: status.into(),
            output,
            error,
        }
    }

    #[test]
    fn text_input_carries_frame_count() {
        let input = build_input(&job(GenerationKind::TextToVideo, None)).unwrap();
        assert_eq!(input["prompt"], "A cat astronaut floating in space");
        assert_eq!(input["num_frames"], 120);
        assert_eq!(input["resolution"], "1080p");
    }

    #[test]
    fn image_input_needs_image() {
        assert!(build_input(&job(GenerationKind::ImageToVideo, None)).is_err());
        let input = build_input(&job(
            GenerationKind::ImageToVideo,
            Some("https://img.example.com/a.png"),
        ))
        .unwrap();
        assert_eq!(input["image"], "https://img.example.com/a.png");
        assert_eq!(input["motion_bucket_id"], 127);
    }

    #[test]
    fn statuses_map_to_provider_status() {
        assert_eq!(interpret(&prediction("starting", None, None)), ProviderStatus::Running);
        assert_eq!(interpret(&prediction("processing", None, None)), ProviderStatus::Running);
        assert_eq!(
            interpret(&prediction("succeeded", Some(json!(["https://o/1.mp4", "https://o/2.mp4"])), None)),
            ProviderStatus::Succeeded {
                video_url: Some("https://o/1.mp4".into())
            }
        );
        assert_eq!(
            interpret(&prediction("succeeded", Some(json!("https://o/only.mp4")), None)),
            ProviderStatus::Succeeded {
                video_url: Some("https://o/only.mp4".into())
            }
        );
        assert_eq!(
            interpret(&prediction("failed", None, Some(json!("CUDA out of memory")))),
            ProviderStatus::Failed {
                reason: "CUDA out of memory".into()
            }
        );
        assert_eq!(
            interpret(&prediction("canceled", None, None)),
            ProviderStatus::Failed {
                reason: "prediction canceled".into()
            }
        );
    }

    #[test]
    fn decodes_api_payload() {
        let raw = r#"{"id":"abc","status":"succeeded","output":["https://o/v.mp4"],"error":null,"logs":""}"#;
        let p: Prediction = serde_json::from_str(raw).unwrap();
        assert_eq!(p.id, "abc");
        assert!(matches!(interpret(&p), ProviderStatus::Succeeded { .. }));
    }
}
