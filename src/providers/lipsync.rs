use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use reqwest::multipart::{Form, Part};
use tracing::debug;

use super::{RenderRequest, Renderer};
use crate::error::ProviderError;

/// HTTP lip-sync renderer. Uploads the audio clip together with the face
/// image and stores the rendered video returned in the response body.
pub struct LipsyncClient {
    api_key: String,
    client: Client,
    base_url: String,
}

impl LipsyncClient {
    pub fn new(api_key: String, base_url: String, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            api_key,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn form(&self, request: &RenderRequest<'_>) -> Result<Form, ProviderError> {
        let audio = tokio::fs::read(request.audio).await?;
        let form = Form::new().part(
            "audio",
            Part::bytes(audio)
                .file_name(file_name(request.audio, "audio.mp3"))
                .mime_str("audio/mpeg")?,
        );

        // Remote images are passed by reference, local ones uploaded.
        if request.image.starts_with("http://") || request.image.starts_with("https://") {
            return Ok(form.text("image_url", request.image.to_string()));
        }
        let image_path = Path::new(request.image);
        let image = tokio::fs::read(image_path).await?;
        Ok(form.part("image", Part::bytes(image).file_name(file_name(image_path, "image.png"))))
    }
}

fn file_name(path: &Path, fallback: &str) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(fallback)
        .to_string()
}

impl Renderer for LipsyncClient {
    async fn render(&self, request: RenderRequest<'_>) -> Result<PathBuf, ProviderError> {
        let form = self.form(&request).await?;
        let response = self
            .client
            .post(format!("{}/v1/lipsync", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(ProviderError::message("lip-sync provider returned an empty body"));
        }
        tokio::fs::write(request.output, &bytes).await?;
        debug!(path = %request.output.display(), bytes = bytes.len(), "video written");
        Ok(request.output.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::error::ErrorKind;

    fn client_for(server: &MockServer) -> LipsyncClient {
        LipsyncClient::new("ls-test".into(), server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn uploads_audio_and_writes_video() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/lipsync"))
            .and(header("authorization", "Bearer ls-test"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mp4".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("audio_1.mp3");
        std::fs::write(&audio, b"mp3").unwrap();
        let output = dir.path().join("video_1.mp4");

        let path = client_for(&server)
            .render(RenderRequest {
                audio: &audio,
                image: "https://cdn.example.com/face.png",
                output: &output,
            })
            .await
            .unwrap();

        assert_eq!(path, output);
        assert_eq!(std::fs::read(&output).unwrap(), b"mp4");
    }

    #[tokio::test]
    async fn server_errors_are_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("audio_1.mp3");
        let image = dir.path().join("face.png");
        std::fs::write(&audio, b"mp3").unwrap();
        std::fs::write(&image, b"png").unwrap();
        let output = dir.path().join("video_1.mp4");

        let err = client_for(&server)
            .render(RenderRequest {
                audio: &audio,
                image: image.to_str().unwrap(),
                output: &output,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServerError);
        assert!(err.kind().is_retryable());
    }

    #[tokio::test]
    async fn missing_audio_is_an_io_error() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let err = client_for(&server)
            .render(RenderRequest {
                audio: &dir.path().join("missing.mp3"),
                image: "https://cdn.example.com/face.png",
                output: &dir.path().join("out.mp4"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Io(_)));
    }
}
