use crate::{
    client::{Result, Storage},
    rest::{RestBackend, check},
};
use async_trait::async_trait;
use reqwest::{Method, header::CONTENT_TYPE};
use tracing::{info, instrument};
use url::Url;

#[async_trait]
impl Storage for RestBackend {
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn upload(
        &self,
        bucket: &str,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let url = self.endpoint_with_segments("storage/v1/object", &[bucket, name])?;
        let request = self
            .request(Method::POST, url)
            .await
            .header(CONTENT_TYPE, content_type)
            .body(bytes);
        check(request.send().await?).await?;
        info!("Uploaded object");

        Ok(())
    }

    fn public_url(&self, bucket: &str, name: &str) -> Result<Url> {
        self.endpoint_with_segments("storage/v1/object/public", &[bucket, name])
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        client::{BackendError, Storage},
        rest::RestBackend,
    };
    use serde_json::json;
    use url::Url;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_bytes, header, method, path},
    };

    #[tokio::test]
    async fn uploads_raw_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/post-files/1700000000000-cat.png"))
            .and(header("content-type", "image/png"))
            .and(body_bytes(vec![1_u8, 2, 3]))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "Key": "x" })))
            .expect(1)
            .mount(&server)
            .await;
        let backend =
            RestBackend::new(Url::parse(&server.uri()).unwrap(), "anon".to_owned()).unwrap();

        backend
            .upload("post-files", "1700000000000-cat.png", vec![1, 2, 3], "image/png")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn duplicate_upload_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(409).set_body_json(json!({
                    "statusCode": "409",
                    "error": "Duplicate",
                    "message": "The resource already exists",
                })),
            )
            .mount(&server)
            .await;
        let backend =
            RestBackend::new(Url::parse(&server.uri()).unwrap(), "anon".to_owned()).unwrap();

        let error = backend
            .upload("post-files", "a.txt", Vec::new(), "text/plain")
            .await
            .unwrap_err();

        assert!(matches!(error, BackendError::Api { status: 409, .. }));
    }

    #[test]
    fn public_urls() {
        let backend = RestBackend::new(
            Url::parse("https://demo.example.co").unwrap(),
            "anon".to_owned(),
        )
        .unwrap();

        assert_eq!(
            backend.public_url("post-files", "1-a.png").unwrap().as_str(),
            "https://demo.example.co/storage/v1/object/public/post-files/1-a.png"
        );
    }
}
