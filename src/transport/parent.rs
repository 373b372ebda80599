use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;
use crate::core::errors::ParentServiceError;
use crate::core::traits::ParentService;
use crate::core::types::ParentId;
use super::{error_message, parse_endpoint};

/// pitch 的创建与更新
#[derive(Debug, Clone)]
pub struct HttpParentService {
    client: Client,
    endpoint: Url,
    token: Option<String>,
}

impl HttpParentService {
    pub fn new(endpoint: &str) -> Result<Self, ParentServiceError> {
        Ok(Self {
            client: Client::new(),
            endpoint: parse_endpoint(endpoint).map_err(ParentServiceError::InvalidEndpoint)?,
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = (!token.is_empty()).then_some(token);
        self
    }

    fn url(&self, path: &str) -> Result<Url, ParentServiceError> {
        self.endpoint
            .join(path)
            .map_err(|err| ParentServiceError::InvalidEndpoint(err.to_string()))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(response: Response) -> Result<Response, ParentServiceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        Err(ParentServiceError::Server {
            status_code: status.as_u16(),
            message: error_message(&text, &format!("Request failed with status {}", status)),
        })
    }
}

#[async_trait]
impl ParentService for HttpParentService {
    async fn create(&self, data: Value) -> Result<ParentId, ParentServiceError> {
        let url = self.url("pitches")?;
        let response = self.authorize(self.client.post(url)).json(&data).send().await?;
        let body: Value = Self::check(response).await?.json().await?;

        let id = match body.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(ParentServiceError::InvalidResponse(format!("no id in {}", body))),
        };

        debug!(parent_id = %id, "pitch created");
        Ok(ParentId::new(id))
    }

    async fn patch(&self, id: &ParentId, fields: Map<String, Value>) -> Result<(), ParentServiceError> {
        let url = self.url(&format!("pitches/{}", id))?;
        let response = self
            .authorize(self.client.patch(url))
            .json(&Value::Object(fields))
            .send()
            .await?;
        Self::check(response).await?;

        debug!(parent_id = %id, "pitch patched");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;
    use serde_json::json;
    use super::*;

    #[tokio::test]
    async fn test_create_returns_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/pitches")
            .match_header("authorization", "Bearer t0k")
            .match_body(Matcher::Json(json!({"title": "Night Shift"})))
            .with_status(201)
            .with_body(r#"{"id": 42, "title": "Night Shift"}"#)
            .create_async()
            .await;

        let service = HttpParentService::new(&server.url()).unwrap().with_token("t0k");
        let id = service.create(json!({"title": "Night Shift"})).await.unwrap();

        assert_eq!(id, ParentId::new("42"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_without_id_is_invalid() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/pitches").with_status(200).with_body("{}").create_async().await;

        let service = HttpParentService::new(&server.url()).unwrap();
        let err = service.create(json!({})).await.unwrap_err();
        assert!(matches!(err, ParentServiceError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_patch_sends_fields() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PATCH", "/pitches/p-7")
            .match_body(Matcher::Json(json!({"cover_image_url": "https://cdn/c.png"})))
            .with_status(204)
            .create_async()
            .await;

        let service = HttpParentService::new(&server.url()).unwrap();
        let mut fields = Map::new();
        fields.insert("cover_image_url".to_string(), json!("https://cdn/c.png"));
        service.patch(&ParentId::new("p-7"), fields).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PATCH", "/pitches/p-7")
            .with_status(500)
            .with_body(r#"{"message":"db down"}"#)
            .create_async()
            .await;

        let service = HttpParentService::new(&server.url()).unwrap();
        let err = service.patch(&ParentId::new("p-7"), Map::new()).await.unwrap_err();
        assert!(matches!(err, ParentServiceError::Server { status_code: 500, ref message } if message == "db down"));
    }
}
