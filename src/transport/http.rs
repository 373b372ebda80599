use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::Client;
use serde_json::Value;
use tokio::fs::File as TokioFile;
use tokio_util::io::ReaderStream;
use tracing::debug;
use url::Url;
use crate::core::errors::TransferError;
use crate::core::traits::{TransferContext, Transport};
use crate::core::types::{SourceBlob, TransferReceipt, TransferRequest};
use super::progress_stream::ProgressStream;
use super::{error_message, metadata, parse_endpoint, resolve_location};

// 64KB
const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// 通过 HTTP POST 上传文件内容
///
/// `POST {endpoint}/uploads/{destination}` with the raw file as a streamed
/// body. The resulting URL comes from a JSON `url` field, or the `Location`
/// header when the body has none.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
    token: Option<String>,
    chunk_size: usize,
}

impl HttpTransport {
    pub fn new(endpoint: &str) -> Result<Self, TransferError> {
        Ok(Self {
            client: Client::new(),
            endpoint: parse_endpoint(endpoint).map_err(TransferError::InvalidEndpoint)?,
            token: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = (!token.is_empty()).then_some(token);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn upload_url(&self, destination: &str) -> Result<Url, TransferError> {
        self.endpoint
            .join(&format!("uploads/{}", destination))
            .map_err(|err| TransferError::InvalidEndpoint(err.to_string()))
    }

    fn create_headers(&self, request: &TransferRequest) -> Result<HeaderMap, TransferError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.token {
            headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", token))?);
        }
        headers.insert(CONTENT_TYPE, header_value(&request.mime)?);
        headers.insert(CONTENT_LENGTH, HeaderValue::from(request.size));
        headers.insert("Upload-Metadata", header_value(&metadata::to_header(&request.metadata()))?);
        Ok(headers)
    }

    async fn body_stream(&self, source: &SourceBlob) -> Result<BoxStream<'static, std::io::Result<Bytes>>, TransferError> {
        match source {
            SourceBlob::File(path) => {
                let file = TokioFile::open(path).await?;
                Ok(ReaderStream::with_capacity(file, self.chunk_size).boxed())
            }
            SourceBlob::Memory(data) => {
                let chunk_size = self.chunk_size;
                let chunks: Vec<std::io::Result<Bytes>> = (0..data.len())
                    .step_by(chunk_size)
                    .map(|start| Ok(data.slice(start..(start + chunk_size).min(data.len()))))
                    .collect();
                Ok(stream::iter(chunks).boxed())
            }
        }
    }

    async fn send(&self, request: TransferRequest, context: &TransferContext) -> Result<TransferReceipt, TransferError> {
        let url = self.upload_url(&request.destination)?;
        let headers = self.create_headers(&request)?;

        context.progress.report(0, request.size);
        let body = ProgressStream::new(
            self.body_stream(&request.source).await?,
            Arc::clone(&context.progress),
            context.cancellation_token.clone(),
            request.size,
        );

        debug!(record_id = %request.record_id, %url, size = request.size, "sending upload");
        let response = self
            .client
            .post(url)
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await?;

        // 验证响应
        let status = response.status();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let text = response.text().await?;

        if !status.is_success() {
            return Err(TransferError::server_error(
                status.as_u16(),
                error_message(&text, &format!("Upload failed with status {}", status)),
            ));
        }

        let url = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|value| value.get("url").and_then(Value::as_str).map(str::to_string))
            .or_else(|| location.map(|location| resolve_location(&self.endpoint, &location)))
            .ok_or_else(|| TransferError::server_error(status.as_u16(), "No 'url' in response"))?;

        context.progress.report(request.size, request.size);
        Ok(TransferReceipt { url })
    }
}

fn header_value(value: &str) -> Result<HeaderValue, TransferError> {
    HeaderValue::from_str(value).map_err(|err| TransferError::failed(format!("invalid header value: {}", err)))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn transfer(&self, request: TransferRequest, context: TransferContext) -> Result<TransferReceipt, TransferError> {
        let token = context.cancellation_token.clone();

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(TransferError::Cancelled),
            result = self.send(request, &context) => result,
        };

        // 取消导致的请求体错误也算取消
        match result {
            Err(_) if token.is_cancelled() => Err(TransferError::Cancelled),
            other => other,
        }
    }
}
