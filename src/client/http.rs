use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::ChannelManagerClient;
use crate::config::RemoteConfig;
use crate::errors::{ClientError, ClientResult};
use crate::models::{Channel, ChannelUpdate, EpgSource, M3uAccount, Page, Stream};

/// Some listing endpoints paginate and some return a bare array
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Paged(Page<T>),
    Plain(Vec<T>),
}

impl<T> Listing<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Listing::Paged(page) => page.results,
            Listing::Plain(items) => items,
        }
    }
}

/// reqwest-backed client for a Dispatcharr-style REST API
#[derive(Clone)]
pub struct HttpChannelManagerClient {
    client: reqwest::Client,
    base_url: Url,
    api_token: Option<String>,
}

impl HttpChannelManagerClient {
    pub fn new(config: &RemoteConfig) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("stream-health/", env!("CARGO_PKG_VERSION")))
            .build()?;

        // Url::join drops the last path segment unless it ends in '/'
        let mut base = config.base_url.trim_end_matches('/').to_string();
        base.push('/');

        Ok(Self {
            client,
            base_url: Url::parse(&base)?,
            api_token: config.api_token.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> ClientResult<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(response: Response) -> ClientResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(ClientError::Status {
            status: status.as_u16(),
            message: message.chars().take(512).collect(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> ClientResult<T> {
        let url = self.endpoint(path)?;
        debug!("GET {}", url);
        let response = self.request(Method::GET, url).query(query).send().await?;
        let response = Self::check(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ClientError::decode(path, e.to_string()))
    }

    async fn send_json<B: serde::Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> ClientResult<()> {
        let url = self.endpoint(path)?;
        debug!("{} {}", method, url);
        let response = self.request(method, url).json(body).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    fn page_query(page: u32, page_size: u32) -> [(&'static str, String); 2] {
        [("page", page.to_string()), ("page_size", page_size.to_string())]
    }
}

#[async_trait]
impl ChannelManagerClient for HttpChannelManagerClient {
    async fn get_channels(&self, page: u32, page_size: u32) -> ClientResult<Page<Channel>> {
        self.get_json("api/channels/channels/", &Self::page_query(page, page_size))
            .await
    }

    async fn update_channel(&self, channel_id: i64, update: &ChannelUpdate) -> ClientResult<()> {
        self.send_json(
            Method::PATCH,
            &format!("api/channels/channels/{channel_id}/"),
            update,
        )
        .await
    }

    async fn get_streams(&self, page: u32, page_size: u32) -> ClientResult<Page<Stream>> {
        self.get_json("api/channels/streams/", &Self::page_query(page, page_size))
            .await
    }

    async fn get_streams_by_ids(&self, stream_ids: &[i64]) -> ClientResult<Vec<Stream>> {
        if stream_ids.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.endpoint("api/channels/streams/by-ids/")?;
        let response = self
            .request(Method::POST, url)
            .json(&serde_json::json!({ "ids": stream_ids }))
            .send()
            .await?;
        let response = Self::check(response).await?;
        let listing: Listing<Stream> = response
            .json()
            .await
            .map_err(|e| ClientError::decode("api/channels/streams/by-ids/", e.to_string()))?;
        Ok(listing.into_vec())
    }

    async fn get_epg_sources(&self) -> ClientResult<Vec<EpgSource>> {
        let listing: Listing<EpgSource> = self.get_json("api/epg/sources/", &[]).await?;
        Ok(listing.into_vec())
    }

    async fn get_epg_source(&self, source_id: i64) -> ClientResult<EpgSource> {
        self.get_json(&format!("api/epg/sources/{source_id}/"), &[])
            .await
    }

    async fn refresh_epg_source(&self, source_id: i64) -> ClientResult<()> {
        self.send_json(
            Method::POST,
            "api/epg/import/",
            &serde_json::json!({ "id": source_id }),
        )
        .await
    }

    async fn get_m3u_accounts(&self) -> ClientResult<Vec<M3uAccount>> {
        let listing: Listing<M3uAccount> = self.get_json("api/m3u/accounts/", &[]).await?;
        Ok(listing.into_vec())
    }

    async fn refresh_m3u_account(&self, account_id: i64) -> ClientResult<()> {
        self.send_json(
            Method::POST,
            &format!("api/m3u/refresh/{account_id}/"),
            &serde_json::json!({}),
        )
        .await
    }
}
