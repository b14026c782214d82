//! REST client

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use chat_common::{Credentials, RestConfig};
use chat_core::payloads::{ChannelPayload, GuildPayload};
use chat_core::Snowflake;
use chat_dispatch::headers::{self, RateLimitInfo};
use chat_dispatch::{
    DispatchError, DispatchOutcome, DispatchQueue, Dispatchable, EnqueueOptions, Method,
};

use crate::models::GatewayBot;
use crate::route::Route;

/// Fallback delay when a quota-exceeded response names none
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Unary API client; every call goes through the dispatch queue
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    authorization: Arc<str>,
    queue: DispatchQueue,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl RestClient {
    pub fn new(
        config: &RestConfig,
        credentials: &Credentials,
        queue: DispatchQueue,
    ) -> Result<Self, DispatchError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let per_second = NonZeroU32::new(config.global_rate_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            authorization: credentials.authorization().into(),
            queue,
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
        })
    }

    /// Queue shared with the gateway
    pub fn queue(&self) -> &DispatchQueue {
        &self.queue
    }

    /// Perform a unary call and return the raw body
    pub async fn send(
        &self,
        route: Route<'_>,
        body: Option<&serde_json::Value>,
    ) -> Result<Bytes, DispatchError> {
        let bucket = route.bucket();
        let body = body
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| DispatchError::Protocol(e.to_string()))?
            .map(Bytes::from);

        let request = RestRequest {
            http: self.http.clone(),
            method: to_reqwest(route.method),
            url: format!("{}{}", self.base_url, route.path()),
            authorization: self.authorization.clone(),
            body,
            limiter: self.limiter.clone(),
        };

        tracing::debug!(bucket = %bucket, url = %request.url, "Unary call");
        let outcome = self
            .queue
            .enqueue(bucket, request, EnqueueOptions::default())
            .await?;
        Ok(outcome.body)
    }

    /// Perform a unary call and decode the JSON body
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        route: Route<'_>,
        body: Option<&serde_json::Value>,
    ) -> Result<T, DispatchError> {
        let bytes = self.send(route, body).await?;
        serde_json::from_slice(&bytes).map_err(|e| DispatchError::Protocol(e.to_string()))
    }

    /// Gateway URL, recommended shards and identify budget
    pub async fn gateway_bot(&self) -> Result<GatewayBot, DispatchError> {
        self.send_json(Route::new(Method::Get, "/gateway/bot"), None)
            .await
    }

    pub async fn get_guild(&self, guild_id: Snowflake) -> Result<GuildPayload, DispatchError> {
        self.send_json(
            Route::new(Method::Get, "/guilds/{guild_id}").param("guild_id", guild_id),
            None,
        )
        .await
    }

    pub async fn get_guild_channels(
        &self,
        guild_id: Snowflake,
    ) -> Result<Vec<ChannelPayload>, DispatchError> {
        self.send_json(
            Route::new(Method::Get, "/guilds/{guild_id}/channels").param("guild_id", guild_id),
            None,
        )
        .await
    }
}

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

/// Body of a quota-exceeded response
#[derive(Debug, Default, Deserialize)]
struct QuotaBody {
    retry_after: Option<f64>,
    #[serde(default)]
    global: bool,
}

/// One unary request; re-sent by the queue after a quota-exceeded response
struct RestRequest {
    http: reqwest::Client,
    method: reqwest::Method,
    url: String,
    authorization: Arc<str>,
    body: Option<Bytes>,
    limiter: Arc<DefaultDirectRateLimiter>,
}

#[async_trait]
impl Dispatchable for RestRequest {
    async fn dispatch(&mut self) -> Result<DispatchOutcome, DispatchError> {
        self.limiter.until_ready().await;

        let mut request = self
            .http
            .request(self.method.clone(), &self.url)
            .header(AUTHORIZATION, self.authorization.as_ref());
        if let Some(body) = &self.body {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        let response = request
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let header_map = response.headers().clone();
        let rate_limit = RateLimitInfo::from_lookup(lookup(&header_map));
        let body = response
            .bytes()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        if status == 429 {
            let quota: QuotaBody = serde_json::from_slice(&body).unwrap_or_default();
            let retry_after = headers::retry_after(lookup(&header_map))
                .or_else(|| quota.retry_after.and_then(|s| Duration::try_from_secs_f64(s).ok()))
                .unwrap_or(DEFAULT_RETRY_AFTER);
            let global = quota.global || rate_limit.as_ref().is_some_and(|info| info.global);
            return Err(DispatchError::QuotaExceeded {
                retry_after,
                global,
            });
        }

        if !(200..300).contains(&status) {
            tracing::debug!(status, url = %self.url, "Unary call failed");
            return Err(DispatchError::from_status(
                status,
                String::from_utf8_lossy(&body),
            ));
        }

        Ok(DispatchOutcome {
            status,
            body,
            rate_limit,
        })
    }
}

fn lookup<'a>(map: &'a HeaderMap) -> impl Fn(&str) -> Option<&'a str> + 'a {
    move |name| map.get(name).and_then(|v| v.to_str().ok())
}
