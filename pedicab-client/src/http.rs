// pedicab-client/src/http.rs
// HTTP 客户端 - 与调度后台通信

use crate::{ClientConfig, ClientError, ClientResult};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::ApiResponse;
use shared::ErrorCode;
use shared::client::{
    EarningsResponse, LoginRequest, LoginResponse, OrdersResponse, ProfileResponse,
    WithdrawalResponse, WithdrawalsResponse,
};
use shared::models::{
    EarningsRecord, LocationUpdate, NewWithdrawal, OnlineStatusRecord, OrderRecord, UserRecord,
    WithdrawalRecord,
};
use std::sync::RwLock;

/// 服务端返回的错误响应格式
#[derive(serde::Deserialize, Default)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// The remote authority, one method per endpoint
///
/// Methods return wire records; decoding into domain models happens in the
/// engines so every implementation goes through the same validation.
#[async_trait]
pub trait DispatchApi: Send + Sync {
    /// Install or clear the bearer credential used for later calls
    fn set_token(&self, token: Option<String>);

    async fn login(&self, request: &LoginRequest) -> ClientResult<LoginResponse>;
    async fn logout(&self) -> ClientResult<()>;
    async fn profile(&self) -> ClientResult<UserRecord>;

    async fn driver_orders(&self) -> ClientResult<Vec<OrderRecord>>;
    async fn driver_orders_by_id(&self, driver_id: &str) -> ClientResult<Vec<OrderRecord>>;
    async fn accept_order(&self, order_id: &str) -> ClientResult<()>;
    async fn complete_order(&self, order_id: &str) -> ClientResult<()>;
    async fn cancel_order(&self, order_id: &str) -> ClientResult<()>;

    async fn earnings(&self) -> ClientResult<EarningsRecord>;
    async fn withdrawals(&self) -> ClientResult<Vec<WithdrawalRecord>>;
    async fn create_withdrawal(&self, request: &NewWithdrawal) -> ClientResult<WithdrawalRecord>;

    async fn online_status(&self) -> ClientResult<OnlineStatusRecord>;
    async fn set_online_status(&self, is_online: bool) -> ClientResult<OnlineStatusRecord>;
    async fn push_location(&self, update: &LocationUpdate) -> ClientResult<()>;
}

/// 网络 HTTP 客户端
#[derive(Debug)]
pub struct NetworkHttpClient {
    client: Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl NetworkHttpClient {
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        })
    }

    /// 获取基础 URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn auth_header(&self) -> Option<String> {
        self.token
            .read()
            .ok()
            .and_then(|t| t.as_ref().map(|t| format!("Bearer {}", t)))
    }

    async fn send<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> ClientResult<T> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut req = self
            .client
            .request(method.clone(), &url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(auth) = self.auth_header() {
            req = req.header(reqwest::header::AUTHORIZATION, auth);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        tracing::trace!(%method, path, "Dispatch request");
        let response = req.send().await.map_err(transport_error)?;
        self.handle_response(response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        self.send::<T, ()>(Method::GET, path, None).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> ClientResult<T> {
        self.send(Method::POST, path, Some(body)).await
    }

    async fn put<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> ClientResult<T> {
        self.send(Method::PUT, path, body).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> ClientResult<T> {
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(status_error(status, &text));
        }

        let value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)
                .map_err(|e| ClientError::InvalidResponse(format!("non-JSON body: {e}")))?
        };
        Ok(ApiResponse::<T>::unwrap_value(value)?)
    }
}

/// Connect and timeout failures are connectivity problems, not server answers
fn transport_error(err: reqwest::Error) -> ClientError {
    if err.is_connect() || err.is_timeout() {
        ClientError::Network(err.to_string())
    } else {
        ClientError::Http(err)
    }
}

fn status_error(status: StatusCode, text: &str) -> ClientError {
    let body: ApiErrorBody = serde_json::from_str(text).unwrap_or_default();
    let message = body
        .message
        .or(body.error)
        .unwrap_or_else(|| text.trim().to_string());
    let code = body.code.and_then(|c| ErrorCode::try_from(c).ok());

    match status {
        StatusCode::UNAUTHORIZED => ClientError::Unauthorized,
        StatusCode::FORBIDDEN => ClientError::Forbidden(message),
        StatusCode::NOT_FOUND => ClientError::NotFound(message),
        StatusCode::CONFLICT => ClientError::Conflict(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ClientError::Validation {
            code: code.unwrap_or(ErrorCode::ValidationFailed),
            message,
        },
        s if s.is_server_error() => ClientError::Api {
            code: code.unwrap_or(ErrorCode::InternalError),
            message,
        },
        _ => match code {
            Some(code) => ClientError::Api { code, message },
            None => ClientError::Internal(format!("{status}: {message}")),
        },
    }
}

#[async_trait]
impl DispatchApi for NetworkHttpClient {
    fn set_token(&self, token: Option<String>) {
        if let Ok(mut slot) = self.token.write() {
            *slot = token;
        }
    }

    async fn login(&self, request: &LoginRequest) -> ClientResult<LoginResponse> {
        match self.post("auth/login", request).await {
            Err(ClientError::Unauthorized) => Err(ClientError::InvalidCredentials),
            other => other,
        }
    }

    async fn logout(&self) -> ClientResult<()> {
        let _: Value = self.post("auth/logout", &Value::Null).await?;
        Ok(())
    }

    async fn profile(&self) -> ClientResult<UserRecord> {
        let resp: ProfileResponse = self.get("profile").await?;
        Ok(resp.into_user())
    }

    async fn driver_orders(&self) -> ClientResult<Vec<OrderRecord>> {
        let resp: OrdersResponse = self.get("driver/orders").await?;
        Ok(resp.into_records())
    }

    async fn driver_orders_by_id(&self, driver_id: &str) -> ClientResult<Vec<OrderRecord>> {
        let resp: OrdersResponse = self.get(&format!("driver/{driver_id}/orders")).await?;
        Ok(resp.into_records())
    }

    async fn accept_order(&self, order_id: &str) -> ClientResult<()> {
        let _: Value = self
            .put::<_, ()>(&format!("driver/orders/{order_id}/accept"), None)
            .await?;
        Ok(())
    }

    async fn complete_order(&self, order_id: &str) -> ClientResult<()> {
        let _: Value = self
            .put::<_, ()>(&format!("driver/orders/{order_id}/complete"), None)
            .await?;
        Ok(())
    }

    async fn cancel_order(&self, order_id: &str) -> ClientResult<()> {
        let _: Value = self
            .put::<_, ()>(&format!("driver/orders/{order_id}/cancel"), None)
            .await?;
        Ok(())
    }

    async fn earnings(&self) -> ClientResult<EarningsRecord> {
        let resp: EarningsResponse = self.get("driver/earnings").await?;
        Ok(resp.into_record())
    }

    async fn withdrawals(&self) -> ClientResult<Vec<WithdrawalRecord>> {
        let resp: WithdrawalsResponse = self.get("driver/withdrawals").await?;
        Ok(resp.into_records())
    }

    async fn create_withdrawal(&self, request: &NewWithdrawal) -> ClientResult<WithdrawalRecord> {
        let resp: WithdrawalResponse = self.post("driver/withdrawals", request).await?;
        Ok(resp.into_record())
    }

    async fn online_status(&self) -> ClientResult<OnlineStatusRecord> {
        self.get("driver/online-status").await
    }

    async fn set_online_status(&self, is_online: bool) -> ClientResult<OnlineStatusRecord> {
        let body = OnlineStatusRecord::new(is_online);
        // Some deployments answer with only a message
        let resp: Option<OnlineStatusRecord> =
            self.put("driver/online-status", Some(&body)).await?;
        Ok(resp.unwrap_or_default())
    }

    async fn push_location(&self, update: &LocationUpdate) -> ClientResult<()> {
        let _: Value = self.post("driver/location", update).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, ""),
            ClientError::Unauthorized
        ));
        assert!(matches!(
            status_error(StatusCode::CONFLICT, r#"{"message":"Order already accepted"}"#),
            ClientError::Conflict(m) if m == "Order already accepted"
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, "gone"),
            ClientError::NotFound(m) if m == "gone"
        ));
        assert!(matches!(
            status_error(StatusCode::UNPROCESSABLE_ENTITY, r#"{"error":"amount too small","code":5002}"#),
            ClientError::Validation { code: ErrorCode::WithdrawalBelowMinimum, .. }
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, ""),
            ClientError::Api { code: ErrorCode::InternalError, .. }
        ));
        assert!(matches!(
            status_error(StatusCode::IM_A_TEAPOT, "short and stout"),
            ClientError::Internal(_)
        ));
    }

    #[test]
    fn test_base_url_trimmed() {
        let client = NetworkHttpClient::new(&ClientConfig::new("http://dispatch.test/api/")).unwrap();
        assert_eq!(client.base_url(), "http://dispatch.test/api");
        client.set_token(Some("abc".into()));
        assert_eq!(client.auth_header().as_deref(), Some("Bearer abc"));
        client.set_token(None);
        assert!(client.auth_header().is_none());
    }
}
