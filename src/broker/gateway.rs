//! REST client for the broker-gateway bridge.
//!
//! The gateway is a localhost sidecar that fronts the actual brokerage
//! session; this client only speaks its JSON API. Every call carries a
//! timeout and reads are retried once on transport or server failure.
//! Order submission is deliberately never retried: a duplicate order is
//! worse than a missed one, and the next allocation run re-nets anyway.

use crate::broker::traits::Broker;
use crate::broker::types::{
    AccountValue, Holding, Instrument, OpenOrder, OrderTicket, PlacedOrder,
};
use crate::config::BrokerConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Broker implementation backed by the gateway REST bridge.
pub struct GatewayBroker {
    http: Client,
    base_url: String,
    account: String,
    call_timeout: Duration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlaceOrderRequest<'a> {
    account: &'a str,
    #[serde(flatten)]
    ticket: &'a OrderTicket,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    #[serde(with = "rust_decimal::serde::str")]
    price: Decimal,
}

impl GatewayBroker {
    /// Create a new gateway client from configuration.
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let call_timeout = Duration::from_secs(config.call_timeout_secs);
        let http = Client::builder()
            .timeout(call_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            account: config.account.clone(),
            call_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET with one retry on transport error, timeout or 5xx.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = self.url(path);
        let mut last_err = None;

        for attempt in 1..=2u8 {
            let send = self.http.get(&url).query(query).send();
            match tokio::time::timeout(self.call_timeout, send).await {
                Ok(Ok(response)) => {
                    let status = response.status();
                    if status.is_server_error() {
                        warn!(%url, %status, attempt, "Gateway returned server error");
                        last_err = Some(anyhow!("gateway returned {status} for {url}"));
                    } else {
                        return response
                            .error_for_status()
                            .with_context(|| format!("Gateway rejected GET {url}"))?
                            .json()
                            .await
                            .with_context(|| format!("Failed to parse response from {url}"));
                    }
                }
                Ok(Err(e)) => {
                    warn!(%url, attempt, error = %e, "Gateway request failed");
                    last_err = Some(anyhow!(e).context(format!("GET {url} failed")));
                }
                Err(_) => {
                    warn!(%url, attempt, timeout = ?self.call_timeout, "Gateway request timed out");
                    last_err = Some(anyhow!("GET {url} timed out after {:?}", self.call_timeout));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("GET {url} failed")))
    }
}

#[async_trait]
impl Broker for GatewayBroker {
    #[instrument(skip(self), fields(symbol = %instrument.symbol))]
    async fn qualify_instrument(&self, instrument: &Instrument) -> Result<Instrument> {
        let query = [
            ("symbol", instrument.symbol.clone()),
            ("secType", instrument.security_type.code().to_string()),
            ("exchange", instrument.exchange.clone()),
            ("currency", instrument.currency.clone()),
        ];
        let qualified: Instrument = self.get_json("/v1/contracts/qualify", &query).await?;
        if qualified.contract_id.is_none() {
            return Err(anyhow!(
                "gateway could not qualify {}",
                instrument.composite()
            ));
        }
        debug!(
            symbol = %qualified.symbol,
            con_id = qualified.contract_id,
            "Contract qualified"
        );
        Ok(qualified)
    }

    #[instrument(skip(self))]
    async fn open_orders(&self) -> Result<Vec<OpenOrder>> {
        self.get_json("/v1/orders/open", &[("account", self.account.clone())])
            .await
    }

    #[instrument(skip(self))]
    async fn portfolio_positions(&self) -> Result<Vec<Holding>> {
        self.get_json("/v1/positions", &[("account", self.account.clone())])
            .await
    }

    async fn place_order(&self, ticket: &OrderTicket) -> Result<PlacedOrder> {
        let url = self.url("/v1/orders");
        let body = PlaceOrderRequest {
            account: &self.account,
            ticket,
        };

        let send = self.http.post(&url).json(&body).send();
        let response = tokio::time::timeout(self.call_timeout, send)
            .await
            .map_err(|_| anyhow!("order submission timed out after {:?}", self.call_timeout))?
            .with_context(|| format!("POST {url} failed"))?;

        response
            .error_for_status()
            .with_context(|| {
                format!(
                    "Gateway rejected {} {} x {}",
                    ticket.action, ticket.quantity, ticket.instrument.symbol
                )
            })?
            .json()
            .await
            .context("Failed to parse order acknowledgement")
    }

    async fn cancel_order(&self, order_id: i64) -> Result<()> {
        let url = self.url(&format!("/v1/orders/{order_id}"));
        let send = self.http.delete(&url).send();
        let response = tokio::time::timeout(self.call_timeout, send)
            .await
            .map_err(|_| anyhow!("cancel of order {order_id} timed out"))?
            .with_context(|| format!("DELETE {url} failed"))?;
        response
            .error_for_status()
            .with_context(|| format!("Gateway refused to cancel order {order_id}"))?;
        Ok(())
    }

    async fn account_value(&self, tag: &str, currency: &str) -> Result<Decimal> {
        let values = self.account_values().await?;
        values
            .iter()
            .find(|v| v.tag == tag && v.currency == currency)
            .map(|v| v.value)
            .ok_or_else(|| anyhow!("account value {tag} ({currency}) not reported by gateway"))
    }

    #[instrument(skip(self))]
    async fn account_values(&self) -> Result<Vec<AccountValue>> {
        self.get_json("/v1/account/values", &[("account", self.account.clone())])
            .await
    }

    async fn market_price(&self, instrument: &Instrument) -> Result<Decimal> {
        let con_id = instrument
            .contract_id
            .ok_or_else(|| anyhow!("market price requires a qualified instrument"))?;
        let response: PriceResponse = self
            .get_json("/v1/market/price", &[("conId", con_id.to_string())])
            .await?;
        Ok(response.price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::types::{OrderAction, OrderKind, TimeInForce};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> BrokerConfig {
        BrokerConfig {
            base_url,
            account: "DU123456".to_string(),
            call_timeout_secs: 2,
            order_grace_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_qualify_instrument() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/contracts/qualify"))
            .and(query_param("symbol", "SPY"))
            .and(query_param("secType", "STK"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "conId": 756733,
                "symbol": "SPY",
                "secType": "STK",
                "exchange": "ARCA",
                "currency": "USD",
                "localSymbol": "SPY"
            })))
            .mount(&server)
            .await;

        let broker = GatewayBroker::new(&test_config(server.uri())).unwrap();
        let qualified = broker
            .qualify_instrument(&Instrument::stock("SPY", "ARCA", "USD"))
            .await
            .unwrap();

        assert_eq!(qualified.contract_id, Some(756733));
        assert_eq!(qualified.local_symbol.as_deref(), Some("SPY"));
    }

    #[tokio::test]
    async fn test_get_retries_once_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/orders/open"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/orders/open"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let broker = GatewayBroker::new(&test_config(server.uri())).unwrap();
        let orders = broker.open_orders().await.unwrap();
        assert!(orders.is_empty());
    }

    #[tokio::test]
    async fn test_account_value_filters_by_tag_and_currency() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/account/values"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"tag": "NetLiquidation", "currency": "USD", "value": "100000.50"},
                {"tag": "NetLiquidation", "currency": "EUR", "value": "91000.00"},
                {"tag": "AvailableFunds", "currency": "USD", "value": "25000.00"}
            ])))
            .mount(&server)
            .await;

        let broker = GatewayBroker::new(&test_config(server.uri())).unwrap();
        let value = broker.account_value("NetLiquidation", "USD").await.unwrap();
        assert_eq!(value.to_string(), "100000.50");

        let missing = broker.account_value("BuyingPower", "USD").await;
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn test_place_order_posts_ticket_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "orderId": 42,
                "contract": {
                    "conId": 756733,
                    "symbol": "SPY",
                    "secType": "STK",
                    "exchange": "ARCA",
                    "currency": "USD"
                },
                "action": "BUY",
                "quantity": 8,
                "status": "Submitted"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let broker = GatewayBroker::new(&test_config(server.uri())).unwrap();
        let mut instrument = Instrument::stock("SPY", "ARCA", "USD");
        instrument.contract_id = Some(756733);

        let ticket = OrderTicket {
            instrument,
            action: OrderAction::Buy,
            quantity: 8,
            kind: OrderKind::Market,
            limit_price: None,
            tif: TimeInForce::Gtc,
        };

        let placed = broker.place_order(&ticket).await.unwrap();
        assert_eq!(placed.order_id, 42);
        assert_eq!(placed.quantity, 8);
    }
}
