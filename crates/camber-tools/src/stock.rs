use async_trait::async_trait;
use serde_json::{json, Map, Value};

use camber_types::{ToolResult, ToolSchema, UiComponent};

use crate::Tool;

const QUOTE_ENDPOINT: &str = "https://www.alphavantage.co/query";

/// Stock quote lookup backed by the Alpha Vantage GLOBAL_QUOTE endpoint.
/// Without `ALPHA_VANTAGE_API_KEY` the documented `demo` key is used, which
/// serves a restricted symbol set but never fails at startup.
pub struct StockTool {
    api_key: String,
    client: reqwest::Client,
}

impl StockTool {
    pub fn from_env() -> Self {
        let api_key = std::env::var("ALPHA_VANTAGE_API_KEY")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "demo".to_string());
        Self::new(api_key)
    }

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Tool for StockTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "get_stock_info".to_string(),
            description:
                "Get the current quote for a stock symbol, e.g. AAPL for Apple Inc."
                    .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "symbol": {
                        "type": "string",
                        "description": "The stock ticker symbol to look up"
                    }
                },
                "required": ["symbol"]
            }),
        }
    }

    async fn execute(&self, args: &Map<String, Value>) -> ToolResult {
        let symbol = args
            .get("symbol")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .trim()
            .to_uppercase();
        let response = match self
            .client
            .get(QUOTE_ENDPOINT)
            .query(&[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", symbol.as_str()),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(symbol = %symbol, error = %err, "stock quote request failed");
                return ToolResult::failure_with_details(
                    format!("error retrieving stock information for {symbol}"),
                    err.to_string(),
                );
            }
        };
        let data: Value = match response.json().await {
            Ok(data) => data,
            Err(err) => {
                return ToolResult::failure_with_details(
                    format!("error retrieving stock information for {symbol}"),
                    err.to_string(),
                )
            }
        };
        parse_global_quote(&symbol, &data)
    }
}

fn parse_global_quote(symbol: &str, data: &Value) -> ToolResult {
    let quote = data
        .get("Global Quote")
        .and_then(|v| v.as_object())
        .filter(|q| !q.is_empty());
    let Some(quote) = quote else {
        let details = data
            .get("Note")
            .or_else(|| data.get("Information"))
            .and_then(|v| v.as_str())
            .unwrap_or("no additional information available")
            .to_string();
        return ToolResult::failure_with_details(
            format!("could not retrieve stock information for {symbol}"),
            details,
        );
    };

    let price = quote_number(quote, "05. price");
    let change = quote_number(quote, "09. change");
    let percent_change = quote
        .get("10. change percent")
        .and_then(|v| v.as_str())
        .unwrap_or("0%")
        .to_string();
    let last_trading_day = quote
        .get("07. latest trading day")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let mut fields = Map::new();
    fields.insert("symbol".to_string(), json!(symbol));
    fields.insert("price".to_string(), json!(price));
    fields.insert("change".to_string(), json!(change));
    fields.insert("percent_change".to_string(), json!(percent_change));
    fields.insert("last_trading_day".to_string(), json!(last_trading_day));

    ToolResult::success_with_ui(
        fields,
        UiComponent::new(
            "stock_chart",
            json!({
                "symbol": symbol,
                "price": price,
                "change": change,
                "percent_change": percent_change
            }),
        ),
    )
}

fn quote_number(quote: &Map<String, Value>, key: &str) -> f64 {
    quote
        .get(key)
        .and_then(|v| v.as_str())
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quote_into_fields_and_chart_hint() {
        let data = json!({
            "Global Quote": {
                "01. symbol": "AAPL",
                "05. price": "150.2500",
                "07. latest trading day": "2024-05-03",
                "09. change": "2.5000",
                "10. change percent": "1.69%"
            }
        });
        let result = parse_global_quote("AAPL", &data);
        let value = result.to_value();
        assert_eq!(value["symbol"], "AAPL");
        assert_eq!(value["price"], 150.25);
        assert_eq!(value["change"], 2.5);
        assert_eq!(value["percent_change"], "1.69%");
        assert_eq!(value["last_trading_day"], "2024-05-03");
        assert_eq!(value["ui_component"]["type"], "stock_chart");
        assert_eq!(value["ui_component"]["data"]["symbol"], "AAPL");
    }

    #[test]
    fn empty_quote_becomes_failure_with_upstream_note() {
        let data = json!({
            "Global Quote": {},
            "Note": "API call frequency exceeded"
        });
        let result = parse_global_quote("ZZZZ", &data);
        assert!(result.is_failure());
        let value = result.to_value();
        assert!(value["error"]
            .as_str()
            .expect("error text")
            .contains("ZZZZ"));
        assert_eq!(value["details"], "API call frequency exceeded");
    }

    #[test]
    fn missing_quote_key_becomes_failure() {
        let result = parse_global_quote("AAPL", &json!({}));
        assert!(result.is_failure());
    }
}
