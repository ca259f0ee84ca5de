use async_trait::async_trait;
use serde_json::{json, Map, Value};

use camber_types::{ToolResult, ToolSchema, UiComponent};

use crate::Tool;

const FORECAST_DAYS: usize = 5;

/// Current conditions and short forecast from wttr.in's JSON endpoint.
/// Credential-free; temperatures are metric.
pub struct WeatherTool {
    client: reqwest::Client,
}

impl WeatherTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for WeatherTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "get_weather_info".to_string(),
            description:
                "Get current weather for a city or location, e.g. \"New York\" or \"London\"."
                    .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "location": {
                        "type": "string",
                        "description": "The city or location to get weather for"
                    }
                },
                "required": ["location"]
            }),
        }
    }

    async fn execute(&self, args: &Map<String, Value>) -> ToolResult {
        let location = args
            .get("location")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .trim()
            .to_string();
        // wttr.in takes the location in the path; `+` stands in for spaces
        let url = format!("https://wttr.in/{}?format=j1", location.replace(' ', "+"));
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(location = %location, error = %err, "weather request failed");
                return ToolResult::failure_with_details(
                    format!("error retrieving weather information for {location}"),
                    err.to_string(),
                );
            }
        };
        let data: Value = match response.json().await {
            Ok(data) => data,
            Err(err) => {
                return ToolResult::failure_with_details(
                    format!("error retrieving weather information for {location}"),
                    err.to_string(),
                )
            }
        };
        parse_wttr_report(&location, &data)
    }
}

fn parse_wttr_report(location: &str, data: &Value) -> ToolResult {
    let Some(current) = data
        .get("current_condition")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
    else {
        return ToolResult::failure(format!("could not retrieve weather for {location}"));
    };

    let temperature = field_i64(current, "temp_C");
    let humidity = field_i64(current, "humidity");
    let wind_speed = field_i64(current, "windspeedKmph");
    let condition = current
        .get("weatherDesc")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|v| v.get("value"))
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown")
        .to_string();

    let forecast = data
        .get("weather")
        .and_then(|v| v.as_array())
        .map(|days| {
            days.iter()
                .take(FORECAST_DAYS)
                .map(|day| {
                    json!({
                        "date": day.get("date").and_then(|v| v.as_str()).unwrap_or_default(),
                        "temperature": field_i64(day, "avgtempC"),
                        "description": midday_description(day),
                    })
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let mut fields = Map::new();
    fields.insert("location".to_string(), json!(location));
    fields.insert("temperature".to_string(), json!(temperature));
    fields.insert("condition".to_string(), json!(condition));
    fields.insert("humidity".to_string(), json!(humidity));
    fields.insert("wind_speed".to_string(), json!(wind_speed));
    fields.insert("forecast".to_string(), json!(forecast));

    ToolResult::success_with_ui(
        fields,
        UiComponent::new(
            "weather_card",
            json!({
                "location": location,
                "temperature": temperature,
                "condition": condition,
                "humidity": humidity
            }),
        ),
    )
}

// wttr.in encodes numbers as strings ("72", not 72)
fn field_i64(node: &Value, key: &str) -> i64 {
    node.get(key)
        .and_then(|v| v.as_str())
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0)
}

fn midday_description(day: &Value) -> String {
    let hourly = day.get("hourly").and_then(|v| v.as_array());
    hourly
        .and_then(|arr| arr.get(4).or_else(|| arr.first()))
        .and_then(|h| h.get("weatherDesc"))
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|v| v.get("value"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> Value {
        json!({
            "current_condition": [{
                "temp_C": "22",
                "humidity": "65",
                "windspeedKmph": "14",
                "weatherDesc": [{"value": "Sunny"}]
            }],
            "weather": [
                {
                    "date": "2024-05-03",
                    "avgtempC": "21",
                    "hourly": [
                        {"weatherDesc": [{"value": "Clear"}]},
                        {"weatherDesc": [{"value": "Clear"}]},
                        {"weatherDesc": [{"value": "Sunny"}]},
                        {"weatherDesc": [{"value": "Sunny"}]},
                        {"weatherDesc": [{"value": "Partly cloudy"}]}
                    ]
                },
                {
                    "date": "2024-05-04",
                    "avgtempC": "19",
                    "hourly": [{"weatherDesc": [{"value": "Rain"}]}]
                }
            ]
        })
    }

    #[test]
    fn parses_current_conditions_and_card_hint() {
        let result = parse_wttr_report("New York", &sample_report());
        let value = result.to_value();
        assert_eq!(value["location"], "New York");
        assert_eq!(value["temperature"], 22);
        assert_eq!(value["condition"], "Sunny");
        assert_eq!(value["humidity"], 65);
        assert_eq!(value["wind_speed"], 14);
        assert_eq!(value["ui_component"]["type"], "weather_card");
        assert_eq!(value["ui_component"]["data"]["temperature"], 22);
    }

    #[test]
    fn forecast_takes_midday_description_per_day() {
        let value = parse_wttr_report("New York", &sample_report()).to_value();
        let forecast = value["forecast"].as_array().expect("forecast list");
        assert_eq!(forecast.len(), 2);
        assert_eq!(forecast[0]["date"], "2024-05-03");
        assert_eq!(forecast[0]["temperature"], 21);
        assert_eq!(forecast[0]["description"], "Partly cloudy");
        assert_eq!(forecast[1]["description"], "Rain");
    }

    #[test]
    fn missing_current_condition_is_a_failure() {
        let result = parse_wttr_report("Nowhere", &json!({}));
        assert!(result.is_failure());
        assert!(result.to_value()["error"]
            .as_str()
            .expect("error text")
            .contains("Nowhere"));
    }
}
