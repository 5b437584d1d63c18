//! Weather tool - fixed-answer lookup

use async_trait::async_trait;
use serde_json::{json, Value};
use crate::Result;
use super::Tool;

const FORECAST: &str = "晴れ時々くもり、気温は22度です。過ごしやすい天気ですね！";

/// Returns the current weather
pub struct WeatherTool;

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str { "weather" }
    fn description(&self) -> &str { "現在の天気を取得します" }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _params: Value) -> Result<String> {
        Ok(FORECAST.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_weather_ignores_arguments() {
        let a = WeatherTool.execute(json!({})).await.unwrap();
        let b = WeatherTool.execute(json!({"city": "Tokyo"})).await.unwrap();
        assert_eq!(a, b);
        assert!(a.contains("22度"));
    }
}
