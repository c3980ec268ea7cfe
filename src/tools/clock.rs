//! Clock 能力：当前本地日期时间

use async_trait::async_trait;
use chrono::format::{Item, StrftimeItems};
use chrono::Local;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::{parameters_schema, Capability};

const DEFAULT_FORMAT: &str = "%A, %B %d, %Y at %I:%M %p";

#[derive(Debug, Default, Deserialize, JsonSchema)]
struct ClockArgs {
    /// strftime 格式串，缺省为 "%A, %B %d, %Y at %I:%M %p"
    #[serde(default)]
    format: Option<String>,
}

pub struct ClockCapability;

/// 按 strftime 格式输出当前本地时间；非法格式返回 Err 而不是 panic
pub fn format_now(format: &str) -> Result<String, String> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(format!("invalid time format: {format:?}"));
    }
    Ok(Local::now()
        .format_with_items(StrftimeItems::new(format))
        .to_string())
}

#[async_trait]
impl Capability for ClockCapability {
    fn name(&self) -> &str {
        "clock"
    }

    fn description(&self) -> &str {
        "Get the current local date and time."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<ClockArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: ClockArgs = serde_json::from_value(args).map_err(|e| e.to_string())?;
        format_now(args.format.as_deref().unwrap_or(DEFAULT_FORMAT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_clock_formats() {
        let year = ClockCapability
            .execute(json!({"format": "%Y"}))
            .await
            .unwrap();
        assert_eq!(year.len(), 4);
        assert!(year.chars().all(|c| c.is_ascii_digit()));

        let default = ClockCapability.execute(json!({})).await.unwrap();
        assert!(default.contains(" at "));
    }

    #[test]
    fn test_invalid_format_is_error() {
        assert!(format_now("%Q").is_err());
    }

    #[test]
    fn test_schema_has_no_required() {
        assert_eq!(ClockCapability.parameters_schema()["required"], json!([]));
    }
}
