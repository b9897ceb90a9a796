use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// What happens once a tool has failed and its retries are used up.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    #[default]
    Raise,
    ReturnError,
    ReturnNone,
}

impl FromStr for OnError {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "raise" => Ok(Self::Raise),
            "return_error" => Ok(Self::ReturnError),
            "return_none" => Ok(Self::ReturnNone),
            other => Err(format!(
                "unknown on_error mode '{}': expected raise, return_error or return_none",
                other
            )),
        }
    }
}

impl fmt::Display for OnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raise => write!(f, "raise"),
            Self::ReturnError => write!(f, "return_error"),
            Self::ReturnNone => write!(f, "return_none"),
        }
    }
}

/// JSON schema compiled once and checked against every successful tool result.
#[derive(Clone)]
pub struct OutputSchema {
    schema: Value,
    validator: Arc<jsonschema::Validator>,
}

impl OutputSchema {
    pub fn new(schema: Value) -> Result<Self, String> {
        let validator = jsonschema::validator_for(&schema)
            .map_err(|e| format!("invalid output schema: {}", e))?;
        Ok(Self {
            schema,
            validator: Arc::new(validator),
        })
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub fn validate(&self, value: &Value) -> Result<(), String> {
        match self.validator.iter_errors(value).next() {
            Some(error) => Err(error.to_string()),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for OutputSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OutputSchema").field(&self.schema).finish()
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionPolicy {
    pub timeout: Option<Duration>,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub retry_backoff: bool,
    pub on_error: OnError,
    pub output_schema: Option<OutputSchema>,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            timeout: None,
            max_retries: 0,
            retry_delay: DEFAULT_RETRY_DELAY,
            retry_backoff: true,
            on_error: OnError::Raise,
            output_schema: None,
        }
    }
}

impl ExecutionPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait before the given retry (1-based). With backoff the first retry waits
    /// `retry_delay` and every following one doubles it.
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        if !self.retry_backoff || retry <= 1 {
            return self.retry_delay;
        }
        let factor = 2u32.saturating_pow(retry - 1);
        self.retry_delay.saturating_mul(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn backoff_doubles_from_first_retry() {
        let policy = ExecutionPolicy {
            retry_delay: Duration::from_secs(1),
            retry_backoff: true,
            ..Default::default()
        };
        assert_eq!(policy.delay_before_retry(1), Duration::from_secs(1));
        assert_eq!(policy.delay_before_retry(2), Duration::from_secs(2));
        assert_eq!(policy.delay_before_retry(3), Duration::from_secs(4));
    }

    #[test]
    fn fixed_delay_without_backoff() {
        let policy = ExecutionPolicy {
            retry_delay: Duration::from_millis(250),
            retry_backoff: false,
            ..Default::default()
        };
        assert_eq!(policy.delay_before_retry(1), Duration::from_millis(250));
        assert_eq!(policy.delay_before_retry(5), Duration::from_millis(250));
    }

    #[test]
    fn huge_retry_count_saturates() {
        let policy = ExecutionPolicy::default();
        assert_eq!(
            policy.delay_before_retry(200),
            Duration::from_secs(u64::from(u32::MAX))
        );
        assert_eq!(
            ExecutionPolicy {
                max_retries: u32::MAX,
                ..Default::default()
            }
            .max_attempts(),
            u32::MAX
        );
    }

    #[test]
    fn on_error_parsing() {
        assert_eq!("return_error".parse::<OnError>().unwrap(), OnError::ReturnError);
        assert_eq!(" RAISE ".parse::<OnError>().unwrap(), OnError::Raise);
        assert!("ignore".parse::<OnError>().is_err());
        assert_eq!(OnError::ReturnNone.to_string(), "return_none");
    }

    #[test]
    fn output_schema_validation() {
        let schema = OutputSchema::new(json!({
            "type": "object",
            "properties": {"temp": {"type": "number"}},
            "required": ["temp"]
        }))
        .unwrap();

        assert!(schema.validate(&json!({"temp": 21.5})).is_ok());
        assert!(schema.validate(&json!({"temp": "warm"})).is_err());
        assert!(schema.validate(&json!("sunny")).is_err());
    }

    #[test]
    fn invalid_output_schema_is_rejected() {
        assert!(OutputSchema::new(json!({"type": 12})).is_err());
    }
}
