//! Provider construction and transient-error retry.
//!
//! Every remote model is reached through an OpenAI-compatible chat
//! completions endpoint (OpenAI, Azure, Ollama, vLLM, LM Studio). The
//! `"mock"` provider name yields a scripted [`MockLlmProvider`] for
//! offline runs.

pub mod openai_compat;

use crate::brain::{LlmProvider, MockLlmProvider};
use crate::config::LlmConfig;
use crate::error::LlmError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use crate::config::RetryConfig;
pub use openai_compat::OpenAiCompatibleProvider;

/// Run `operation` until it succeeds, fails permanently, or the retry budget
/// in `config` is spent.
///
/// Rate limits, connection failures and timeouts are transient; everything
/// else is returned on first sight.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, LlmError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut retries_left = config.max_retries;
    let mut attempt = 0u32;
    loop {
        let err = match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => e,
        };
        if retries_left == 0 || !is_retryable(&err) {
            return Err(err);
        }

        let delay = backoff_delay(config, attempt, &err);
        tracing::warn!(
            retry = attempt + 1,
            max_retries = config.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Transient provider error, retrying"
        );
        tokio::time::sleep(delay).await;
        retries_left -= 1;
        attempt += 1;
    }
}

fn is_retryable(err: &LlmError) -> bool {
    matches!(
        err,
        LlmError::RateLimited { .. } | LlmError::Connection { .. } | LlmError::Timeout { .. }
    )
}

/// Capped exponential delay for the given retry, with up to 25% clock jitter.
/// A rate limit never waits less than the provider asked for.
fn backoff_delay(config: &RetryConfig, attempt: u32, err: &LlmError) -> Duration {
    let exponential =
        config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let mut ms = exponential.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        ms += ms / 4 * clock_permille() / 1000;
    }
    if let LlmError::RateLimited { retry_after_secs } = err {
        ms = ms.max(retry_after_secs.saturating_mul(1000));
    }
    Duration::from_millis(ms)
}

fn clock_permille() -> u64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    u64::from(nanos % 1000)
}

/// Build the provider named by `config.provider`.
///
/// `"mock"` gives an unscripted [`MockLlmProvider`]; any other name is sent
/// to an OpenAI-compatible endpoint. A remote endpoint without its API key
/// fails here rather than on the first request.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.provider.as_str() {
        "mock" => Ok(Arc::new(MockLlmProvider::new())),
        other => {
            if !matches!(other, "openai" | "ollama" | "azure" | "vllm" | "lmstudio") {
                tracing::debug!(
                    provider = other,
                    "Unknown provider name; treating as OpenAI-compatible"
                );
            }
            Ok(Arc::new(OpenAiCompatibleProvider::new(config)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_config(provider: &str) -> LlmConfig {
        LlmConfig {
            provider: provider.to_string(),
            api_key_env: "VERITAS_TEST_PROVIDER_KEY_UNSET".to_string(),
            ..LlmConfig::default()
        }
    }

    fn no_wait() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    #[test]
    fn test_create_provider_mock() {
        let provider = create_provider(&test_config("mock")).unwrap();
        assert_eq!(provider.model_name(), "mock-model");
    }

    #[test]
    fn test_create_provider_local_openai_compatible() {
        let mut config = test_config("ollama");
        config.base_url = Some("http://127.0.0.1:11434/v1".to_string());
        config.model = "llama3.2:3b".to_string();
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "llama3.2:3b");
        assert!(provider.supports_json_mode());
    }

    #[test]
    fn test_create_provider_missing_key() {
        let result = create_provider(&test_config("openai"));
        assert!(matches!(result, Err(LlmError::AuthFailed { .. })));
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&LlmError::RateLimited {
            retry_after_secs: 30
        }));
        assert!(is_retryable(&LlmError::Connection {
            message: "reset".into()
        }));
        assert!(is_retryable(&LlmError::Timeout { timeout_secs: 30 }));
        assert!(!is_retryable(&LlmError::AuthFailed {
            provider: "test".into()
        }));
        assert!(!is_retryable(&LlmError::ResponseParse {
            message: "bad json".into()
        }));
    }

    fn no_jitter(initial: u64, cap: u64) -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_backoff_ms: initial,
            max_backoff_ms: cap,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let config = no_jitter(1000, 3000);
        let err = LlmError::Timeout { timeout_secs: 1 };
        let delays: Vec<u128> = (0..4)
            .map(|attempt| backoff_delay(&config, attempt, &err).as_millis())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 3000, 3000]);
    }

    #[test]
    fn test_backoff_jitter_stays_within_quarter() {
        let config = RetryConfig {
            jitter: true,
            ..no_jitter(1000, 60000)
        };
        let err = LlmError::Connection {
            message: "reset".into(),
        };
        let delay = backoff_delay(&config, 0, &err).as_millis();
        assert!((1000..=1250).contains(&delay));
    }

    #[test]
    fn test_backoff_rate_limit_uses_server_value() {
        let err = LlmError::RateLimited {
            retry_after_secs: 30,
        };
        assert_eq!(
            backoff_delay(&no_jitter(1000, 60000), 0, &err),
            Duration::from_secs(30)
        );
    }

    #[tokio::test]
    async fn test_with_retry_recovers_from_transient_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = with_retry(&no_wait(), || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(LlmError::Connection {
                        message: "reset".into(),
                    })
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = with_retry(&no_wait(), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(LlmError::Timeout { timeout_secs: 1 })
            }
        })
        .await;
        assert!(matches!(result, Err(LlmError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_permanent_error_no_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = with_retry(&no_wait(), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(LlmError::AuthFailed {
                    provider: "test".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
