//! Boot-time validation: configuration ranges, provider credentials,
//! writable directories, and port availability. Any failure here aborts
//! startup with a diagnostic — the process never limps along half-wired.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::net::TcpListener;
use tracing::info;

use conclave_core::config::ConclaveConfig;
use conclave_provider::anthropic::AnthropicProvider;
use conclave_provider::openai::OpenAiProvider;
use conclave_provider::LlmProvider;

/// Validate everything that can fail at boot and bind the listen socket.
/// The bound listener is returned so there is no window between the check
/// and the actual bind.
pub async fn validate_boot(config: &ConclaveConfig) -> anyhow::Result<TcpListener> {
    config.validate().context("configuration validation failed")?;

    if config.providers.anthropic.is_none() && config.providers.openai.is_none() {
        bail!("no LLM provider configured; set ANTHROPIC_API_KEY or OPENAI_API_KEY");
    }
    if let Some(a) = &config.providers.anthropic {
        if a.api_key.trim().is_empty() {
            bail!("anthropic provider configured with an empty api key");
        }
    }
    if let Some(o) = &config.providers.openai {
        if o.api_key.trim().is_empty() {
            bail!("openai provider configured with an empty api key");
        }
    }

    ensure_writable(&config.memory.dir)
        .await
        .with_context(|| format!("memory dir not writable: {}", config.memory.dir))?;
    ensure_writable(&config.memory.sessions_dir)
        .await
        .with_context(|| format!("sessions dir not writable: {}", config.memory.sessions_dir))?;

    let addr = format!("{}:{}", config.gateway.bind, config.gateway.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!(addr = %addr, "listen socket bound");
    Ok(listener)
}

/// Pick the chat provider: Anthropic when configured, otherwise OpenAI.
/// `validate_boot` has already guaranteed at least one exists.
pub fn select_provider(config: &ConclaveConfig) -> anyhow::Result<Arc<dyn LlmProvider>> {
    if let Some(a) = &config.providers.anthropic {
        return Ok(Arc::new(AnthropicProvider::new(
            a.api_key.clone(),
            a.base_url.clone(),
            a.model.clone(),
        )));
    }
    if let Some(o) = &config.providers.openai {
        return Ok(Arc::new(OpenAiProvider::new(
            o.api_key.clone(),
            o.base_url.clone(),
            o.model.clone(),
        )));
    }
    bail!("no LLM provider configured")
}

async fn ensure_writable(dir: &str) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let probe = Path::new(dir).join(".write-probe");
    tokio::fs::write(&probe, b"ok").await?;
    tokio::fs::remove_file(&probe).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::config::AnthropicConfig;

    fn config_in(dir: &std::path::Path) -> ConclaveConfig {
        let mut config = ConclaveConfig::default();
        config.gateway.admin_token = Some("secret".to_string());
        config.gateway.port = 0; // replaced per test
        config.memory.dir = dir.join("memory").display().to_string();
        config.memory.sessions_dir = dir.join("sessions").display().to_string();
        config.providers.anthropic = Some(AnthropicConfig {
            api_key: "sk-test".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-sonnet-4-5".to_string(),
        });
        config
    }

    #[tokio::test]
    async fn boot_fails_without_any_provider() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = config_in(tmp.path());
        config.gateway.port = 39_311;
        config.providers.anthropic = None;
        let err = validate_boot(&config).await.unwrap_err();
        assert!(err.to_string().contains("no LLM provider"));
    }

    #[tokio::test]
    async fn boot_fails_on_empty_api_key() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = config_in(tmp.path());
        config.gateway.port = 39_312;
        config.providers.anthropic.as_mut().unwrap().api_key = "  ".to_string();
        assert!(validate_boot(&config).await.is_err());
    }

    #[tokio::test]
    async fn boot_binds_and_creates_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = config_in(tmp.path());
        config.gateway.port = 39_313;
        let listener = validate_boot(&config).await.unwrap();
        assert_eq!(listener.local_addr().unwrap().port(), 39_313);
        assert!(tmp.path().join("memory").is_dir());
    }

    #[tokio::test]
    async fn occupied_port_is_a_boot_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = config_in(tmp.path());
        config.gateway.port = 39_314;
        let _held = validate_boot(&config).await.unwrap();
        let err = validate_boot(&config).await.unwrap_err();
        assert!(err.to_string().contains("cannot bind"));
    }
}
