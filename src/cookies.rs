use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::fetch::{FetchError, MediaTool};

/// Credential configuration errors are run-fatal: a run that would fail
/// authentication on every unit should not start at all.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Cookie file not found: {0}")]
    MissingCookieFile(PathBuf),

    #[error("Invalid --cookies-from-browser format: {0}")]
    InvalidBrowserSpec(String),

    #[error("--cookies and --cookies-from-browser are mutually exclusive")]
    ConflictingSources,
}

/// Browser cookie source: BROWSER[+KEYRING][:PROFILE][::CONTAINER]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserCookies {
    pub browser: String,
    pub keyring: Option<String>,
    pub profile: Option<String>,
    pub container: Option<String>,
}

impl BrowserCookies {
    pub fn parse(spec: &str) -> Result<Self, CredentialError> {
        let invalid = || CredentialError::InvalidBrowserSpec(spec.to_string());

        let (head, container) = match spec.split_once("::") {
            Some((head, container)) => (head, Some(container.trim())),
            None => (spec, None),
        };
        let (name_part, profile) = match head.split_once(':') {
            Some((name, profile)) => (name, Some(profile.trim())),
            None => (head, None),
        };
        let (browser, keyring) = match name_part.split_once('+') {
            Some((browser, keyring)) => (browser, Some(keyring.trim())),
            None => (name_part, None),
        };

        let browser = browser.trim().to_lowercase();
        if browser.is_empty() {
            return Err(invalid());
        }
        for part in [&keyring, &profile, &container] {
            if matches!(part, Some(value) if value.is_empty()) {
                return Err(invalid());
            }
        }

        Ok(Self {
            browser,
            keyring: keyring.map(|k| k.to_uppercase()),
            profile: profile.map(str::to_string),
            container: container.map(str::to_string),
        })
    }

    /// Render back into the specifier format the download tool accepts.
    pub fn render(&self) -> String {
        let mut spec = self.browser.clone();
        if let Some(keyring) = &self.keyring {
            spec.push('+');
            spec.push_str(keyring);
        }
        if let Some(profile) = &self.profile {
            spec.push(':');
            spec.push_str(profile);
        }
        if let Some(container) = &self.container {
            spec.push_str("::");
            spec.push_str(container);
        }
        spec
    }
}

/// Opaque credential handle passed through to the download tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub cookie_file: Option<PathBuf>,
    pub browser: Option<BrowserCookies>,
}

impl CredentialConfig {
    pub fn from_cli(
        cookie_file: Option<&str>,
        browser_spec: Option<&str>,
    ) -> Result<Self, CredentialError> {
        if cookie_file.is_some() && browser_spec.is_some() {
            return Err(CredentialError::ConflictingSources);
        }

        let cookie_file = match cookie_file {
            Some(raw) => {
                let path = PathBuf::from(raw);
                let resolved = std::fs::canonicalize(&path)
                    .map_err(|_| CredentialError::MissingCookieFile(path))?;
                Some(resolved)
            }
            None => None,
        };
        let browser = browser_spec.map(BrowserCookies::parse).transpose()?;

        Ok(Self { cookie_file, browser })
    }

    pub fn is_provided(&self) -> bool {
        self.cookie_file.is_some() || self.browser.is_some()
    }

    /// Arguments forwarded verbatim to every download-tool invocation.
    pub fn tool_args(&self) -> Vec<String> {
        if let Some(path) = &self.cookie_file {
            vec!["--cookies".to_string(), path.display().to_string()]
        } else if let Some(browser) = &self.browser {
            vec!["--cookies-from-browser".to_string(), browser.render()]
        } else {
            Vec::new()
        }
    }
}

/// Outcome of the credential validation probe.
///
/// Metadata access can succeed while every format selector fails, so
/// "auth ok, formats unavailable" is distinct from an auth failure.
#[derive(Debug)]
pub enum ProbeOutcome {
    AuthOk { selector: String },
    FormatsUnavailable { attempts: Vec<String> },
    AuthFailed { error: FetchError },
}

impl ProbeOutcome {
    pub fn guidance(&self) -> &'static str {
        match self {
            Self::AuthOk { .. } => "Credentials are usable.",
            Self::FormatsUnavailable { .. } => {
                "Metadata access works but no audio format selector succeeded. \
                 The selectors may be too strict for this video, or the account \
                 lacks access to its formats."
            }
            Self::AuthFailed { .. } => {
                "Metadata probe failed. Export fresh cookies from a logged-in \
                 browser session (Netscape format) or pass --cookies-from-browser, \
                 then retry."
            }
        }
    }
}

/// Probe credentials against a known video: metadata first, then each
/// format selector in order. First selector success wins.
pub async fn probe_credentials(
    tool: &dyn MediaTool,
    reference: &str,
    selectors: &[String],
) -> ProbeOutcome {
    let metadata = match tool.probe(reference).await {
        Ok(metadata) => metadata,
        Err(error) => {
            warn!("Metadata probe failed for {}: {}", reference, error);
            return ProbeOutcome::AuthFailed { error };
        }
    };
    info!(
        "Metadata probe ok: {} ({})",
        metadata.id,
        metadata.title.as_deref().unwrap_or("untitled")
    );

    let mut attempts = Vec::new();
    for selector in selectors {
        match tool.check_format(&metadata.id, selector).await {
            Ok(()) => {
                info!("✅ Format selector usable: {}", selector);
                return ProbeOutcome::AuthOk {
                    selector: selector.clone(),
                };
            }
            Err(error) => {
                warn!("Format selector {} failed: {}", selector, error);
                attempts.push(format!("{}: {}", selector, error));
            }
        }
    }

    ProbeOutcome::FormatsUnavailable { attempts }
}

/// Write the probe report next to the dataset for later inspection.
pub async fn write_probe_report(
    path: &Path,
    reference: &str,
    outcome: &ProbeOutcome,
) -> std::io::Result<()> {
    let (status, detail) = match outcome {
        ProbeOutcome::AuthOk { selector } => ("auth_ok", selector.clone()),
        ProbeOutcome::FormatsUnavailable { attempts } => {
            ("formats_unavailable", attempts.join("; "))
        }
        ProbeOutcome::AuthFailed { error } => ("auth_failed", error.to_string()),
    };
    let report = serde_json::json!({
        "reference": reference,
        "status": status,
        "detail": detail,
        "checked_at": chrono::Utc::now().to_rfc3339(),
    });
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, format!("{:#}\n", report)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_browser_only() {
        let cookies = BrowserCookies::parse("firefox").unwrap();
        assert_eq!(cookies.browser, "firefox");
        assert!(cookies.keyring.is_none());
        assert!(cookies.profile.is_none());
        assert!(cookies.container.is_none());
    }

    #[test]
    fn test_parse_browser_with_profile() {
        let cookies = BrowserCookies::parse("firefox:default-release").unwrap();
        assert_eq!(cookies.browser, "firefox");
        assert_eq!(cookies.profile.as_deref(), Some("default-release"));
    }

    #[test]
    fn test_parse_full_spec() {
        let cookies = BrowserCookies::parse("chromium+gnomekeyring:work::personal").unwrap();
        assert_eq!(cookies.browser, "chromium");
        assert_eq!(cookies.keyring.as_deref(), Some("GNOMEKEYRING"));
        assert_eq!(cookies.profile.as_deref(), Some("work"));
        assert_eq!(cookies.container.as_deref(), Some("personal"));
        assert_eq!(cookies.render(), "chromium+GNOMEKEYRING:work::personal");
    }

    #[test]
    fn test_parse_container_without_profile() {
        let cookies = BrowserCookies::parse("firefox::shopping").unwrap();
        assert!(cookies.profile.is_none());
        assert_eq!(cookies.container.as_deref(), Some("shopping"));
    }

    #[test]
    fn test_parse_rejects_empty_parts() {
        assert!(BrowserCookies::parse("").is_err());
        assert!(BrowserCookies::parse("firefox:").is_err());
        assert!(BrowserCookies::parse("firefox::").is_err());
    }

    #[test]
    fn test_mutually_exclusive_sources() {
        let result = CredentialConfig::from_cli(Some("cookies.txt"), Some("firefox"));
        assert!(matches!(result, Err(CredentialError::ConflictingSources)));
    }

    #[test]
    fn test_missing_cookie_file_is_fatal() {
        let result = CredentialConfig::from_cli(Some("/nonexistent/cookies.txt"), None);
        assert!(matches!(result, Err(CredentialError::MissingCookieFile(_))));
    }

    #[test]
    fn test_tool_args_for_browser() {
        let config = CredentialConfig {
            cookie_file: None,
            browser: Some(BrowserCookies::parse("firefox:default").unwrap()),
        };
        assert_eq!(
            config.tool_args(),
            vec!["--cookies-from-browser".to_string(), "firefox:default".to_string()]
        );
    }
}
