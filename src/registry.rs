//! Regex-indexed dispatch to validator variants.
//!
//! Validators are compiled from the validate configuration at startup; the
//! first validator whose regex matches a destination is selected. Without
//! any configuration every remote link goes through a strict round-trip
//! check.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::config::{ValidateConfig, ValidatorType};
use crate::error::{CheckError, Result};

const GITHUB_API_URL: &str = "https://api.github.com/repos";

/// Matches the user-supplied GitHub pulls/issues pattern
/// `(^http[s]?:\/\/)(www\.)?(github\.com\/){ORG}\/{REPO}(\/pull\/|\/issues\/)`
/// and captures the org and repo names (inception again).
static GITHUB_REPO_FROM_PATTERN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\(\^http\[s\]\?:\\/\\/\)\(www\\\.\)\?\(github\\\.com\\/\)(?P<org>[A-Za-z0-9_.-]+)\\/(?P<repo>[A-Za-z0-9_.-]+)\(\\/pull\\/\|\\/issues\\/\)",
    )
    .expect("static pattern")
});

#[derive(Debug, Deserialize)]
struct GitHubResponse {
    number: u64,
}

/// A compiled validator variant.
#[derive(Debug, Clone)]
pub enum Validator {
    RoundTrip {
        regex: Regex,
    },
    /// Accepts issue/PR numbers up to the latest number known at build
    /// time; larger numbers fall through to a round-trip check.
    GitHubPullsIssues {
        regex: Regex,
        max_num: u64,
    },
    Ignore {
        regex: Regex,
    },
}

/// Dispatch decision for one destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Perform a round-trip HTTP check.
    RoundTrip,
    /// Accepted by an ignore validator without a network call.
    AcceptedIgnore,
    /// Accepted by the GitHub shortcut without a network call.
    AcceptedGitHub,
}

/// Ordered validator list compiled from configuration.
#[derive(Debug, Default)]
pub struct ValidatorRegistry {
    validators: Vec<Validator>,
}

impl ValidatorRegistry {
    /// Compile the configured validators. GitHub validators preflight the
    /// REST API once per repo to learn the latest pull/issue number.
    pub async fn build(config: &ValidateConfig, client: &reqwest::Client) -> Result<Self> {
        let mut validators = Vec::with_capacity(config.validators.len());
        for spec in &config.validators {
            match spec.kind {
                Some(ValidatorType::RoundTrip) => {
                    validators.push(Validator::RoundTrip {
                        regex: compile(&spec.regex)?,
                    });
                }
                Some(ValidatorType::Ignore) => {
                    validators.push(Validator::Ignore {
                        regex: compile(&spec.regex)?,
                    });
                }
                Some(ValidatorType::GitHubPullsIssues) => {
                    let repo = repo_from_pattern(&spec.regex)?;
                    let max_num =
                        github_max_number(client, &repo, spec.token.as_deref()).await.map_err(
                            |e| e.wrap("parsing githubPullsIssues regex"),
                        )?;
                    validators.push(Validator::GitHubPullsIssues {
                        regex: compile(&spec.regex)?,
                        max_num,
                    });
                }
                None => {
                    return Err(CheckError::Config(
                        "validator type not supported".to_string(),
                    ));
                }
            }
        }
        Ok(Self { validators })
    }

    /// Decide how to validate the destination: first matching validator in
    /// declared order wins, defaulting to a strict round-trip check.
    pub fn dispatch(&self, dest: &str) -> Decision {
        for validator in &self.validators {
            match validator {
                Validator::RoundTrip { regex } => {
                    if regex.is_match(dest) {
                        return Decision::RoundTrip;
                    }
                }
                Validator::Ignore { regex } => {
                    if regex.is_match(dest) {
                        return Decision::AcceptedIgnore;
                    }
                }
                Validator::GitHubPullsIssues { regex, max_num } => {
                    if let Some(m) = regex.find(dest) {
                        // The number starts where the regex match ends;
                        // split off any section fragment.
                        let number = dest[m.end()..]
                            .split('#')
                            .next()
                            .and_then(|n| n.parse::<u64>().ok());
                        match number {
                            Some(n) if n <= *max_num => return Decision::AcceptedGitHub,
                            _ => return Decision::RoundTrip,
                        }
                    }
                }
            }
        }
        Decision::RoundTrip
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| CheckError::Config(format!("compiling validator regex {:?}: {}", pattern, e)))
}

/// Extract `org/repo` from the user-supplied pulls/issues pattern, failing
/// with guidance when the pattern does not have the expected shape.
fn repo_from_pattern(pattern: &str) -> Result<String> {
    let caps = GITHUB_REPO_FROM_PATTERN_RE.captures(pattern).ok_or_else(|| {
        CheckError::Config(
            r"GitHub PR/Issue regex not valid. Correct regex: (^http[s]?:\/\/)(www\.)?(github\.com\/){ORG_NAME}\/{REPO_NAME}(\/pull\/|\/issues\/)"
                .to_string(),
        )
    })?;
    Ok(format!("{}/{}", &caps["org"], &caps["repo"]))
}

/// Query the latest pull request and issue numbers for the repo and return
/// the larger of the two. An empty response array counts as zero.
async fn github_max_number(
    client: &reqwest::Client,
    repo: &str,
    token: Option<&str>,
) -> Result<u64> {
    let mut max = 0;
    for kind in ["pulls", "issues"] {
        let url = format!(
            "{}/{}/{}?sort=created&direction=desc&per_page=1",
            GITHUB_API_URL, repo, kind
        );
        // All GitHub API requests need a User-Agent header.
        let mut req = client.get(&url).header(reqwest::header::USER_AGENT, "mdkit");
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.map_err(CheckError::from)?;
        if resp.status().as_u16() != 200 {
            return Err(CheckError::Config(format!(
                "{} API request failed. status code: {}",
                kind,
                resp.status().as_u16()
            )));
        }
        let body = resp.bytes().await.map_err(CheckError::from)?;
        let numbers: Vec<GitHubResponse> = serde_json::from_slice(&body)
            .map_err(|e| CheckError::Config(format!("decoding {} API response: {}", kind, e)))?;
        if let Some(first) = numbers.first() {
            max = max.max(first.number);
        }
    }
    Ok(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GH_PATTERN: &str =
        r"(^http[s]?:\/\/)(www\.)?(github\.com\/)org\/repo(\/pull\/|\/issues\/)";

    #[test]
    fn test_repo_from_pattern() {
        assert_eq!(repo_from_pattern(GH_PATTERN).unwrap(), "org/repo");

        let err = repo_from_pattern("github.com/org/repo").unwrap_err();
        assert!(err.to_string().contains("GitHub PR/Issue regex not valid"));
    }

    #[test]
    fn test_dispatch_defaults_to_round_trip() {
        let registry = ValidatorRegistry::default();
        assert_eq!(
            registry.dispatch("https://example.com/x"),
            Decision::RoundTrip
        );
    }

    #[test]
    fn test_dispatch_first_match_wins() {
        let registry = ValidatorRegistry {
            validators: vec![
                Validator::Ignore {
                    regex: Regex::new("example.com").unwrap(),
                },
                Validator::RoundTrip {
                    regex: Regex::new(".*").unwrap(),
                },
            ],
        };
        assert_eq!(
            registry.dispatch("https://example.com/x"),
            Decision::AcceptedIgnore
        );
        assert_eq!(
            registry.dispatch("https://other.com/x"),
            Decision::RoundTrip
        );
    }

    #[test]
    fn test_github_shortcut_bounds() {
        let registry = ValidatorRegistry {
            validators: vec![Validator::GitHubPullsIssues {
                regex: Regex::new(GH_PATTERN).unwrap(),
                max_num: 50,
            }],
        };
        assert_eq!(
            registry.dispatch("https://github.com/org/repo/pull/23"),
            Decision::AcceptedGitHub
        );
        assert_eq!(
            registry.dispatch("https://github.com/org/repo/issues/23#discussion"),
            Decision::AcceptedGitHub
        );
        assert_eq!(
            registry.dispatch("https://github.com/org/repo/issues/60"),
            Decision::RoundTrip
        );
        // Unparsable numbers fall through to the round trip.
        assert_eq!(
            registry.dispatch("https://github.com/org/repo/pull/23/files"),
            Decision::RoundTrip
        );
        // Other repos are not matched by this validator.
        assert_eq!(
            registry.dispatch("https://github.com/other/repo/pull/23"),
            Decision::RoundTrip
        );
    }
}
