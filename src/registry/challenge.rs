//! The registry auth challenge as an explicit state machine, decoupled from
//! the HTTP layer so the transitions can be tested with canned responses.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{DrydockError, Result};

fn realm_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"realm="(.+?)""#).expect("static pattern"))
}

fn service_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"service="(.+?)""#).expect("static pattern"))
}

/// What the `GET /v2/` probe answered, reduced to the parts the flow needs.
#[derive(Debug, Clone)]
pub struct ChallengeResponse {
    pub status: u16,
    pub www_authenticate: Option<String>,
}

/// Where the negotiation currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFlow {
    /// Probe not yet evaluated.
    NoAuthTried,
    /// The probe accepted our stored credentials outright.
    BasicAccepted { header: String },
    /// The registry serves anonymously; no Authorization header needed.
    NoAuthRequired,
    /// A Bearer challenge was parsed; a token must be fetched from `realm`.
    ChallengeParsed {
        realm: String,
        service: String,
        scope: String,
    },
    /// Terminal: a bearer token is in hand.
    BearerObtained { header: String },
}

impl AuthFlow {
    /// Evaluates the challenge probe. `credentials` is the stored base64
    /// `user:pass` for the registry host, if any; `scope_path` is the
    /// repository path the eventual token must cover.
    pub fn advance(
        self,
        response: &ChallengeResponse,
        credentials: Option<&str>,
        scope_path: &str,
    ) -> Result<AuthFlow> {
        if self != AuthFlow::NoAuthTried {
            return Err(DrydockError::Auth(format!(
                "challenge evaluated twice (state {:?})",
                self
            )));
        }

        // Credentials accepted directly, or nothing guards the registry
        if response.status == 200 || response.status == 204 {
            return Ok(match credentials {
                Some(encoded) => AuthFlow::BasicAccepted {
                    header: format!("Basic {}", encoded),
                },
                None => AuthFlow::NoAuthRequired,
            });
        }

        let header = response.www_authenticate.as_deref().ok_or_else(|| {
            DrydockError::Auth("could not find www-authenticate header".to_string())
        })?;
        let lowered = header.to_lowercase();

        if lowered.contains("basic") {
            let encoded = credentials.ok_or_else(|| {
                DrydockError::Auth(format!("no credentials stored for basic challenge '{}'", header))
            })?;
            return Ok(AuthFlow::BasicAccepted {
                header: format!("Basic {}", encoded),
            });
        }

        if !lowered.contains("bearer") {
            return Err(DrydockError::Auth(format!(
                "unknown challenge type: '{}'",
                header
            )));
        }

        let realm = capture(realm_pattern(), header)?;
        let service = capture(service_pattern(), header)?;

        Ok(AuthFlow::ChallengeParsed {
            realm,
            service,
            scope: format!("repository:{}:pull", scope_path),
        })
    }

    /// Enters the terminal state once the realm handed out a token.
    pub fn with_token(self, token: &str) -> Result<AuthFlow> {
        match self {
            AuthFlow::ChallengeParsed { .. } => Ok(AuthFlow::BearerObtained {
                header: format!("Bearer {}", token),
            }),
            other => Err(DrydockError::Auth(format!(
                "token received outside bearer flow (state {:?})",
                other
            ))),
        }
    }

    /// The Authorization header value this state resolves to, if terminal.
    pub fn header(&self) -> Option<&str> {
        match self {
            AuthFlow::BasicAccepted { header } | AuthFlow::BearerObtained { header } => {
                Some(header)
            }
            _ => None,
        }
    }
}

fn capture(pattern: &Regex, header: &str) -> Result<String> {
    pattern
        .captures(header)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            DrydockError::Auth(format!(
                "could not find required part in challenge header '{}'",
                header
            ))
        })
}
