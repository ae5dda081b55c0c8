//! The auth negotiation state machine, driven with canned responses and no
//! HTTP involved.

use drydock::error::DrydockError;
use drydock::registry::{AuthFlow, ChallengeResponse};

fn response(status: u16, www_authenticate: Option<&str>) -> ChallengeResponse {
    ChallengeResponse {
        status,
        www_authenticate: www_authenticate.map(str::to_string),
    }
}

#[test]
fn accepted_probe_with_credentials_resolves_to_basic() {
    let flow = AuthFlow::NoAuthTried
        .advance(&response(200, None), Some("dXNlcjpwYXNz"), "library/nginx")
        .unwrap();
    assert_eq!(
        flow,
        AuthFlow::BasicAccepted {
            header: "Basic dXNlcjpwYXNz".to_string()
        }
    );
    assert_eq!(flow.header(), Some("Basic dXNlcjpwYXNz"));
}

#[test]
fn accepted_probe_without_credentials_is_anonymous() {
    let flow = AuthFlow::NoAuthTried
        .advance(&response(204, None), None, "library/nginx")
        .unwrap();
    assert_eq!(flow, AuthFlow::NoAuthRequired);
    assert_eq!(flow.header(), None);
}

#[test]
fn basic_challenge_requires_stored_credentials() {
    let challenge = response(401, Some(r#"Basic realm="registry""#));

    let with_creds = AuthFlow::NoAuthTried
        .advance(&challenge, Some("dXNlcjpwYXNz"), "library/nginx")
        .unwrap();
    assert_eq!(with_creds.header(), Some("Basic dXNlcjpwYXNz"));

    let without = AuthFlow::NoAuthTried.advance(&challenge, None, "library/nginx");
    assert!(matches!(without, Err(DrydockError::Auth(_))));
}

#[test]
fn bearer_challenge_parses_realm_service_and_scope() {
    let challenge = response(
        401,
        Some(r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io""#),
    );

    let flow = AuthFlow::NoAuthTried
        .advance(&challenge, None, "library/nginx")
        .unwrap();
    assert_eq!(
        flow,
        AuthFlow::ChallengeParsed {
            realm: "https://auth.docker.io/token".to_string(),
            service: "registry.docker.io".to_string(),
            scope: "repository:library/nginx:pull".to_string(),
        }
    );

    let terminal = flow.with_token("tok-123").unwrap();
    assert_eq!(terminal.header(), Some("Bearer tok-123"));
}

#[test]
fn bearer_challenge_without_realm_fails() {
    let challenge = response(401, Some(r#"Bearer service="registry.docker.io""#));
    let result = AuthFlow::NoAuthTried.advance(&challenge, None, "library/nginx");
    assert!(matches!(result, Err(DrydockError::Auth(_))));
}

#[test]
fn unknown_challenge_scheme_fails() {
    let challenge = response(401, Some(r#"Negotiate realm="x""#));
    let result = AuthFlow::NoAuthTried.advance(&challenge, None, "library/nginx");
    assert!(matches!(result, Err(DrydockError::Auth(_))));
}

#[test]
fn missing_challenge_header_fails() {
    let result = AuthFlow::NoAuthTried.advance(&response(401, None), None, "library/nginx");
    assert!(matches!(result, Err(DrydockError::Auth(_))));
}

#[test]
fn token_outside_bearer_flow_is_rejected() {
    assert!(AuthFlow::NoAuthTried.with_token("tok").is_err());
    assert!(AuthFlow::NoAuthRequired.with_token("tok").is_err());
}

#[test]
fn advancing_twice_is_rejected() {
    let flow = AuthFlow::NoAuthTried
        .advance(&response(200, None), None, "library/nginx")
        .unwrap();
    assert!(flow.advance(&response(200, None), None, "library/nginx").is_err());
}
