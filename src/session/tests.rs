// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::*;
use base64::Engine as _;
use base64::engine::general_purpose;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue};

fn principal(roles: &[&str]) -> ClientPrincipal {
    ClientPrincipal {
        identity_provider: "github".to_string(),
        user_id: "59cd31faa8c34919ac22c19af50482b8".to_string(),
        user_details: "octocat".to_string(),
        user_roles: roles.iter().map(|r| r.to_string()).collect(),
    }
}

#[test]
fn test_is_valid_session() {
    assert!(is_valid_session("StaticWebAppsAuthCookie=abc"));
    assert!(is_valid_session("foo=bar; StaticWebAppsAuthCookie=abc"));
    assert!(!is_valid_session(""));
    assert!(!is_valid_session("foo=bar"));
    assert!(!is_valid_session("StaticWebAppsAuthCookie="));
    assert!(!is_valid_session("staticwebappsauthcookie=abc"));
}

#[test]
fn test_is_valid_session_header_rejects_opaque_bytes() {
    let header = HeaderValue::from_bytes(b"StaticWebAppsAuthCookie=\xff\xfe").unwrap();
    assert!(matches!(
        is_valid_session_header(&header),
        Err(SessionError::InvalidHeader)
    ));

    let header = HeaderValue::from_static("StaticWebAppsAuthCookie=abc");
    assert!(is_valid_session_header(&header).unwrap());
}

#[test]
fn test_parse_cookies() {
    let cookies = parse_cookies(r#" a=1; b="two" ; a=3; c=hello%20world; broken; =x"#);
    assert_eq!(
        cookies,
        vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "two".to_string()),
            ("c".to_string(), "hello world".to_string()),
        ]
    );
}

#[test]
fn test_round_trip() {
    let original = principal(&["authenticated", "admin"]);
    let token = encode_principal(&original).unwrap();
    let header = format!("other=1; {SESSION_COOKIE}={token}");

    let decoded = decode_session(&header).unwrap().unwrap();
    assert_eq!(decoded, original);
}

#[test]
fn test_decode_uses_camel_case_fields() {
    let token = general_purpose::STANDARD.encode(
        r#"{"identityProvider":"aad","userId":"u1","userDetails":"jane","userRoles":["anonymous"]}"#,
    );
    let decoded = decode_session(&format!("{SESSION_COOKIE}={token}"))
        .unwrap()
        .unwrap();
    assert_eq!(decoded.identity_provider, "aad");
    assert_eq!(decoded.user_details, "jane");
    assert_eq!(decoded.user_roles, vec!["anonymous".to_string()]);
}

#[test]
fn test_decode_accepts_unpadded_token() {
    let token = general_purpose::STANDARD_NO_PAD.encode(r#"{"userRoles":["x"]}"#);
    let decoded = decode_session(&format!("{SESSION_COOKIE}={token}"))
        .unwrap()
        .unwrap();
    assert_eq!(decoded.user_roles, vec!["x".to_string()]);
}

#[test]
fn test_decode_without_cookie_is_none() {
    assert!(decode_session("foo=bar").unwrap().is_none());
    assert!(decode_session("").unwrap().is_none());
}

#[test]
fn test_decode_tampered_token_fails() {
    let not_json = general_purpose::STANDARD.encode("definitely not json");
    assert!(matches!(
        decode_session(&format!("{SESSION_COOKIE}={not_json}")),
        Err(SessionError::Parse(_))
    ));

    assert!(matches!(
        decode_session(&format!("{SESSION_COOKIE}=***")),
        Err(SessionError::Decode(_))
    ));
}

#[test]
fn test_principal_from_headers() {
    let mut headers = HeaderMap::new();
    assert!(principal_from_headers(&headers).unwrap().is_none());

    headers.insert(COOKIE, HeaderValue::from_static("StaticWebAppsAuthCookie="));
    assert!(principal_from_headers(&headers).unwrap().is_none());

    let token = encode_principal(&principal(&["authenticated"])).unwrap();
    headers.insert(
        COOKIE,
        HeaderValue::from_str(&format!("{SESSION_COOKIE}={token}")).unwrap(),
    );
    let decoded = principal_from_headers(&headers).unwrap().unwrap();
    assert!(decoded.has_any_role(&["authenticated"]));
    assert!(!decoded.has_any_role(&["admin"]));
}

#[test]
fn test_principal_from_headers_with_utf8_cookie() {
    let token = encode_principal(&principal(&["authenticated"])).unwrap();
    let cookie = format!("{SESSION_COOKIE}={token}; theme=café");
    let mut headers = HeaderMap::new();
    headers.insert(COOKIE, HeaderValue::from_bytes(cookie.as_bytes()).unwrap());

    let header = headers.get(COOKIE).unwrap();
    assert!(is_valid_session_header(header).unwrap());
    let decoded = principal_from_headers(&headers).unwrap().unwrap();
    assert!(decoded.has_any_role(&["authenticated"]));
}

#[test]
fn test_principal_from_split_cookie_fields() {
    let token = encode_principal(&principal(&["editor"])).unwrap();
    let mut headers = HeaderMap::new();
    headers.append(COOKIE, HeaderValue::from_static("theme=dark"));
    headers.append(
        COOKIE,
        HeaderValue::from_str(&format!("{SESSION_COOKIE}={token}")).unwrap(),
    );

    assert_eq!(
        cookie_header(&headers).unwrap().unwrap(),
        format!("theme=dark; {SESSION_COOKIE}={token}")
    );
    let decoded = principal_from_headers(&headers).unwrap().unwrap();
    assert_eq!(decoded.user_roles, vec!["editor".to_string()]);

    assert!(cookie_header(&HeaderMap::new()).unwrap().is_none());
}

#[test]
fn test_with_default_roles() {
    let principal = principal(&["authenticated", "editor"]).with_default_roles();
    assert_eq!(
        principal.user_roles,
        vec![
            "authenticated".to_string(),
            "editor".to_string(),
            "anonymous".to_string()
        ]
    );
}
