//! OAuth 1.0a credentials and HMAC-SHA1 request signing
//!
//! Every REST call is signed with the consumer secret and, for
//! authenticated calls, the access token secret.  The token itself is
//! obtained through the three-legged flow on [`VimeoClient`].
//!
//! [`VimeoClient`]: crate::client::VimeoClient
use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha1::Sha1;

/// The RFC 3986 unreserved set.  Everything else is percent-encoded when
/// building the signature base string and the query.
const OAUTH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

pub(crate) fn percent_encode(input: &str) -> String {
    utf8_percent_encode(input, OAUTH_ENCODE_SET).to_string()
}

/// The OAuth consumer key/secret pair identifying the application.
#[derive(Clone)]
pub struct Credentials {
    key: String,
    secret: String,
}

// Custom implementation of Debug to avoid printing the secret
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("secret", &"**********")
            .finish()
    }
}

impl Credentials {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn secret(&self) -> &str {
        &self.secret
    }
}

/// An OAuth token key/secret pair.
///
/// The same type carries the request token during the authorization dance
/// and the access token afterwards.  Once an access token is verified the
/// pair is treated as immutable for the rest of the process.
#[derive(Clone)]
pub struct Token {
    key: String,
    secret: String,
}

// Custom implementation of Debug to avoid printing the secret
impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("key", &self.key)
            .field("secret", &"**********")
            .finish()
    }
}

impl Token {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The token secret, needed when persisting a freshly issued access
    /// token to the config file.
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

/// Returns `params` extended with the full `oauth_*` parameter set,
/// including the computed `oauth_signature`.
///
/// The caller sends the result either as a query string (REST calls) or as
/// form fields (the upload POST).
pub(crate) fn signed_parameters(
    credentials: &Credentials,
    token: Option<&Token>,
    http_method: &str,
    url: &str,
    params: &[(String, String)],
) -> Vec<(String, String)> {
    signed_parameters_with(
        credentials,
        token,
        http_method,
        url,
        params,
        &nonce(),
        chrono::Utc::now().timestamp(),
    )
}

fn signed_parameters_with(
    credentials: &Credentials,
    token: Option<&Token>,
    http_method: &str,
    url: &str,
    params: &[(String, String)],
    nonce: &str,
    timestamp: i64,
) -> Vec<(String, String)> {
    let mut all: Vec<(String, String)> = params.to_vec();
    all.push(("oauth_consumer_key".into(), credentials.key.clone()));
    all.push(("oauth_nonce".into(), nonce.to_string()));
    all.push(("oauth_signature_method".into(), "HMAC-SHA1".into()));
    all.push(("oauth_timestamp".into(), timestamp.to_string()));
    if let Some(token) = token {
        all.push(("oauth_token".into(), token.key.clone()));
    }
    all.push(("oauth_version".into(), "1.0".into()));

    let base = base_string(http_method, url, &all);
    let signing_key = format!(
        "{}&{}",
        percent_encode(&credentials.secret),
        percent_encode(token.map(|t| t.secret.as_str()).unwrap_or(""))
    );
    all.push(("oauth_signature".into(), hmac_sha1(&signing_key, &base)));
    all
}

/// Builds the signature base string: method, URL and the sorted,
/// percent-encoded parameter list, each component encoded again.
fn base_string(http_method: &str, url: &str, params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();
    let joined = encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    format!(
        "{}&{}&{}",
        http_method,
        percent_encode(url),
        percent_encode(&joined)
    )
}

fn hmac_sha1(key: &str, data: &str) -> String {
    let mut mac =
        Hmac::<Sha1>::new_from_slice(key.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(data.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

fn nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}
