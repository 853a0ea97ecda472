//! A Rust definition of the Vimeo Advanced API and a client to access it
use std::{env, path::Path};

use async_trait::async_trait;
use log::debug;
use once_cell::sync::Lazy;
use reqwest::{multipart, Body, Client};
use tokio_util::io::ReaderStream;
use url::Url;

use crate::{
    auth::{self, Credentials, Token},
    envelope::{self, ApiResponse, ResponseFormat},
    error::{Result, VimeoError},
    upload::{ProgressCallback, ProgressStream},
};

const API_REST_URL: &str = "https://vimeo.com/api/rest/v2/";
const REQUEST_TOKEN_URL: &str = "https://vimeo.com/oauth/request_token";
const ACCESS_TOKEN_URL: &str = "https://vimeo.com/oauth/access_token";
const AUTHORIZATION_URL: &str = "https://vimeo.com/oauth/authorize";

static GLOBAL_CLIENT: Lazy<Client> = Lazy::new(Client::new);

/// A client for the Vimeo Advanced API
///
/// Holds the consumer credentials and, once the three-legged OAuth flow has
/// completed (or a stored token was supplied), the access token.  Every REST
/// call goes through [`VimeoClient::call`], which signs the request and
/// decodes the response envelope; the [`VimeoApi`] trait adds one typed
/// wrapper per endpoint the upload workflow needs.
pub struct VimeoClient {
    credentials: Credentials,
    /// Request token during the authorization dance, access token afterwards
    token: Option<Token>,
    format: ResponseFormat,
    /// The REST root.  Not normally changed but overridable for testing.
    rest_url: String,
    request_token_url: String,
    access_token_url: String,
    authorization_url: String,
}

impl VimeoClient {
    /// Creates a client with no token yet.  Run the three-legged flow
    /// ([`fetch_request_token`], [`authorization_url`],
    /// [`fetch_access_token`]) before making authenticated calls.
    ///
    /// [`fetch_request_token`]: VimeoClient::fetch_request_token
    /// [`authorization_url`]: VimeoClient::authorization_url
    /// [`fetch_access_token`]: VimeoClient::fetch_access_token
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            token: None,
            format: ResponseFormat::default(),
            rest_url: Self::get_rest_url(),
            request_token_url: Self::get_request_token_url(),
            access_token_url: Self::get_access_token_url(),
            authorization_url: Self::get_authorization_url(),
        }
    }

    /// Creates a client from a previously stored access token.
    pub fn with_token(credentials: Credentials, token: Token) -> Self {
        let mut client = Self::new(credentials);
        client.token = Some(token);
        client
    }

    /// Selects the wire format the API is asked to answer in.
    pub fn response_format(mut self, format: ResponseFormat) -> Self {
        self.format = format;
        self
    }

    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    fn get_rest_url() -> String {
        env::var("VIMEO_API_REST_URL").unwrap_or_else(|_| API_REST_URL.to_string())
    }

    fn get_request_token_url() -> String {
        env::var("VIMEO_OAUTH_REQUEST_TOKEN_URL").unwrap_or_else(|_| REQUEST_TOKEN_URL.to_string())
    }

    fn get_access_token_url() -> String {
        env::var("VIMEO_OAUTH_ACCESS_TOKEN_URL").unwrap_or_else(|_| ACCESS_TOKEN_URL.to_string())
    }

    fn get_authorization_url() -> String {
        env::var("VIMEO_OAUTH_AUTHORIZATION_URL").unwrap_or_else(|_| AUTHORIZATION_URL.to_string())
    }

    /// Sends one signed REST call and decodes the envelope.
    ///
    /// Authenticated calls require an access token; the check happens before
    /// any network I/O.  Responses are never cached.
    pub async fn call(
        &self,
        method: &str,
        params: &[(&str, &str)],
        authenticated: bool,
    ) -> Result<ApiResponse> {
        let token = if authenticated {
            Some(self.token.as_ref().ok_or(VimeoError::MissingCredentials(
                "an access token is required for this call",
            ))?)
        } else {
            None
        };

        let mut params: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        params.push(("method".to_string(), method.to_string()));
        if self.format == ResponseFormat::Json {
            params.push(("format".to_string(), "json".to_string()));
        }

        let signed = auth::signed_parameters(&self.credentials, token, "GET", &self.rest_url, &params);
        let url = Url::parse_with_params(&self.rest_url, &signed)
            .map_err(|e| VimeoError::protocol(format!("bad REST url: {}", e)))?;

        debug!("calling {}", method);
        let response = GLOBAL_CLIENT
            .get(url.as_str())
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        envelope::decode(self.format, &body)
    }

    /// Step one of the three-legged flow: obtains an unauthorized request
    /// token (out-of-band callback) and stores it on the client.
    pub async fn fetch_request_token(&mut self) -> Result<()> {
        let params = vec![("oauth_callback".to_string(), "oob".to_string())];
        let body = self
            .fetch_token_endpoint(&self.request_token_url, None, &params)
            .await?;
        self.token = Some(parse_token_response(&body)?);
        Ok(())
    }

    /// Step two: the URL the user must visit to authorize the request token.
    /// The page hands them the verifier string.
    pub fn authorization_url(&self, permission: Permission) -> Result<String> {
        let token = self.token.as_ref().ok_or(VimeoError::MissingCredentials(
            "fetch a request token before building the authorization URL",
        ))?;
        let url = Url::parse_with_params(
            &self.authorization_url,
            &[
                ("oauth_token", token.key()),
                ("permission", permission.as_str()),
            ],
        )
        .map_err(|e| VimeoError::protocol(format!("bad authorization url: {}", e)))?;
        Ok(url.into())
    }

    /// Step three: exchanges the verified request token for an access token.
    /// The credentials are immutable from here on.
    pub async fn fetch_access_token(&mut self, verifier: &str) -> Result<Token> {
        let request_token = self
            .token
            .clone()
            .ok_or(VimeoError::MissingCredentials(
                "fetch a request token before exchanging it for an access token",
            ))?;
        let params = vec![("oauth_verifier".to_string(), verifier.to_string())];
        let body = self
            .fetch_token_endpoint(&self.access_token_url, Some(&request_token), &params)
            .await?;
        let token = parse_token_response(&body)?;
        self.token = Some(token.clone());
        Ok(token)
    }

    async fn fetch_token_endpoint(
        &self,
        endpoint: &str,
        token: Option<&Token>,
        params: &[(String, String)],
    ) -> Result<String> {
        let signed = auth::signed_parameters(&self.credentials, token, "GET", endpoint, params);
        let url = Url::parse_with_params(endpoint, &signed)
            .map_err(|e| VimeoError::protocol(format!("bad OAuth url: {}", e)))?;
        let response = GLOBAL_CLIENT
            .get(url.as_str())
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }
}

/// Parses the form-encoded body of the OAuth token endpoints.
fn parse_token_response(body: &str) -> Result<Token> {
    let mut key = None;
    let mut secret = None;
    for (k, v) in form_urlencoded::parse(body.as_bytes()) {
        match k.as_ref() {
            "oauth_token" => key = Some(v.into_owned()),
            "oauth_token_secret" => secret = Some(v.into_owned()),
            _ => {}
        }
    }
    match (key, secret) {
        (Some(key), Some(secret)) => Ok(Token::new(key, secret)),
        _ => Err(VimeoError::protocol(
            "token response missing oauth_token or oauth_token_secret",
        )),
    }
}

/// Access level requested from the user during authorization.  Uploading
/// needs [`Permission::Write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Read,
    Write,
    Delete,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Delete => "delete",
        }
    }
}

/// A video privacy setting, in the CLI syntax of the original scripts
/// (`anybody`, `nobody`, `contacts`, `users:u1,u2`, `password:pwd`,
/// `disable`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Privacy {
    Anybody,
    Nobody,
    Contacts,
    Users(Vec<String>),
    Password(String),
    Disable,
}

impl std::str::FromStr for Privacy {
    type Err = VimeoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "anybody" => Ok(Privacy::Anybody),
            "nobody" => Ok(Privacy::Nobody),
            "contacts" => Ok(Privacy::Contacts),
            "disable" => Ok(Privacy::Disable),
            other => {
                if let Some(users) = other.strip_prefix("users:") {
                    let users: Vec<String> = users
                        .split(',')
                        .filter(|u| !u.is_empty())
                        .map(str::to_string)
                        .collect();
                    if users.is_empty() {
                        return Err(VimeoError::required("users list"));
                    }
                    Ok(Privacy::Users(users))
                } else if let Some(password) = other.strip_prefix("password:") {
                    if password.is_empty() {
                        return Err(VimeoError::required("password"));
                    }
                    Ok(Privacy::Password(password.to_string()))
                } else {
                    Err(VimeoError::InvalidInput(format!(
                        "unknown privacy setting '{}'",
                        other
                    )))
                }
            }
        }
    }
}

impl Privacy {
    fn value(&self) -> &'static str {
        match self {
            Privacy::Anybody => "anybody",
            Privacy::Nobody => "nobody",
            Privacy::Contacts => "contacts",
            Privacy::Users(_) => "users",
            Privacy::Password(_) => "password",
            Privacy::Disable => "disable",
        }
    }
}

/// A one-time upload authorization issued by `getTicket`: consumed by one
/// file POST to `endpoint`, invalidated by the confirm call.
#[derive(Debug, Clone)]
pub struct UploadTicket {
    pub id: String,
    pub endpoint: String,
}

/// Upload quota as reported by `getQuota`.  Advisory only; the server does
/// its own enforcement during upload.
#[derive(Debug, Clone)]
pub struct QuotaInfo {
    /// Free upload space in bytes
    pub free: u64,
    /// Total upload space in bytes, when reported
    pub max: Option<u64>,
    /// Whether an HD upload is still allowed this period
    pub hd: bool,
}

/// The API operations the upload workflow is built on
#[async_trait]
pub trait VimeoApi {
    /// Fetches the remaining upload quota for the authorized user
    async fn get_quota(&self) -> Result<QuotaInfo>;

    /// Generates a new upload ticket, good for one upload by one user
    async fn get_upload_ticket(&self) -> Result<UploadTicket>;

    /// Checks whether an upload ticket is still valid
    async fn check_ticket(&self, ticket: &UploadTicket) -> Result<bool>;

    /// Streams a local file to the ticket's endpoint as multipart form data
    ///
    /// The form carries `ticket_id` and the OAuth signature fields alongside
    /// the `file_data` part.  The response body is not meaningful; only
    /// transport-level success matters.  A registered observer is invoked
    /// with `(bytes_sent, bytes_total)` as chunks go out.
    async fn upload_file(
        &self,
        ticket: &UploadTicket,
        file_path: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<()>;

    /// Completes the upload, returning the new video id
    async fn confirm_upload(&self, ticket: &UploadTicket, filename: &str) -> Result<String>;

    /// Sets the title of a video
    async fn set_title(&self, video_id: &str, title: &str) -> Result<()>;

    /// Sets the description of a video
    async fn set_description(&self, video_id: &str, description: &str) -> Result<()>;

    /// Sets the privacy of a video
    async fn set_privacy(&self, video_id: &str, privacy: &Privacy) -> Result<()>;

    /// Adds tags to a video
    async fn add_tags(&self, video_id: &str, tags: &[String]) -> Result<()>;

    /// Verifies the credentials, returning the username they belong to
    async fn test_login(&self) -> Result<String>;
}

#[async_trait]
impl VimeoApi for VimeoClient {
    async fn get_quota(&self) -> Result<QuotaInfo> {
        let rsp = self.call("vimeo.videos.upload.getQuota", &[], true).await?;
        let free = rsp
            .u64_at(&["user", "upload_space", "free"])
            .or_else(|| rsp.u64_at(&["upload_space", "free"]))
            .ok_or_else(|| VimeoError::protocol("quota response missing upload_space.free"))?;
        let max = rsp
            .u64_at(&["user", "upload_space", "max"])
            .or_else(|| rsp.u64_at(&["upload_space", "max"]));
        let hd = rsp
            .string_at(&["user", "hd_quota", "_content"])
            .or_else(|| rsp.string_at(&["user", "hd_quota"]))
            .or_else(|| rsp.string_at(&["hd_quota"]))
            .map(|v| v == "1")
            .unwrap_or(false);
        Ok(QuotaInfo { free, max, hd })
    }

    async fn get_upload_ticket(&self) -> Result<UploadTicket> {
        let rsp = self.call("vimeo.videos.upload.getTicket", &[], true).await?;
        let id = rsp
            .string_at(&["ticket", "id"])
            .ok_or_else(|| VimeoError::protocol("ticket response missing ticket.id"))?;
        let endpoint = rsp
            .string_at(&["ticket", "endpoint"])
            .ok_or_else(|| VimeoError::protocol("ticket response missing ticket.endpoint"))?;
        Ok(UploadTicket { id, endpoint })
    }

    async fn check_ticket(&self, ticket: &UploadTicket) -> Result<bool> {
        let rsp = self
            .call(
                "vimeo.videos.upload.checkTicket",
                &[("ticket_id", &ticket.id)],
                true,
            )
            .await?;
        let valid = rsp
            .string_at(&["ticket", "valid"])
            .ok_or_else(|| VimeoError::protocol("checkTicket response missing ticket.valid"))?;
        Ok(valid == "1")
    }

    async fn upload_file(
        &self,
        ticket: &UploadTicket,
        file_path: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<()> {
        let token = self.token.as_ref().ok_or(VimeoError::MissingCredentials(
            "an access token is required to upload",
        ))?;

        let file = tokio::fs::File::open(file_path).await?;
        let total = file.metadata().await.ok().map(|m| m.len());
        let mime = mime_guess::from_path(file_path).first_or_octet_stream();
        let filename = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());

        let params = vec![("ticket_id".to_string(), ticket.id.clone())];
        let signed = auth::signed_parameters(
            &self.credentials,
            Some(token),
            "POST",
            &ticket.endpoint,
            &params,
        );

        let stream = ProgressStream::new(ReaderStream::new(file), total, progress);
        let body = Body::wrap_stream(stream);
        let part = match total {
            Some(len) => multipart::Part::stream_with_length(body, len),
            None => multipart::Part::stream(body),
        }
        .file_name(filename)
        .mime_str(mime.essence_str())?;

        let mut form = multipart::Form::new();
        for (k, v) in signed {
            form = form.text(k, v);
        }
        form = form.part("file_data", part);

        debug!("uploading {} with ticket {}", file_path.display(), ticket.id);
        GLOBAL_CLIENT
            .post(&ticket.endpoint)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn confirm_upload(&self, ticket: &UploadTicket, filename: &str) -> Result<String> {
        let rsp = self
            .call(
                "vimeo.videos.upload.confirm",
                &[("ticket_id", &ticket.id), ("filename", filename)],
                true,
            )
            .await?;
        rsp.string_at(&["ticket", "video_id"])
            .or_else(|| rsp.string_at(&["video_id"]))
            .or_else(|| rsp.string_at(&["video_id", "_content"]))
            .ok_or_else(|| {
                VimeoError::Confirmation(format!(
                    "confirm response for ticket {} carries no video_id",
                    ticket.id
                ))
            })
    }

    async fn set_title(&self, video_id: &str, title: &str) -> Result<()> {
        self.call(
            "vimeo.videos.setTitle",
            &[("title", title), ("video_id", video_id)],
            true,
        )
        .await?;
        Ok(())
    }

    async fn set_description(&self, video_id: &str, description: &str) -> Result<()> {
        self.call(
            "vimeo.videos.setDescription",
            &[("description", description), ("video_id", video_id)],
            true,
        )
        .await?;
        Ok(())
    }

    async fn set_privacy(&self, video_id: &str, privacy: &Privacy) -> Result<()> {
        let users;
        let mut params = vec![("privacy", privacy.value()), ("video_id", video_id)];
        match privacy {
            Privacy::Users(list) => {
                users = list.join(",");
                params.push(("users", &users));
            }
            Privacy::Password(password) => {
                params.push(("password", password));
            }
            _ => {}
        }
        self.call("vimeo.videos.setPrivacy", &params, true).await?;
        Ok(())
    }

    async fn add_tags(&self, video_id: &str, tags: &[String]) -> Result<()> {
        let tags = tags.join(",");
        self.call(
            "vimeo.videos.addTags",
            &[("tags", &tags), ("video_id", video_id)],
            true,
        )
        .await?;
        Ok(())
    }

    async fn test_login(&self) -> Result<String> {
        let rsp = self.call("vimeo.test.login", &[], true).await?;
        rsp.string_at(&["user", "username", "_content"])
            .or_else(|| rsp.string_at(&["user", "username"]))
            .ok_or_else(|| VimeoError::protocol("login response missing user.username"))
    }
}
