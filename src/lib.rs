//! A client for the [Vimeo Advanced API](https://vimeo.com/api): OAuth 1.0a
//! signed REST calls and the ticket-based video upload protocol.
//!
//! The crate is built around three pieces:
//!
//! * [`VimeoClient`] signs and sends individual REST calls and decodes the
//!   XML or JSON response envelope.  The [`VimeoApi`] trait exposes one
//!   typed wrapper per endpoint the upload workflow uses.
//! * [`UploadCoordinator`] runs the whole upload sequence: quota check,
//!   ticket acquisition, streaming the file, confirmation, metadata.
//! * [`RetryQueue`] holds metadata updates that failed right after an
//!   upload (the servers need a moment before a fresh video accepts
//!   metadata calls) until a drain pass applies them.
//!
//! [`VimeoClient`]: crate::client::VimeoClient
//! [`VimeoApi`]: crate::client::VimeoApi
//! [`UploadCoordinator`]: crate::upload::UploadCoordinator
//! [`RetryQueue`]: crate::retry::RetryQueue
//!
//! With a stored access token, uploading a file takes a few lines:
//!
//! ```ignore
//! use std::path::Path;
//!
//! use vimeo_client::auth::{Credentials, Token};
//! use vimeo_client::client::{Privacy, VimeoClient};
//! use vimeo_client::upload::{UploadCoordinator, VideoMetadata};
//!
//! let client = VimeoClient::with_token(
//!     Credentials::new("consumer-key", "consumer-secret"),
//!     Token::new("token", "token-secret"),
//! );
//! let mut coordinator = UploadCoordinator::new(client);
//!
//! let outcome = coordinator
//!     .run(
//!         Path::new("sample.mp4"),
//!         VideoMetadata {
//!             title: "My Title".to_string(),
//!             tags: vec!["a".to_string(), "b".to_string()],
//!             privacy: Privacy::Anybody,
//!         },
//!         None,
//!     )
//!     .await?;
//! println!("uploaded as {}", outcome.video_id);
//!
//! // metadata may have hit the post-upload consistency window
//! while !coordinator.pending().is_empty() {
//!     tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!     coordinator.drain_pending().await;
//! }
//! ```
//!
//! Without a stored token the client first walks the three-legged OAuth
//! dance; the user visits the authorization URL and comes back with a
//! verifier string:
//!
//! ```ignore
//! use vimeo_client::auth::Credentials;
//! use vimeo_client::client::{Permission, VimeoClient};
//!
//! let mut client = VimeoClient::new(Credentials::new("key", "secret"));
//! client.fetch_request_token().await?;
//! println!("visit {}", client.authorization_url(Permission::Write)?);
//! let verifier = read_verifier_from_user();
//! let token = client.fetch_access_token(&verifier).await?;
//! // store token.key() / token.secret() for next time
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod retry;
pub mod upload;
