//! Simple Vimeo uploader: walks the OAuth flow if needed, uploads one file
//! and applies its metadata, retrying past the post-upload consistency lag.
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::warn;

use vimeo_client::client::{Permission, Privacy, VimeoApi, VimeoClient};
use vimeo_client::config::Config;
use vimeo_client::error::VimeoError;
use vimeo_client::upload::{ProgressCallback, UploadCoordinator, VideoMetadata};

/// Give up once this many consecutive drain passes apply nothing.
const MAX_IDLE_PASSES: u32 = 30;

/// Simple Vimeo uploader
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Consumer key
    #[arg(short = 'k', long)]
    key: Option<String>,

    /// Consumer secret
    #[arg(short = 's', long)]
    secret: Option<String>,

    /// Access token
    #[arg(short = 't', long)]
    token: Option<String>,

    /// Access token secret
    #[arg(short = 'y', long)]
    token_secret: Option<String>,

    /// Path to the credentials file (default: ~/.vimeo-client.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Video title (default: the file name)
    #[arg(long)]
    title: Option<String>,

    /// Video description
    #[arg(long)]
    description: Option<String>,

    /// Tag to attach to the video (repeatable)
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Privacy setting (anybody; nobody; contacts; users:u1,u2; password:pwd; disable)
    #[arg(long, default_value = "anybody")]
    privacy: Privacy,

    /// Seconds to wait before the first metadata attempt
    #[arg(long, default_value_t = 5)]
    settle: u64,

    /// Video file to upload
    file: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    match run(Args::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode, VimeoError> {
    let mut config = Config::load(args.config.as_deref())?.apply_env();
    if let Some(key) = args.key {
        config.consumer_key = Some(key);
    }
    if let Some(secret) = args.secret {
        config.consumer_secret = Some(secret);
    }
    if let Some(token) = args.token {
        config.token = Some(token);
    }
    if let Some(token_secret) = args.token_secret {
        config.token_secret = Some(token_secret);
    }

    let credentials = config.credentials()?;
    let client = match config.access_token() {
        Some(token) => VimeoClient::with_token(credentials, token),
        None => authorize(credentials).await?,
    };

    let title = args
        .title
        .unwrap_or_else(|| match args.file.file_stem() {
            Some(stem) => stem.to_string_lossy().into_owned(),
            None => "Untitled".to_string(),
        });
    let metadata = VideoMetadata {
        title,
        tags: args.tags,
        privacy: args.privacy,
    };

    let mut coordinator =
        UploadCoordinator::new(client).settle_delay(Duration::from_secs(args.settle));

    let file_size = tokio::fs::metadata(&args.file).await.ok().map(|m| m.len());
    let quota = coordinator.check_quota(file_size).await?;
    println!("Your current quota is {} MiB", quota.free / (1024 * 1024));

    let outcome = coordinator
        .run(&args.file, metadata, Some(progress_bar()))
        .await?;
    println!();
    println!("{}", outcome.video_id);

    if let Some(description) = &args.description {
        if let Err(e) = coordinator
            .api()
            .set_description(&outcome.video_id, description)
            .await
        {
            warn!(
                "description for video {} not applied: {}",
                outcome.video_id, e
            );
        }
    }

    // Drain the consistency-lag queue; the upload itself already succeeded.
    let mut idle_passes = 0;
    while !coordinator.pending().is_empty() {
        tokio::time::sleep(Duration::from_secs(1)).await;
        if coordinator.drain_pending().await == 0 {
            idle_passes += 1;
        } else {
            idle_passes = 0;
        }
        if idle_passes >= MAX_IDLE_PASSES {
            for entry in coordinator.pending().entries() {
                warn!("metadata for video {} was never applied", entry.video_id);
            }
            eprintln!(
                "giving up on {} queued metadata update(s)",
                coordinator.pending().len()
            );
            return Ok(ExitCode::FAILURE);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Runs the three-legged OAuth dance on stdin/stdout and prints the token
/// pair so the user can store it in the config file.
async fn authorize(credentials: vimeo_client::auth::Credentials) -> Result<VimeoClient, VimeoError> {
    let mut client = VimeoClient::new(credentials);
    client.fetch_request_token().await?;
    println!("{}", client.authorization_url(Permission::Write)?);
    println!("Visit the URL above, authorize the application, then paste the verifier:");

    let mut verifier = String::new();
    io::stdin().lock().read_line(&mut verifier)?;
    let verifier = verifier.trim();
    println!("Using {} as verifier", verifier);

    let token = client.fetch_access_token(verifier).await?;
    println!("Add this to your config file for next time:");
    println!("[auth]");
    println!("token = \"{}\"", token.key());
    println!("token_secret = \"{}\"", token.secret());
    Ok(client)
}

fn progress_bar() -> ProgressCallback {
    Arc::new(|sent, total| match total {
        Some(total) if total > 0 => {
            // the file can grow while streaming, so the count may overshoot
            let percent = (sent * 100 / total).min(100);
            let done = (percent / 5) as usize;
            print!("\r[{}{}] {:>3}%", "#".repeat(done), " ".repeat(20 - done), percent);
            let _ = io::stdout().flush();
        }
        // unknown length: nothing useful to draw
        _ => {}
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_accept_description_and_repeated_tags() {
        let args = Args::try_parse_from([
            "vimeo-upload",
            "--description",
            "a walk in the woods",
            "--tag",
            "a",
            "--tag",
            "b",
            "video.mp4",
        ])
        .unwrap();
        assert_eq!(args.description.as_deref(), Some("a walk in the woods"));
        assert_eq!(args.tags, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(args.privacy, Privacy::Anybody);
        assert_eq!(args.file, PathBuf::from("video.mp4"));
    }

    #[test]
    fn progress_bar_tolerates_overshoot() {
        let bar = progress_bar();
        bar.as_ref()(512, Some(1024));
        bar.as_ref()(2048, Some(1024));
        bar.as_ref()(0, None);
    }
}
