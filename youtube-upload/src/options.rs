//! Command-line options and the immutable run configuration derived from them.

use crate::error::UploadError;
use clap::{CommandFactory, Parser};
use std::convert::Infallible;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_TITLE_TEMPLATE: &str = "{title} [{n}/{total}]";

/// Upload videos to YouTube.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "youtube-upload",
    version,
    override_usage = "youtube-upload [OPTIONS] VIDEO [VIDEO2 ...]"
)]
pub struct Options {
    /// Video title
    #[arg(short, long)]
    pub title: Option<String>,

    /// Video category
    #[arg(short, long)]
    pub category: Option<String>,

    /// Video description
    #[arg(short, long)]
    pub description: Option<String>,

    /// Video tags (separated by commas: "tag1, tag2,...")
    #[arg(long)]
    pub tags: Option<String>,

    /// Privacy status (public | unlisted | private)
    #[arg(long, value_name = "STRING", default_value = "public")]
    pub privacy: String,

    /// Video location
    #[arg(long, value_name = "latitude=VAL,longitude=VAL[,altitude=VAL]")]
    pub location: Option<String>,

    /// Template for multiple videos
    #[arg(long, value_name = "STRING", default_value = DEFAULT_TITLE_TEMPLATE)]
    pub title_template: String,

    /// Progress display type (progress | console | none)
    #[arg(long, value_name = "TYPE", default_value = "progress")]
    pub progress_type: ProgressType,

    /// Additional CA certificates (PEM) to trust
    #[arg(long = "ca_certs-file", value_name = "FILE")]
    pub ca_certs_file: Option<PathBuf>,

    /// Access token
    #[arg(long)]
    pub access_token: Option<String>,

    /// Client secrets JSON file
    #[arg(long, value_name = "FILE")]
    pub client_secrets: Option<PathBuf>,

    /// Credentials JSON file
    #[arg(long, value_name = "FILE")]
    pub credentials_file: Option<PathBuf>,

    /// Open a GUI browser to authenticate if required
    #[arg(long)]
    pub auth_browser: bool,

    /// Video files to upload
    #[arg(value_name = "VIDEO")]
    pub videos: Vec<PathBuf>,
}

/// The one-line usage summary shown when required options are missing.
pub fn usage() -> String {
    Options::command().render_usage().to_string()
}

/// How upload progress is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressType {
    /// An animated progress bar on stderr.
    Bar,
    /// One percentage line per update on stdout.
    Console,
    /// Nothing.
    Silent,
}

impl FromStr for ProgressType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "progress" | "progressbar" => ProgressType::Bar,
            "console" => ProgressType::Console,
            // unknown types disable progress reporting rather than failing the run
            _ => ProgressType::Silent,
        })
    }
}

/// How the user hands us an authorization code during the interactive OAuth flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeRetrieval {
    /// Open the consent page in a browser and catch the redirect on a loopback port.
    Browser,
    /// Print the consent URL and read the code from stdin.
    Console,
}

/// Everything the authenticator needs.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub access_token: Option<String>,
    pub client_secrets: Option<PathBuf>,
    pub credentials_file: Option<PathBuf>,
    pub ca_certs_file: Option<PathBuf>,
    pub code_retrieval: CodeRetrieval,
}

/// The validated configuration for one run.
#[derive(Debug, Clone)]
pub struct Config {
    pub title: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub tags: Option<String>,
    pub privacy: String,
    pub location: Option<String>,
    pub title_template: String,
    pub progress_type: ProgressType,
    pub auth: AuthConfig,
    pub videos: Vec<PathBuf>,
}

impl TryFrom<Options> for Config {
    type Error = UploadError;

    fn try_from(options: Options) -> Result<Self, Self::Error> {
        let mut missing = Vec::new();
        if options.title.as_deref().is_none_or(str::is_empty) {
            missing.push("title");
        }
        if options.videos.is_empty() {
            missing.push("videos");
        }
        let Some(title) = options.title.filter(|_| missing.is_empty()) else {
            return Err(UploadError::OptionsMissing(missing));
        };

        Ok(Config {
            title,
            category: options.category,
            description: options.description,
            tags: options.tags,
            privacy: options.privacy,
            location: options.location,
            title_template: options.title_template,
            progress_type: options.progress_type,
            auth: AuthConfig {
                access_token: options.access_token,
                client_secrets: options.client_secrets,
                credentials_file: options.credentials_file,
                ca_certs_file: options.ca_certs_file,
                code_retrieval: if options.auth_browser {
                    CodeRetrieval::Browser
                } else {
                    CodeRetrieval::Console
                },
            },
            videos: options.videos,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Options {
        Options::try_parse_from(std::iter::once("youtube-upload").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn defaults() {
        let config = Config::try_from(parse(&["--title", "Hello", "a.mp4"])).unwrap();
        assert_eq!(config.title, "Hello");
        assert_eq!(config.privacy, "public");
        assert_eq!(config.title_template, "{title} [{n}/{total}]");
        assert_eq!(config.progress_type, ProgressType::Bar);
        assert_eq!(config.auth.code_retrieval, CodeRetrieval::Console);
        assert_eq!(config.videos, vec![PathBuf::from("a.mp4")]);
        assert!(config.category.is_none());
        assert!(config.auth.access_token.is_none());
    }

    #[test]
    fn all_flags() {
        let options = parse(&[
            "-t",
            "T",
            "-c",
            "Music",
            "-d",
            "D",
            "--tags",
            "a, b",
            "--privacy",
            "unlisted",
            "--location",
            "latitude=1,longitude=2",
            "--title-template",
            "{n}: {title}",
            "--progress-type",
            "console",
            "--ca_certs-file",
            "ca.pem",
            "--access-token",
            "ya29.token",
            "--client-secrets",
            "secrets.json",
            "--credentials-file",
            "creds.json",
            "--auth-browser",
            "one.mp4",
            "two.mp4",
        ]);
        let config = Config::try_from(options).unwrap();
        assert_eq!(config.category.as_deref(), Some("Music"));
        assert_eq!(config.description.as_deref(), Some("D"));
        assert_eq!(config.tags.as_deref(), Some("a, b"));
        assert_eq!(config.privacy, "unlisted");
        assert_eq!(config.location.as_deref(), Some("latitude=1,longitude=2"));
        assert_eq!(config.title_template, "{n}: {title}");
        assert_eq!(config.progress_type, ProgressType::Console);
        assert_eq!(config.auth.ca_certs_file, Some(PathBuf::from("ca.pem")));
        assert_eq!(config.auth.access_token.as_deref(), Some("ya29.token"));
        assert_eq!(config.auth.client_secrets, Some(PathBuf::from("secrets.json")));
        assert_eq!(config.auth.credentials_file, Some(PathBuf::from("creds.json")));
        assert_eq!(config.auth.code_retrieval, CodeRetrieval::Browser);
        assert_eq!(config.videos.len(), 2);
    }

    #[test]
    fn missing_title() {
        let err = Config::try_from(parse(&["a.mp4"])).unwrap_err();
        assert!(matches!(err, UploadError::OptionsMissing(ref m) if m == &["title"]));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn missing_title_and_videos() {
        let err = Config::try_from(parse(&[])).unwrap_err();
        assert!(matches!(err, UploadError::OptionsMissing(ref m) if m == &["title", "videos"]));
    }

    #[test]
    fn usage_line() {
        assert_eq!(
            usage(),
            "Usage: youtube-upload [OPTIONS] VIDEO [VIDEO2 ...]"
        );
    }

    #[test]
    fn progress_types() {
        assert_eq!("progress".parse(), Ok(ProgressType::Bar));
        assert_eq!("progressbar".parse(), Ok(ProgressType::Bar));
        assert_eq!("console".parse(), Ok(ProgressType::Console));
        assert_eq!("none".parse(), Ok(ProgressType::Silent));
        assert_eq!("fancy".parse(), Ok(ProgressType::Silent));
    }
}
