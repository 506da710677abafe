use clap::{Args, Parser, Subcommand};

use crate::broadcast::model::{BroadcastPayload, BroadcastRequest, ChannelSelection, Media, MediaKind};

#[derive(Parser)]
#[command(name = "tgcast")]
#[command(author, version, about = "Broadcast dispatch engine for a Telegram subscription bot", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a broadcast and follow it to completion (Ctrl-C stops it)
    Send(SendArgs),

    /// Show how many recipients a selector currently matches
    Preview {
        /// Selector token, e.g. `active`, `tariff_7`, `all_email`
        target: String,
    },

    /// Show a run record
    Status {
        /// Run id
        id: i64,
    },

    /// List run records, newest first
    List {
        #[arg(short, long, default_value_t = 20)]
        limit: u32,

        #[arg(short, long, default_value_t = 0)]
        offset: u32,
    },

    /// Apply pending database migrations and exit
    Migrate,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Delivery channel
    #[arg(short, long, default_value = "telegram")]
    pub channel: ChannelSelection,

    /// Audience selector token
    #[arg(short, long)]
    pub target: String,

    /// Email audience when `--channel both` (default: all_email)
    #[arg(long)]
    pub email_target: Option<String>,

    /// Message text (HTML); caption when media is attached
    #[arg(long)]
    pub text: Option<String>,

    /// Media kind for `--file-id`
    #[arg(long, requires = "file_id")]
    pub media: Option<MediaKind>,

    /// Telegram file id of already-uploaded media
    #[arg(long, requires = "media")]
    pub file_id: Option<String>,

    /// Email subject
    #[arg(long)]
    pub subject: Option<String>,

    /// Email body (HTML)
    #[arg(long)]
    pub html: Option<String>,

    /// Print Prometheus metrics to stderr when the run ends
    #[arg(long)]
    pub print_metrics: bool,
}

impl SendArgs {
    pub fn into_request(self) -> BroadcastRequest {
        let media = match (self.media, self.file_id) {
            (Some(kind), Some(file_id)) => Some(Media { kind, file_id }),
            _ => None,
        };
        BroadcastRequest {
            channel: self.channel,
            target: self.target,
            email_target: self.email_target,
            payload: BroadcastPayload {
                text: self.text,
                media,
                email_subject: self.subject,
                email_html: self.html,
            },
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
