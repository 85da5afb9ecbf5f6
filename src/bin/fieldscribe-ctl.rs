//! Short-lived control client. Finds the running controller through the
//! connection descriptor, issues one request, prints the response, exits.
//! Transport and discovery live in `fieldscribe_lib::client`.

use clap::{Parser, Subcommand};
use fieldscribe_lib::client::{self, ClientError};
use fieldscribe_lib::config::DEFAULT_KEY_DELAY_MS;
use fieldscribe_lib::runtime::{self, snapshot};
use std::process::ExitCode;
use std::time::Duration;

/// Exit code for "no controller reachable", distinct from request failures
/// so scripts can tell the two apart.
const EXIT_UNREACHABLE: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "fieldscribe-ctl", version, about = "Form field control client")]
struct Args {
    /// Controller port (overrides the connection descriptor)
    #[arg(long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show controller status from the connection descriptor
    Status,
    /// Rescan the page for fillable fields
    Scan,
    /// Show the current page url and title
    Page,
    /// List fields from the last scan snapshot (no controller round trip)
    Fields,
    /// Show one field's descriptor
    Get { field_id: String },
    /// Read a field's current value
    Read { field_id: String },
    /// Set a field's value, falling back to keystroke typing if the page
    /// rejects direct insertion
    Set { field_id: String, text: String },
    /// Type text into a field keystroke by keystroke
    Type {
        field_id: String,
        text: String,
        #[arg(long)]
        delay_ms: Option<u64>,
    },
    /// Restore a field to its value before the last mutation
    Revert { field_id: String },
    /// Flash a visual marker on a field in the browser
    Highlight { field_id: String },
    /// Ask the controller to shut down
    Stop,
}

impl Command {
    /// Overall request deadline. Mutations that type keystrokes take
    /// `chars * delay` on the controller side and must never be cut off
    /// mid-field by the client's own timeout.
    fn timeout(&self) -> Duration {
        match self {
            Command::Type { text, delay_ms, .. } => client::operation_timeout(
                text.chars().count(),
                delay_ms.unwrap_or(DEFAULT_KEY_DELAY_MS),
            ),
            // A blocked set falls back to typing at the default delay
            Command::Set { text, .. } => {
                client::operation_timeout(text.chars().count(), DEFAULT_KEY_DELAY_MS)
            }
            _ => client::BASE_TIMEOUT,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let runtime_dir = runtime::default_runtime_dir();

    // `fields` is served from the snapshot on disk; no controller needed
    if let Command::Fields = args.command {
        return match snapshot::load(&runtime_dir).await? {
            Some(snap) => {
                println!("{}", serde_json::to_string_pretty(&snap)?);
                Ok(ExitCode::SUCCESS)
            }
            None => {
                eprintln!("no scan snapshot yet; run `fieldscribe-ctl scan` first");
                Ok(ExitCode::from(1))
            }
        };
    }

    let Some(port) = client::resolve_port(&runtime_dir, args.port).await? else {
        eprintln!("controller unreachable: no connection descriptor found");
        return Ok(ExitCode::from(EXIT_UNREACHABLE));
    };

    if let Command::Status = args.command {
        // Descriptor contents plus a live health probe
        let descriptor = fieldscribe_lib::runtime::descriptor::load(&runtime_dir).await?;
        return match client::request(
            port,
            reqwest::Method::GET,
            "/api/health",
            None,
            client::BASE_TIMEOUT,
        )
        .await
        {
            Ok(health) => {
                let status = serde_json::json!({
                    "descriptor": descriptor,
                    "health": health,
                });
                println!("{}", serde_json::to_string_pretty(&status)?);
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                eprintln!("{}", e);
                Ok(ExitCode::from(EXIT_UNREACHABLE))
            }
        };
    }

    let (method, path, body) = match &args.command {
        Command::Scan => (reqwest::Method::POST, "/api/scan".to_string(), None),
        Command::Page => (reqwest::Method::GET, "/api/page".to_string(), None),
        Command::Get { field_id } => (
            reqwest::Method::GET,
            format!("/api/fields/{}", field_id),
            None,
        ),
        Command::Read { field_id } => (
            reqwest::Method::GET,
            format!("/api/fields/{}/value", field_id),
            None,
        ),
        Command::Set { field_id, text } => (
            reqwest::Method::POST,
            format!("/api/fields/{}/value", field_id),
            Some(serde_json::json!({ "text": text })),
        ),
        Command::Type {
            field_id,
            text,
            delay_ms,
        } => (
            reqwest::Method::POST,
            format!("/api/fields/{}/type", field_id),
            Some(serde_json::json!({ "text": text, "delay_ms": delay_ms })),
        ),
        Command::Revert { field_id } => (
            reqwest::Method::POST,
            format!("/api/fields/{}/revert", field_id),
            None,
        ),
        Command::Highlight { field_id } => (
            reqwest::Method::POST,
            format!("/api/fields/{}/highlight", field_id),
            None,
        ),
        Command::Stop => (reqwest::Method::POST, "/api/shutdown".to_string(), None),
        Command::Status | Command::Fields => unreachable!(),
    };

    let timeout = args.command.timeout();
    let mut response = match client::request(port, method, &path, body, timeout).await {
        Ok(body) => body,
        Err(e @ ClientError::Unreachable(_)) => {
            eprintln!("{}", e);
            return Ok(ExitCode::from(EXIT_UNREACHABLE));
        }
        Err(e) => {
            eprintln!("error: {}", e);
            return Ok(ExitCode::from(1));
        }
    };

    // Blocked direct insertion: retry once through the keystroke path.
    // The envelope's error code decides, never the transport status.
    if let Command::Set { field_id, text } = &args.command {
        if !client::envelope_ok(&response)
            && client::error_code(&response) == Some("insertion_blocked")
        {
            eprintln!("direct insertion blocked, retrying with keystrokes");
            response = match client::request(
                port,
                reqwest::Method::POST,
                &format!("/api/fields/{}/type", field_id),
                Some(serde_json::json!({ "text": text })),
                client::operation_timeout(text.chars().count(), DEFAULT_KEY_DELAY_MS),
            )
            .await
            {
                Ok(body) => body,
                Err(e @ ClientError::Unreachable(_)) => {
                    eprintln!("{}", e);
                    return Ok(ExitCode::from(EXIT_UNREACHABLE));
                }
                Err(e) => {
                    eprintln!("error: {}", e);
                    return Ok(ExitCode::from(1));
                }
            };
        }
    }

    if client::envelope_ok(&response) {
        println!("{}", serde_json::to_string_pretty(&response)?);
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("error: {}", client::error_message(&response));
        Ok(ExitCode::from(1))
    }
}
