pub mod cli;
pub mod commands;
pub mod error;

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::channel::{ChannelRequest, ChannelSignal, WebSocketChannel};
use crate::client::{ConnectionPhase, LiveClient, SessionRequest};
use crate::config::Config;
use crate::dom::Document;
use crate::page::{self, HttpPageSource, PageSource};

use cli::Cli;
use commands::{Command, USAGE};
use error::CliError;

const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// How one page session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    Quit,
    Closed,
    Reload,
    Navigate(String),
}

impl From<SessionRequest> for SessionEnd {
    fn from(request: SessionRequest) -> Self {
        match request {
            SessionRequest::Reload => SessionEnd::Reload,
            SessionRequest::Navigate(target) => SessionEnd::Navigate(target),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub async fn run(cli: Cli) -> Result<(), CliError> {
    let config = cli.config()?;
    let source = HttpPageSource::new(config.session_cookie.clone())?;
    let mut lines = spawn_stdin_lines();
    let mut url = config.page_url.clone();
    let mut reloads = 0;

    loop {
        let interrupt = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(target: "riptide::session", error = %err, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        };
        match run_session(&config, &source, &url, &mut lines, interrupt).await? {
            SessionEnd::Quit | SessionEnd::Closed => return Ok(()),
            SessionEnd::Reload => {
                reloads += 1;
                if reloads > config.max_reloads {
                    return Err(CliError::ReloadLimit {
                        limit: config.max_reloads,
                    });
                }
                info!(target: "riptide::session", attempt = reloads, %url, "reloading page");
            }
            SessionEnd::Navigate(target) => {
                url = page::resolve(&url, &target)?;
                info!(target: "riptide::session", %url, "navigating");
            }
        }
    }
}

/// Loads `url`, connects its live channel and runs until the session ends.
/// `interrupt` completing ends the session like `quit`.
pub async fn run_session(
    config: &Config,
    source: &dyn PageSource,
    url: &Url,
    lines: &mut mpsc::UnboundedReceiver<String>,
    interrupt: impl Future<Output = ()>,
) -> Result<SessionEnd, CliError> {
    let page = source.load(url).await?;
    let document = Document::parse(&page.markup);

    let mut request = ChannelRequest::new(page::channel_url(&page.url, &config.ws_path)?);
    match &page.session_cookie {
        Some(value) => request = request.with_cookie(config.session_cookie.clone(), value.clone()),
        None => warn!(
            target: "riptide::session",
            cookie = %config.session_cookie,
            "page did not set a session cookie"
        ),
    }
    let (channel, mut signals) = WebSocketChannel::open(request)?;
    let mut client = LiveClient::new(document, Box::new(channel));
    let mut stdin_open = true;
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            signal = signals.recv() => match signal {
                Some(signal) => client.handle_signal(signal),
                None => client.on_close(),
            },
            line = lines.recv(), if stdin_open => match line {
                Some(line) => {
                    if execute_line(&mut client, &line) == Flow::Quit {
                        shutdown(&mut client, &mut signals).await;
                        return Ok(SessionEnd::Quit);
                    }
                }
                None => {
                    debug!(target: "riptide::session", "stdin closed");
                    stdin_open = false;
                }
            },
            () = &mut interrupt => {
                shutdown(&mut client, &mut signals).await;
                return Ok(SessionEnd::Quit);
            }
        }

        if let Some(request) = client.take_request() {
            close_and_drain(&mut client, &mut signals).await;
            return Ok(request.into());
        }
        if client.phase() == ConnectionPhase::Closed {
            return Ok(SessionEnd::Closed);
        }
    }
}

/// Announces every component as gone and waits briefly for the close.
async fn shutdown(client: &mut LiveClient, signals: &mut mpsc::UnboundedReceiver<ChannelSignal>) {
    if client.phase() == ConnectionPhase::Open {
        let sent = client.disconnect_all();
        debug!(target: "riptide::session", components = sent, "sent disconnects");
    }
    close_and_drain(client, signals).await;
}

/// Queues the close and waits briefly for the channel task to send it.
async fn close_and_drain(client: &mut LiveClient, signals: &mut mpsc::UnboundedReceiver<ChannelSignal>) {
    client.close();
    let drained = tokio::time::timeout(CLOSE_GRACE, async {
        while let Some(signal) = signals.recv().await {
            if signal == ChannelSignal::Closed {
                break;
            }
        }
    })
    .await;
    if drained.is_err() {
        debug!(target: "riptide::session", "channel did not close in time");
    }
    client.on_close();
}

fn spawn_stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(target: "riptide::session", error = %err, "failed to read stdin");
                    break;
                }
            }
        }
    });
    rx
}

pub fn execute_line(client: &mut LiveClient, line: &str) -> Flow {
    match line.parse::<Command>() {
        Ok(command) => execute(client, command),
        Err(commands::CommandError::Empty) => Flow::Continue,
        Err(err) => {
            eprintln!("{err}");
            Flow::Continue
        }
    }
}

pub fn execute(client: &mut LiveClient, command: Command) -> Flow {
    match command {
        Command::Act { selector, action } => match client.interact_selector(&selector, &action) {
            Ok(sent) => println!("sent {sent} message(s)"),
            Err(err) => eprintln!("{err}"),
        },
        Command::Html { selector } => match render(client.document(), selector.as_deref()) {
            Ok(markup) => println!("{markup}"),
            Err(err) => eprintln!("{err}"),
        },
        Command::Rescan => {
            let report = client.rescan();
            println!(
                "bound {} element(s): {} click, {} keydown, {} input",
                report.total(),
                report.clicks,
                report.keydowns,
                report.inputs
            );
        }
        Command::Help => println!("{USAGE}"),
        Command::Quit => return Flow::Quit,
    }
    Flow::Continue
}

fn render(doc: &Document, selector: Option<&str>) -> Result<String, crate::client::ClientError> {
    let Some(selector) = selector else {
        return Ok(doc.inner_html(doc.root()));
    };
    doc.query_selector(doc.root(), selector)?
        .map(|node| doc.outer_html(node))
        .ok_or_else(|| crate::client::ClientError::NoMatch(selector.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RecordingChannel;

    fn client() -> (LiveClient, RecordingChannel) {
        let channel = RecordingChannel::new();
        let doc = Document::parse(
            r#"<div id="app" go-live-component-id="c"><button id="go" go-live-click="Go">go</button></div>"#,
        );
        let mut client = LiveClient::new(doc, Box::new(channel.clone()));
        client.on_open();
        (client, channel)
    }

    #[test]
    fn commands_drive_the_client() {
        let (mut client, channel) = client();
        assert_eq!(execute_line(&mut client, "rescan"), Flow::Continue);
        assert_eq!(execute_line(&mut client, "click #go"), Flow::Continue);
        assert_eq!(channel.sent_json()[0]["method_name"], "Go");
        assert_eq!(execute_line(&mut client, "bogus"), Flow::Continue);
        assert_eq!(execute_line(&mut client, "quit"), Flow::Quit);
    }

    #[test]
    fn renders_whole_document_or_selection() {
        let (client, _) = client();
        let doc = client.document();
        assert!(render(doc, None).expect("render").starts_with("<div id=\"app\""));
        assert_eq!(
            render(doc, Some("#go")).expect("render"),
            r#"<button id="go" go-live-click="Go">go</button>"#
        );
        assert!(render(doc, Some("#missing")).is_err());
    }

    #[test]
    fn session_requests_map_to_session_ends() {
        assert_eq!(SessionEnd::from(SessionRequest::Reload), SessionEnd::Reload);
        assert_eq!(
            SessionEnd::from(SessionRequest::Navigate("/x".into())),
            SessionEnd::Navigate("/x".into())
        );
    }
}
