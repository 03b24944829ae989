//! omni-chat – terminal client.
//!
//! Reads one message per line from stdin (or takes a single message from
//! the command line), streams each reply to stdout as it arrives, and keeps
//! the conversation going in the same chat.

use std::io::Write as _;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use omni_client::{HistoryNavigator, HttpChatApi, StateHandle, StreamConsumer, TurnOutcome};
use omni_types::{Attachment, AttachmentKind, ChatId, MessageId, Role};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, Parser)]
#[command(name = "omni-chat", version, about = "Chat with an omni-server from the terminal")]
struct Args {
    /// Server root URL.
    #[arg(long, default_value = "http://localhost:5000")]
    server: String,

    /// Continue an existing chat instead of starting a new one.
    #[arg(long)]
    chat: Option<ChatId>,

    /// Attach an uploaded file to the first message, as `name=url:kind`
    /// (kind is image, video or file).  Repeatable.
    #[arg(long = "attach", value_parser = parse_attachment)]
    attachments: Vec<Attachment>,

    /// List chats, newest first, and exit.
    #[arg(long)]
    list: bool,

    /// Send this message and exit instead of reading stdin.
    message: Option<String>,
}

fn parse_attachment(s: &str) -> Result<Attachment, String> {
    let (name, rest) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=url:kind, got '{s}'"))?;
    let (url, kind) = rest
        .rsplit_once(':')
        .ok_or_else(|| format!("missing :kind in '{s}'"))?;
    let kind: AttachmentKind = kind.parse().map_err(|e| format!("bad kind '{kind}': {e}"))?;
    Ok(Attachment {
        name: name.to_owned(),
        url: url.to_owned(),
        kind,
    })
}

/// Prints the growing assistant reply as deltas.
#[derive(Default)]
struct ReplyPrinter {
    message_id: Option<MessageId>,
    printed: String,
}

impl ReplyPrinter {
    fn render(&mut self, state: &StateHandle) {
        let Some(last) = state.messages().pop() else {
            return;
        };
        if last.role != Role::Assistant {
            return;
        }
        if self.message_id != Some(last.id) {
            self.message_id = Some(last.id);
            self.printed.clear();
        }
        let mut out = std::io::stdout().lock();
        match last.content.strip_prefix(self.printed.as_str()) {
            Some(delta) => {
                let _ = write!(out, "{delta}");
            }
            // The reply was replaced by an error message.
            None => {
                let _ = write!(out, "\n{}", last.content);
            }
        }
        let _ = out.flush();
        self.printed = last.content;
    }
}

async fn run_turn(consumer: &StreamConsumer, text: &str, attachments: Vec<Attachment>) -> TurnOutcome {
    let state = consumer.state().clone();
    let mut changes = state.subscribe();
    let mut printer = ReplyPrinter::default();

    let turn = consumer.send_message(text, attachments);
    tokio::pin!(turn);
    let outcome = loop {
        tokio::select! {
            outcome = &mut turn => break outcome,
            Ok(()) = changes.changed() => printer.render(&state),
        }
    };
    printer.render(&state);
    println!();
    outcome
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let args = Args::parse();
    let api = Arc::new(HttpChatApi::new(&args.server)?);
    let state = StateHandle::new();
    let history = HistoryNavigator::new(api.clone(), state.clone());
    let consumer = StreamConsumer::new(api, state.clone());

    if args.list {
        history.load_chats().await.context("listing chats")?;
        for chat in state.chats() {
            println!("{:>6}  {}", chat.id, chat.title);
        }
        return Ok(());
    }

    if let Some(chat_id) = args.chat {
        history
            .select_chat(chat_id)
            .await
            .with_context(|| format!("loading chat {chat_id}"))?;
        for message in state.messages() {
            println!("[{}] {}", message.role, message.content);
        }
    }

    let mut attachments = args.attachments;
    if let Some(text) = args.message {
        if let TurnOutcome::Failed(shown) = run_turn(&consumer, &text, attachments).await {
            anyhow::bail!(shown);
        }
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == "/new" {
            history.new_chat();
            println!("(new chat)");
            continue;
        }
        run_turn(&consumer, text, std::mem::take(&mut attachments)).await;
    }
    Ok(())
}
