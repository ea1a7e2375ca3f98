use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chat::{ChatEvent, ChatHandle, OutboundMsg};
use crate::error::ChatError;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Connection settings for the line-oriented IRC transport.
#[derive(Debug, Clone)]
pub struct IrcConfig {
    pub host: String,
    pub ssl_port: u16,
    pub nick: String,
    /// NickServ password, identified with after registration.
    pub password: Option<String>,
    /// User mode applied after registration, e.g. "+igR".
    pub mode: Option<String>,
    /// Channels to join on every (re)connect.
    pub channels: Vec<String>,
}

/// Start the transport. Returns the send handle, the event stream and the
/// transport task, which reconnects forever until every handle is dropped.
pub fn spawn(config: IrcConfig) -> (ChatHandle, mpsc::Receiver<ChatEvent>, JoinHandle<()>) {
    let (handle, outbound) = ChatHandle::new();
    handle.set_connected(false);
    let (events_tx, events_rx) = mpsc::channel(64);
    let task_handle = handle.clone();
    let task = tokio::spawn(async move {
        run(config, task_handle, outbound, events_tx).await;
    });
    (handle, events_rx, task)
}

async fn run(
    config: IrcConfig,
    handle: ChatHandle,
    mut outbound: mpsc::UnboundedReceiver<OutboundMsg>,
    events: mpsc::Sender<ChatEvent>,
) {
    loop {
        match run_connection(&config, &handle, &mut outbound, &events).await {
            Ok(false) => {
                info!("chat transport stopping");
                return;
            }
            Ok(true) => warn!("connection closed by server"),
            Err(err) => warn!(error = %err, "connection failed"),
        }
        handle.set_connected(false);
        let _ = events.send(ChatEvent::Disconnected).await;
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

/// One connection's lifetime. Ok(true) means reconnect, Ok(false) means all
/// senders are gone and the transport should stop.
async fn run_connection(
    config: &IrcConfig,
    handle: &ChatHandle,
    outbound: &mut mpsc::UnboundedReceiver<OutboundMsg>,
    events: &mpsc::Sender<ChatEvent>,
) -> Result<bool, ChatError> {
    info!(host = %config.host, port = config.ssl_port, "connecting");
    let tcp = TcpStream::connect((config.host.as_str(), config.ssl_port)).await?;
    let connector = tokio_native_tls::TlsConnector::from(native_tls::TlsConnector::new()?);
    let stream = connector.connect(&config.host, tcp).await?;
    let (read_half, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(read_half).lines();

    send_line(&mut writer, &format!("NICK {}", config.nick)).await?;
    send_line(&mut writer, &format!("USER {} 0 * :{}", config.nick, config.nick)).await?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => handle_line(config, handle, events, &mut writer, &line).await?,
                    None => return Ok(true),
                }
            }
            msg = outbound.recv() => {
                match msg {
                    Some(msg) => {
                        send_line(&mut writer, &format!("PRIVMSG {} :{}", msg.target, msg.text))
                            .await?;
                    }
                    None => {
                        let _ = send_line(&mut writer, "QUIT :").await;
                        return Ok(false);
                    }
                }
            }
        }
    }
}

async fn handle_line<W: AsyncWrite + Unpin>(
    config: &IrcConfig,
    handle: &ChatHandle,
    events: &mpsc::Sender<ChatEvent>,
    writer: &mut W,
    line: &str,
) -> Result<(), ChatError> {
    let Some(msg) = parse_line(line) else {
        return Ok(());
    };
    match msg.command.as_str() {
        "PING" => {
            let token = msg.params.first().map(String::as_str).unwrap_or_default();
            send_line(writer, &format!("PONG :{token}")).await?;
        }
        // RPL_WELCOME: registration is complete.
        "001" => {
            handle.set_connected(true);
            if let Some(password) = &config.password {
                send_line(
                    writer,
                    &format!("PRIVMSG NickServ :IDENTIFY {} {password}", config.nick),
                )
                .await?;
            }
            if let Some(mode) = &config.mode {
                send_line(writer, &format!("MODE {} {mode}", config.nick)).await?;
            }
            for channel in &config.channels {
                send_line(writer, &format!("JOIN {channel}")).await?;
            }
            let _ = events.send(ChatEvent::Connected).await;
        }
        "JOIN" => {
            if let (Some(prefix), Some(channel)) = (&msg.prefix, msg.params.first()) {
                let event = ChatEvent::Joined {
                    nick: prefix.nick.clone(),
                    channel: channel.clone(),
                };
                let _ = events.send(event).await;
            }
        }
        "PRIVMSG" => {
            if let (Some(prefix), Some(target), Some(text)) =
                (&msg.prefix, msg.params.first(), msg.params.get(1))
            {
                let event = ChatEvent::Message {
                    nick: prefix.nick.clone(),
                    ident: prefix.ident.clone(),
                    host: prefix.host.clone(),
                    target: target.clone(),
                    text: text.clone(),
                };
                let _ = events.send(event).await;
            }
        }
        _ => debug!(command = %msg.command, "ignoring"),
    }
    Ok(())
}

async fn send_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<(), ChatError> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await?;
    Ok(())
}

#[derive(Debug, PartialEq)]
struct Prefix {
    nick: String,
    ident: String,
    host: String,
}

#[derive(Debug, PartialEq)]
struct IrcMessage {
    prefix: Option<Prefix>,
    command: String,
    params: Vec<String>,
}

// Ref: https://tools.ietf.org/html/rfc1459
fn parse_line(line: &str) -> Option<IrcMessage> {
    let mut rest = line.trim_end_matches(['\r', '\n']);
    let prefix = match rest.strip_prefix(':') {
        Some(stripped) => {
            let (prefix, tail) = stripped.split_once(' ')?;
            rest = tail;
            Some(parse_prefix(prefix))
        }
        None => None,
    };
    let (head, trailing) = match rest.split_once(" :") {
        Some((head, trailing)) => (head, Some(trailing)),
        None => (rest, None),
    };
    let mut params: Vec<String> = head.split_whitespace().map(str::to_string).collect();
    if params.is_empty() {
        return None;
    }
    let command = params.remove(0).to_uppercase();
    if let Some(trailing) = trailing {
        params.push(trailing.to_string());
    }
    Some(IrcMessage {
        prefix,
        command,
        params,
    })
}

fn parse_prefix(prefix: &str) -> Prefix {
    let (nick, rest) = prefix.split_once('!').unwrap_or((prefix, ""));
    let (ident, host) = rest.split_once('@').unwrap_or((rest, ""));
    Prefix {
        nick: nick.to_string(),
        ident: ident.to_string(),
        host: host.to_string(),
    }
}
