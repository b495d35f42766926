//! Minimal Twitch chat client over IRC with TLS.
//!
//! Only what the bot needs: log in, join one channel, answer PINGs, turn
//! PRIVMSG lines into [`ChatMessage`]s and send PRIVMSGs back.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use futures::{stream, Stream};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines},
    net::TcpStream,
    sync::Mutex,
};
use tokio_native_tls::{native_tls, TlsConnector};
use tracing::{debug, info};

use crate::engine::{normalize_channel, ChatMessage};

pub const TWITCH_IRC_HOST: &str = "irc.chat.twitch.tv";
pub const TWITCH_IRC_TLS_PORT: u16 = 6697;

type ChatReader = Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>;
type ChatWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[async_trait]
pub trait ChatSink: Send + Sync {
    async fn say(&self, channel: &str, text: &str) -> color_eyre::Result<()>;
}

#[derive(Debug, PartialEq, Eq)]
enum Line<'a> {
    Ping(&'a str),
    Privmsg {
        tags: HashMap<&'a str, &'a str>,
        nick: &'a str,
        channel: &'a str,
        text: &'a str,
    },
    Reconnect,
    Other,
}

fn parse_tags(raw: &str) -> HashMap<&str, &str> {
    raw.split(';')
        .filter_map(|tag| {
            let (key, value) = tag.split_once('=').unwrap_or((tag, ""));
            (!key.is_empty()).then_some((key, value))
        })
        .collect()
}

fn parse_line(line: &str) -> Line<'_> {
    let mut rest = line.trim_end_matches(['\r', '\n']);

    let mut tags = HashMap::new();
    if let Some(tagged) = rest.strip_prefix('@') {
        let Some((raw, after)) = tagged.split_once(' ') else {
            return Line::Other;
        };
        tags = parse_tags(raw);
        rest = after;
    }

    let mut prefix = "";
    if let Some(prefixed) = rest.strip_prefix(':') {
        let Some((p, after)) = prefixed.split_once(' ') else {
            return Line::Other;
        };
        prefix = p;
        rest = after;
    }

    let (command, params) = rest.split_once(' ').unwrap_or((rest, ""));
    match command {
        "PING" => Line::Ping(params.trim_start_matches(':')),
        "RECONNECT" => Line::Reconnect,
        "PRIVMSG" => {
            let Some((channel, text)) = params.split_once(" :") else {
                return Line::Other;
            };
            let nick = prefix.split('!').next().unwrap_or_default();
            Line::Privmsg {
                tags,
                nick,
                channel,
                text: strip_action(text),
            }
        }
        _ => Line::Other,
    }
}

/// `/me` messages arrive wrapped in a CTCP ACTION.
fn strip_action(text: &str) -> &str {
    text.strip_prefix("\u{1}ACTION ")
        .map(|t| t.trim_end_matches('\u{1}'))
        .unwrap_or(text)
}

fn to_chat_message(line: Line<'_>, login: &str) -> Option<ChatMessage> {
    let Line::Privmsg {
        tags,
        nick,
        channel,
        text,
    } = line
    else {
        return None;
    };

    let username = if nick.is_empty() {
        tags.get("display-name").copied().unwrap_or("Unknown")
    } else {
        nick
    };

    Some(ChatMessage {
        channel: normalize_channel(channel),
        username: username.to_owned(),
        text: text.to_owned(),
        is_self: username.eq_ignore_ascii_case(login),
    })
}

/// Write half of a chat connection. Cheap to clone.
#[derive(Clone)]
pub struct IrcSender {
    writer: Arc<Mutex<ChatWriter>>,
}

impl IrcSender {
    async fn raw(&self, line: &str) -> color_eyre::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\r\n").await?;
        writer.flush().await?;
        Ok(())
    }

    pub async fn quit(&self) -> color_eyre::Result<()> {
        self.raw("QUIT").await?;
        self.writer.lock().await.shutdown().await?;
        Ok(())
    }
}

#[async_trait]
impl ChatSink for IrcSender {
    async fn say(&self, channel: &str, text: &str) -> color_eyre::Result<()> {
        self.raw(&format!("PRIVMSG #{} :{}", normalize_channel(channel), text))
            .await
    }
}

pub struct IrcConnection {
    sender: IrcSender,
    lines: ChatReader,
    login: String,
}

impl IrcConnection {
    /// Opens a TLS session to `host` and logs in. Nothing is written until
    /// the handshake has succeeded.
    pub async fn connect(
        host: &str,
        port: u16,
        login: &str,
        oauth: &str,
        channel: &str,
    ) -> color_eyre::Result<Self> {
        let tcp = TcpStream::connect((host, port)).await?;
        let connector = TlsConnector::from(native_tls::TlsConnector::new()?);
        let tls = connector.connect(host, tcp).await?;
        debug!(host, port, "tls session established");
        Self::login(tls, login, oauth, channel).await
    }

    async fn login<S>(stream: S, login: &str, oauth: &str, channel: &str) -> color_eyre::Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        let read: Box<dyn AsyncRead + Send + Unpin> = Box::new(read);
        let write: ChatWriter = Box::new(write);
        let sender = IrcSender {
            writer: Arc::new(Mutex::new(write)),
        };

        let pass = if oauth.starts_with("oauth:") {
            oauth.to_owned()
        } else {
            format!("oauth:{}", oauth)
        };
        let login = login.to_lowercase();

        sender.raw("CAP REQ :twitch.tv/tags").await?;
        sender.raw(&format!("PASS {}", pass)).await?;
        sender.raw(&format!("NICK {}", login)).await?;
        sender
            .raw(&format!("JOIN #{}", normalize_channel(channel)))
            .await?;
        info!(channel = %normalize_channel(channel), "connected to twitch chat");

        Ok(Self {
            sender,
            lines: BufReader::new(read).lines(),
            login,
        })
    }

    pub fn sender(&self) -> IrcSender {
        self.sender.clone()
    }

    /// Chat messages in arrival order. Ends when the server closes the
    /// connection or asks us to reconnect.
    pub fn messages(self) -> impl Stream<Item = color_eyre::Result<ChatMessage>> + Send {
        stream::unfold(Some(self), |state| async move {
            let mut conn = state?;
            loop {
                let line = match conn.lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => return None,
                    Err(e) => return Some((Err(color_eyre::Report::from(e)), None)),
                };

                match parse_line(&line) {
                    Line::Ping(token) => {
                        if let Err(e) = conn.sender.raw(&format!("PONG :{}", token)).await {
                            return Some((Err(e), None));
                        }
                    }
                    Line::Reconnect => {
                        info!("twitch asked for reconnect");
                        return None;
                    }
                    line @ Line::Privmsg { .. } => {
                        if let Some(message) = to_chat_message(line, &conn.login) {
                            return Some((Ok(message), Some(conn)));
                        }
                    }
                    Line::Other => debug!(line = %line, "irc"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;
    use tokio::{
        io::{duplex, AsyncReadExt},
        net::TcpListener,
        time::timeout,
    };

    use super::*;

    #[tokio::test]
    async fn login_then_ping_and_privmsg() {
        let (client, server) = duplex(4096);
        let conn = IrcConnection::login(client, "EchoBot", "secret", "#Streamer")
            .await
            .unwrap();

        let (server_read, mut server_write) = tokio::io::split(server);
        let mut server_lines = BufReader::new(server_read).lines();
        let mut sent = vec![];
        for _ in 0..4 {
            sent.push(server_lines.next_line().await.unwrap().unwrap());
        }
        assert_eq!(
            sent,
            vec![
                "CAP REQ :twitch.tv/tags",
                "PASS oauth:secret",
                "NICK echobot",
                "JOIN #streamer",
            ]
        );

        server_write
            .write_all(b"PING :tmi.twitch.tv\r\n:viewer!viewer@viewer.tmi.twitch.tv PRIVMSG #streamer :KEKW\r\n")
            .await
            .unwrap();

        let messages = conn.messages();
        futures::pin_mut!(messages);
        let message = messages.next().await.unwrap().unwrap();
        assert_eq!(message.username, "viewer");
        assert_eq!(message.text, "KEKW");
        assert_eq!(
            server_lines.next_line().await.unwrap().as_deref(),
            Some("PONG :tmi.twitch.tv")
        );
    }

    #[tokio::test]
    async fn credentials_never_cross_a_plaintext_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let read = timeout(Duration::from_secs(5), socket.read(&mut buf))
                .await
                .unwrap()
                .unwrap();
            buf.truncate(read);
            buf
        });

        let result = timeout(
            Duration::from_secs(10),
            IrcConnection::connect("127.0.0.1", port, "echobot", "oauth:SECRETTOKEN", "streamer"),
        )
        .await
        .unwrap();
        assert!(result.is_err());

        let wire = String::from_utf8_lossy(&server.await.unwrap()).into_owned();
        assert!(!wire.is_empty());
        assert!(!wire.contains("SECRETTOKEN"));
        assert!(!wire.contains("PASS"));
    }

    #[test]
    fn parses_ping() {
        assert_eq!(parse_line("PING :tmi.twitch.tv\r\n"), Line::Ping("tmi.twitch.tv"));
    }

    #[test]
    fn parses_reconnect() {
        assert_eq!(parse_line(":tmi.twitch.tv RECONNECT"), Line::Reconnect);
    }

    #[test]
    fn parses_untagged_privmsg() {
        let line = parse_line(":viewer!viewer@viewer.tmi.twitch.tv PRIVMSG #streamer :KEKW lol");
        let message = to_chat_message(line, "echobot").unwrap();
        assert_eq!(
            message,
            ChatMessage {
                channel: "streamer".to_owned(),
                username: "viewer".to_owned(),
                text: "KEKW lol".to_owned(),
                is_self: false,
            }
        );
    }

    #[test]
    fn parses_tagged_privmsg() {
        let raw = "@badge-info=;color=#FF0000;display-name=Viewer;mod=0 \
                   :viewer!viewer@viewer.tmi.twitch.tv PRIVMSG #Streamer :hi :) KEKW";
        let message = to_chat_message(parse_line(raw), "echobot").unwrap();
        assert_eq!(message.username, "viewer");
        assert_eq!(message.channel, "streamer");
        assert_eq!(message.text, "hi :) KEKW");
    }

    #[test]
    fn display_name_used_without_prefix_nick() {
        let message = to_chat_message(
            parse_line("@display-name=Viewer :!x@x PRIVMSG #streamer :KEKW"),
            "echobot",
        )
        .unwrap();
        assert_eq!(message.username, "Viewer");
    }

    #[test]
    fn own_messages_flagged() {
        let message = to_chat_message(
            parse_line(":EchoBot!echobot@echobot.tmi.twitch.tv PRIVMSG #streamer :KEKW"),
            "echobot",
        )
        .unwrap();
        assert!(message.is_self);
    }

    #[test]
    fn action_wrapper_stripped() {
        let message = to_chat_message(
            parse_line(":a!a@a PRIVMSG #streamer :\u{1}ACTION dances catJAM\u{1}"),
            "echobot",
        )
        .unwrap();
        assert_eq!(message.text, "dances catJAM");
    }

    #[test]
    fn other_lines_ignored() {
        assert_eq!(parse_line(":tmi.twitch.tv 001 echobot :Welcome, GLHF!"), Line::Other);
        assert_eq!(parse_line(":echobot!echobot@echobot.tmi.twitch.tv JOIN #streamer"), Line::Other);
        assert!(to_chat_message(Line::Other, "echobot").is_none());
    }
}
