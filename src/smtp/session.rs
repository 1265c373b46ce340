//! One SMTP conversation.

use std::io;
use std::time::Duration;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf,
};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::command::Command;
use crate::config::SmtpConfig;
use crate::intake::{IntakeOutcome, MailIntake};
use crate::{DispomailError, Result};

/// Longest command line accepted (RFC 5321 section 4.5.3.1.4).
const MAX_COMMAND_LINE: usize = 512;

/// Longest message line kept while reading DATA.
const MAX_DATA_LINE: usize = 64 * 1024;

/// Most recipients accepted per transaction.
const MAX_RECIPIENTS: usize = 100;

/// Result of reading one line.
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Line,
    TooLong,
    Eof,
}

/// SMTP reply for an intake result.
pub fn reply_for(result: &Result<IntakeOutcome>) -> (u16, &'static str) {
    match result {
        Ok(_) => (250, "2.0.0 Ok: queued"),
        Err(DispomailError::Parse(_)) => (554, "5.6.0 Message could not be parsed"),
        Err(_) => (451, "4.3.0 Temporary failure, try again later"),
    }
}

/// State of one SMTP session over any byte stream.
pub struct SmtpSession<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    intake: MailIntake,
    hostname: String,
    idle_timeout: Duration,
    max_message_bytes: usize,
    greeted: bool,
    mail_from: Option<String>,
    recipients: Vec<String>,
}

impl<S> SmtpSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a new session.
    pub fn new(stream: S, intake: MailIntake, config: &SmtpConfig) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(reader),
            writer,
            intake,
            hostname: config.hostname.clone(),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            max_message_bytes: config.max_message_bytes,
            greeted: false,
            mail_from: None,
            recipients: Vec::new(),
        }
    }

    /// Run the conversation until QUIT, EOF or idle timeout.
    pub async fn run(mut self) -> io::Result<()> {
        let greeting = format!("{} ESMTP dispomail", self.hostname);
        self.reply(220, &greeting).await?;

        let mut line = Vec::new();
        loop {
            match self.read_line(&mut line, MAX_COMMAND_LINE).await? {
                LineRead::Eof => break,
                LineRead::TooLong => {
                    self.reply(500, "5.5.2 Line too long").await?;
                    continue;
                }
                LineRead::Line => {}
            }

            let text = String::from_utf8_lossy(trim_eol(&line)).into_owned();
            if !self.handle_command(Command::parse(&text)).await? {
                break;
            }
        }
        Ok(())
    }

    /// Handle one command. Returns false when the session should end.
    async fn handle_command(&mut self, command: Command) -> io::Result<bool> {
        match command {
            Command::Helo(_) => {
                self.greeted = true;
                self.reset();
                let hostname = self.hostname.clone();
                self.reply(250, &hostname).await?;
            }
            Command::Ehlo(_) => {
                self.greeted = true;
                self.reset();
                let lines = [
                    self.hostname.clone(),
                    format!("SIZE {}", self.max_message_bytes),
                    "8BITMIME".to_string(),
                    "PIPELINING".to_string(),
                ];
                self.reply_multi(250, &lines).await?;
            }
            Command::MailFrom { path, size } => {
                if !self.greeted {
                    self.reply(503, "5.5.1 Send HELO/EHLO first").await?;
                } else if self.mail_from.is_some() {
                    self.reply(503, "5.5.1 Nested MAIL command").await?;
                } else if size.is_some_and(|s| s > self.max_message_bytes) {
                    self.reply(552, "5.3.4 Message size exceeds limit").await?;
                } else {
                    self.mail_from = Some(path);
                    self.reply(250, "2.1.0 Ok").await?;
                }
            }
            Command::RcptTo(path) => {
                if self.mail_from.is_none() {
                    self.reply(503, "5.5.1 Need MAIL command").await?;
                } else if self.recipients.len() >= MAX_RECIPIENTS {
                    self.reply(452, "4.5.3 Too many recipients").await?;
                } else {
                    self.recipients.push(path);
                    self.reply(250, "2.1.5 Ok").await?;
                }
            }
            Command::Data => {
                if self.recipients.is_empty() {
                    self.reply(503, "5.5.1 No valid recipients").await?;
                } else {
                    self.reply(354, "End data with <CR><LF>.<CR><LF>").await?;
                    return self.receive_data().await;
                }
            }
            Command::Rset => {
                self.reset();
                self.reply(250, "2.0.0 Ok").await?;
            }
            Command::Noop => self.reply(250, "2.0.0 Ok").await?,
            Command::Vrfy => self.reply(252, "2.5.2 Cannot VRFY user").await?,
            Command::Quit => {
                self.reply(221, "2.0.0 Bye").await?;
                return Ok(false);
            }
            Command::Malformed(reason) => {
                self.reply(501, &format!("5.5.4 {reason}")).await?;
            }
            Command::Unknown(verb) => {
                debug!("Unknown SMTP command {}", verb);
                self.reply(500, "5.5.2 Command not recognized").await?;
            }
        }
        Ok(true)
    }

    /// Read the message after `354`, hand it to intake and reply.
    async fn receive_data(&mut self) -> io::Result<bool> {
        let mut message = Vec::new();
        let mut oversized = false;
        let mut line = Vec::new();

        loop {
            match self.read_line(&mut line, MAX_DATA_LINE).await? {
                LineRead::Eof => return Ok(false),
                LineRead::TooLong => {
                    oversized = true;
                    continue;
                }
                LineRead::Line => {}
            }

            let content = trim_eol(&line);
            if content == b"." {
                break;
            }
            if oversized {
                continue;
            }

            let content = content.strip_prefix(b".").unwrap_or(content);
            if message.len() + content.len() + 2 > self.max_message_bytes {
                oversized = true;
                continue;
            }
            message.extend_from_slice(content);
            message.extend_from_slice(b"\r\n");
        }

        let recipients = std::mem::take(&mut self.recipients);
        self.mail_from = None;

        if oversized {
            warn!("Rejecting oversized message");
            self.reply(552, "5.3.4 Message size exceeds limit").await?;
            return Ok(true);
        }

        let result = self
            .intake
            .handle_incoming_message(&message, &recipients)
            .await;
        match &result {
            Ok(outcome) => info!(
                "Accepted message ({} bytes) for {} of {} recipients",
                message.len(),
                outcome.delivered.len(),
                recipients.len()
            ),
            Err(e) => warn!("Message not accepted: {}", e),
        }

        let (code, text) = reply_for(&result);
        self.reply(code, text).await?;
        Ok(true)
    }

    fn reset(&mut self) {
        self.mail_from = None;
        self.recipients.clear();
    }

    /// Read one line into `buf` (terminator included), keeping at most
    /// `max` bytes. Longer lines are consumed and reported as `TooLong`.
    async fn read_line(&mut self, buf: &mut Vec<u8>, max: usize) -> io::Result<LineRead> {
        buf.clear();
        let mut too_long = false;

        loop {
            let mut chunk = Vec::new();
            let mut limited = (&mut self.reader).take(max as u64);
            let n = timeout(self.idle_timeout, limited.read_until(b'\n', &mut chunk))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "idle timeout"))??;

            if n == 0 {
                return Ok(LineRead::Eof);
            }
            if !too_long {
                if buf.len() + chunk.len() > max {
                    too_long = true;
                    buf.clear();
                } else {
                    buf.extend_from_slice(&chunk);
                }
            }
            if chunk.ends_with(b"\n") {
                return Ok(if too_long {
                    LineRead::TooLong
                } else {
                    LineRead::Line
                });
            }
        }
    }

    async fn reply(&mut self, code: u16, text: &str) -> io::Result<()> {
        self.writer
            .write_all(format!("{code} {text}\r\n").as_bytes())
            .await?;
        self.writer.flush().await
    }

    async fn reply_multi(&mut self, code: u16, lines: &[String]) -> io::Result<()> {
        let mut out = String::new();
        for (i, line) in lines.iter().enumerate() {
            let sep = if i + 1 == lines.len() { ' ' } else { '-' };
            out.push_str(&format!("{code}{sep}{line}\r\n"));
        }
        self.writer.write_all(out.as_bytes()).await?;
        self.writer.flush().await
    }
}

fn trim_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::events::EventBus;
    use crate::store::MailStore;
    use std::sync::Arc;
    use tokio::io::{duplex, DuplexStream};

    struct Client {
        reader: BufReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl Client {
        async fn send(&mut self, line: &str) {
            self.writer
                .write_all(format!("{line}\r\n").as_bytes())
                .await
                .unwrap();
        }

        async fn expect(&mut self, code: &str) -> String {
            loop {
                let mut line = String::new();
                self.reader.read_line(&mut line).await.unwrap();
                assert!(line.starts_with(code), "expected {code}, got {line:?}");
                if line.as_bytes().get(3) != Some(&b'-') {
                    return line;
                }
            }
        }
    }

    async fn start(config: SmtpConfig) -> (Arc<dyn MailStore>, Client) {
        let db = Database::open_in_memory().await.unwrap();
        let store = db.store();
        let intake = MailIntake::new(Arc::clone(&store), EventBus::new());

        let (client, server) = duplex(64 * 1024);
        tokio::spawn(async move {
            let _ = SmtpSession::new(server, intake, &config).run().await;
        });

        let (reader, writer) = tokio::io::split(client);
        let mut client = Client {
            reader: BufReader::new(reader),
            writer,
        };
        client.expect("220").await;
        (store, client)
    }

    #[tokio::test]
    async fn test_full_transaction() {
        let (store, mut c) = start(SmtpConfig::default()).await;
        store.add_address("box").await.unwrap();

        c.send("EHLO client.test").await;
        c.expect("250").await;
        c.send("MAIL FROM:<a@example.org>").await;
        c.expect("250").await;
        c.send("RCPT TO:<box@mail.test>").await;
        c.expect("250").await;
        c.send("DATA").await;
        c.expect("354").await;
        c.send("From: a@example.org").await;
        c.send("To: box@mail.test").await;
        c.send("Subject: hi").await;
        c.send("").await;
        c.send("..leading dot").await;
        c.send(".").await;
        c.expect("250").await;
        c.send("QUIT").await;
        c.expect("221").await;

        let mails = store.get_all_mails(None).await.unwrap();
        assert_eq!(mails.len(), 1);
        assert_eq!(mails[0].subject, "hi");
        assert!(mails[0].content.contains(".leading dot"));
        assert!(!mails[0].content.contains("..leading"));
    }

    #[tokio::test]
    async fn test_unknown_recipient_is_still_accepted() {
        let (store, mut c) = start(SmtpConfig::default()).await;

        c.send("HELO client.test").await;
        c.expect("250").await;
        c.send("MAIL FROM:<a@example.org>").await;
        c.expect("250").await;
        c.send("RCPT TO:<ghost@mail.test>").await;
        c.expect("250").await;
        c.send("DATA").await;
        c.expect("354").await;
        c.send("Subject: hi").await;
        c.send("").await;
        c.send("body").await;
        c.send(".").await;
        c.expect("250").await;

        assert_eq!(store.get_all_mails(None).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_command_ordering() {
        let (_store, mut c) = start(SmtpConfig::default()).await;

        c.send("MAIL FROM:<a@example.org>").await;
        c.expect("503").await;
        c.send("EHLO client.test").await;
        c.expect("250").await;
        c.send("RCPT TO:<box@mail.test>").await;
        c.expect("503").await;
        c.send("MAIL FROM:<a@example.org>").await;
        c.expect("250").await;
        c.send("DATA").await;
        c.expect("503").await;
        c.send("RSET").await;
        c.expect("250").await;
        c.send("NOOP").await;
        c.expect("250").await;
        c.send("BOGUS").await;
        c.expect("500").await;
    }

    #[tokio::test]
    async fn test_oversized_message() {
        let config = SmtpConfig {
            max_message_bytes: 64,
            ..Default::default()
        };
        let (store, mut c) = start(config).await;
        store.add_address("box").await.unwrap();

        c.send("EHLO client.test").await;
        c.expect("250").await;
        c.send("MAIL FROM:<a@example.org> SIZE=1000").await;
        c.expect("552").await;
        c.send("MAIL FROM:<a@example.org>").await;
        c.expect("250").await;
        c.send("RCPT TO:<box@mail.test>").await;
        c.expect("250").await;
        c.send("DATA").await;
        c.expect("354").await;
        c.send("Subject: a long one").await;
        c.send("").await;
        c.send(&"x".repeat(200)).await;
        c.send(".").await;
        c.expect("552").await;

        assert_eq!(store.get_all_mails(None).await.unwrap().len(), 0);
    }

    #[test]
    fn test_reply_codes() {
        assert_eq!(reply_for(&Ok(IntakeOutcome::default())).0, 250);
        assert_eq!(
            reply_for(&Err(DispomailError::Parse("x".into()))).0,
            554
        );
        assert_eq!(
            reply_for(&Err(DispomailError::StoreUnavailable("x".into()))).0,
            451
        );
    }

    #[test]
    fn test_trim_eol() {
        assert_eq!(trim_eol(b"abc\r\n"), b"abc");
        assert_eq!(trim_eol(b"abc\n"), b"abc");
        assert_eq!(trim_eol(b"abc"), b"abc");
    }
}
