//! End-to-end tests for the SMTP listener writing into an on-disk store.

use std::net::SocketAddr;

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use dispomail::config::SmtpConfig;
use dispomail::intake::MailIntake;
use dispomail::store::{MailQuery, MailStore};
use dispomail::{Database, EventBus, MailEvent, SmtpServer};

struct SmtpClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl SmtpClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(reader),
            writer,
        };
        client.expect(220).await;
        client
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
    }

    /// Read one (possibly multi-line) reply and check its code.
    async fn expect(&mut self, code: u16) {
        let prefix = code.to_string();
        loop {
            let mut line = String::new();
            self.reader.read_line(&mut line).await.unwrap();
            assert!(line.starts_with(&prefix), "expected {code}, got {line:?}");
            if line.as_bytes().get(3) != Some(&b'-') {
                return;
            }
        }
    }

    async fn command(&mut self, line: &str, code: u16) {
        self.send(line).await;
        self.expect(code).await;
    }
}

async fn start_server(db: &Database, events: EventBus) -> SocketAddr {
    let config = SmtpConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    };
    let server = SmtpServer::bind(&config).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run(MailIntake::new(db.store(), events)));
    addr
}

#[tokio::test]
async fn test_delivery_to_header_and_envelope_recipients() {
    let dir = TempDir::new().unwrap();
    let db = Database::open_sqlite(dir.path().join("mail.db")).await.unwrap();
    let store = db.store();
    store.add_address("first").await.unwrap();
    store.add_address("second").await.unwrap();

    let events = EventBus::new();
    let mut rx = events.subscribe_channel();
    let addr = start_server(&db, events).await;

    let mut client = SmtpClient::connect(addr).await;
    client.command("EHLO client.test", 250).await;
    client.command("MAIL FROM:<sender@example.org>", 250).await;
    client.command("RCPT TO:<first@mail.test>", 250).await;
    client.command("RCPT TO:<second@mail.test>", 250).await;
    client.command("RCPT TO:<unknown@mail.test>", 250).await;
    client.command("DATA", 354).await;
    client.send("From: Sender <sender@example.org>").await;
    client.send("To: First <first@mail.test>").await;
    client.send("Subject: greetings").await;
    client.send("").await;
    client.send("hello there").await;
    client.command(".", 250).await;
    client.command("QUIT", 221).await;

    for addr in ["first", "second"] {
        let page = store
            .get_mails(&MailQuery::inbox().for_recipient(addr))
            .await
            .unwrap();
        assert_eq!(page.mails.len(), 1, "mails for {addr}");
        assert_eq!(page.mails[0].subject, "greetings");
        assert_eq!(page.mails[0].sender, "sender@example.org");
        assert_eq!(page.mails[0].sender_name.as_deref(), Some("Sender"));
    }

    let mut received = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
    received.sort_by_key(|e| e.to_string());
    assert_eq!(
        received,
        vec![
            MailEvent::Received("first".into()),
            MailEvent::Received("second".into())
        ]
    );
}

#[tokio::test]
async fn test_two_messages_in_one_session() {
    let dir = TempDir::new().unwrap();
    let db = Database::open_sqlite(dir.path().join("mail.db")).await.unwrap();
    let store = db.store();
    store.add_address("box").await.unwrap();
    let addr = start_server(&db, EventBus::new()).await;

    let mut client = SmtpClient::connect(addr).await;
    client.command("HELO client.test", 250).await;
    for subject in ["one", "two"] {
        client.command("MAIL FROM:<sender@example.org>", 250).await;
        client.command("RCPT TO:<box@mail.test>", 250).await;
        client.command("DATA", 354).await;
        client.send(&format!("Subject: {subject}")).await;
        client.send("").await;
        client.send("body").await;
        client.command(".", 250).await;
    }
    client.command("QUIT", 221).await;

    let subjects: Vec<_> = store
        .get_all_mails(None)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.subject)
        .collect();
    assert_eq!(subjects, vec!["two".to_string(), "one".to_string()]);
}

#[tokio::test]
async fn test_mail_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mail.db");

    {
        let db = Database::open_sqlite(&path).await.unwrap();
        db.store().add_address("box").await.unwrap();
        let addr = start_server(&db, EventBus::new()).await;

        let mut client = SmtpClient::connect(addr).await;
        client.command("HELO client.test", 250).await;
        client.command("MAIL FROM:<>", 250).await;
        client.command("RCPT TO:<box@mail.test>", 250).await;
        client.command("DATA", 354).await;
        client.send("Subject: kept").await;
        client.send("").await;
        client.send("body").await;
        client.command(".", 250).await;
        client.command("QUIT", 221).await;
    }

    let db = Database::open_sqlite(&path).await.unwrap();
    let mails = db.store().get_all_mails(None).await.unwrap();
    assert_eq!(mails.len(), 1);
    assert_eq!(mails[0].subject, "kept");
}
