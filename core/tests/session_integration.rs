/*
 * session_integration.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * Integration tests for the connection engine. Each test assembles a
 * real context over the in-process source and cache, binds real
 * listeners on loopback, and scripts a raw client against them:
 * greeting, authentication, mailbox enumeration, and the violation
 * cutoff.
 *
 * Run with:
 *   cargo test -p magma_core --test session_integration -- --nocapture
 */

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;

use magma_core::cache::MemoryCache;
use magma_core::meta::{MetaFolder, MetaMessage, UserDetail};
use magma_core::server::resolver::ReverseResolver;
use magma_core::server::{self, Magma};
use magma_core::stacie;
use magma_core::storage::{FolderKind, MemorySource, UserRecord};
use magma_core::Config;

struct NullResolver;

#[async_trait::async_trait]
impl ReverseResolver for NullResolver {
    async fn resolve(&self, _ip: std::net::IpAddr) -> Option<String> {
        None
    }
}

/// Reserve a free loopback port. The listener is dropped before the
/// server binds; the window is small enough for a test.
fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

const PASSWORD: &str = "CorrectHorseBattery1!Staple";

fn seeded_source() -> Arc<MemorySource> {
    let salt = vec![7u8; stacie::SALT_LENGTH];
    let rounds = stacie::derive_rounds(PASSWORD, 0);
    let seed = stacie::derive_seed(PASSWORD, &salt).unwrap();
    let key = stacie::derive_key(&seed, rounds, "magma", PASSWORD, &salt).unwrap();
    let verification = stacie::derive_token(&key, "magma", &salt, None).unwrap();

    let source = Arc::new(MemorySource::new());
    source.seed_user(
        UserRecord {
            usernum: 42,
            username: "magma".into(),
            salt,
            verification: verification.to_vec(),
            bonus: 0,
        },
        UserDetail { verification: verification.to_vec(), ..Default::default() },
    );
    source.seed_folder(
        42,
        FolderKind::Mail,
        MetaFolder { foldernum: 1, parent: 0, order: 0, name: "Inbox".into() },
    );
    // Five messages; number three came from IMAP APPEND.
    for (n, size, status) in [
        (1u64, 100u64, 0u32),
        (2, 200, 0),
        (3, 300, 1 << 6),
        (4, 400, 0),
        (5, 500, 0),
    ] {
        source.seed_message(
            42,
            MetaMessage {
                messagenum: n,
                foldernum: 1,
                server: "local".into(),
                status,
                size,
                signature_num: 0,
                signature_key: 0,
                created: 0,
                tags: Vec::new(),
            },
        );
    }
    source
}

async fn start_server(port: u16, protocol: &str, cutoff: u32) -> Arc<Magma> {
    let config = Config::parse(&format!(
        "server.test.protocol = {}\n\
         server.test.address = 127.0.0.1\n\
         server.test.port = {}\n\
         server.test.timeout = 5\n\
         server.test.violations.cutoff = {}\n\
         server.test.violations.delay = 1\n",
        protocol, port, cutoff,
    ))
    .unwrap();

    let ctx = Arc::new(
        Magma::assemble_with_resolver(
            config,
            seeded_source(),
            Arc::new(MemoryCache::new()),
            Arc::new(NullResolver),
        )
        .unwrap(),
    );
    server::serve(ctx.clone()).await.unwrap();
    // Give the accept loop a beat to start.
    tokio::time::sleep(Duration::from_millis(50)).await;
    ctx
}

async fn read_reply(reader: &mut BufReader<OwnedReadHalf>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    line.trim_end().to_string()
}

#[tokio::test]
async fn pop3_enumeration_excludes_appended() {
    let port = free_port();
    let _ctx = start_server(port, "pop", 10).await;

    let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let greeting = read_reply(&mut reader).await;
    assert!(greeting.starts_with("+OK"), "greeting: {}", greeting);

    write_half.write_all(b"USER magma\r\n").await.unwrap();
    assert!(read_reply(&mut reader).await.starts_with("+OK"));

    write_half
        .write_all(format!("PASS {}\r\n", PASSWORD).as_bytes())
        .await
        .unwrap();
    let banner = read_reply(&mut reader).await;
    assert!(banner.starts_with("+OK"), "login: {}", banner);

    // STAT: four visible messages, sizes of 1, 2, 4, 5.
    write_half.write_all(b"STAT\r\n").await.unwrap();
    assert_eq!(read_reply(&mut reader).await, "+OK 4 1200");

    // LIST: dense renumbering 1..4 over message ids {1, 2, 4, 5}.
    write_half.write_all(b"LIST\r\n").await.unwrap();
    assert!(read_reply(&mut reader).await.starts_with("+OK 4"));
    assert_eq!(read_reply(&mut reader).await, "1 100");
    assert_eq!(read_reply(&mut reader).await, "2 200");
    assert_eq!(read_reply(&mut reader).await, "3 400");
    assert_eq!(read_reply(&mut reader).await, "4 500");
    assert_eq!(read_reply(&mut reader).await, ".");

    // UIDL exposes the underlying message ids.
    write_half.write_all(b"UIDL 3\r\n").await.unwrap();
    assert_eq!(read_reply(&mut reader).await, "+OK 3 4");

    write_half.write_all(b"QUIT\r\n").await.unwrap();
    assert!(read_reply(&mut reader).await.starts_with("+OK"));
}

#[tokio::test]
async fn pop3_violation_cutoff_closes_the_connection() {
    let port = free_port();
    let _ctx = start_server(port, "pop", 3).await;

    let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    assert!(read_reply(&mut reader).await.starts_with("+OK"));

    // Three violations draw errors; the fourth crosses the cutoff and
    // the server initiates the close.
    for _ in 0..3 {
        write_half.write_all(b"XYZZY\r\n").await.unwrap();
        assert_eq!(read_reply(&mut reader).await, "-ERR invalid command");
    }
    write_half.write_all(b"XYZZY\r\n").await.unwrap();
    assert_eq!(
        read_reply(&mut reader).await,
        "-ERR protocol violation limit reached"
    );

    // The next read hits end of stream.
    let mut line = String::new();
    let n = reader.read_line(&mut line).await.unwrap();
    assert_eq!(n, 0, "expected a server-side close, got {:?}", line);
}

#[tokio::test]
async fn imap_fetch_resolves_sequences_and_rejects_zero() {
    let port = free_port();
    let _ctx = start_server(port, "imap", 10).await;

    let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    assert!(read_reply(&mut reader).await.starts_with("* OK"));

    write_half
        .write_all(format!("a1 LOGIN magma {}\r\n", PASSWORD).as_bytes())
        .await
        .unwrap();
    assert_eq!(read_reply(&mut reader).await, "a1 OK LOGIN completed");

    write_half.write_all(b"a2 SELECT Inbox\r\n").await.unwrap();
    assert_eq!(read_reply(&mut reader).await, "* 5 EXISTS");
    assert_eq!(read_reply(&mut reader).await, "* 0 RECENT");
    assert!(read_reply(&mut reader).await.starts_with("* OK [UIDVALIDITY"));
    assert_eq!(read_reply(&mut reader).await, "a2 OK [READ-WRITE] SELECT completed");

    // Sequence numbers are 1-based; zero draws the no-such-message NO
    // rather than wrapping.
    write_half.write_all(b"a3 FETCH 0 FLAGS\r\n").await.unwrap();
    assert_eq!(read_reply(&mut reader).await, "a3 NO no such message");

    write_half.write_all(b"a4 FETCH 1 FLAGS\r\n").await.unwrap();
    assert_eq!(read_reply(&mut reader).await, "* 1 FETCH (FLAGS ())");
    assert_eq!(read_reply(&mut reader).await, "a4 OK FETCH completed");

    write_half.write_all(b"a5 FETCH 6 FLAGS\r\n").await.unwrap();
    assert_eq!(read_reply(&mut reader).await, "a5 NO no such message");

    write_half.write_all(b"a6 LOGOUT\r\n").await.unwrap();
    assert_eq!(read_reply(&mut reader).await, "* BYE logging out");
    assert_eq!(read_reply(&mut reader).await, "a6 OK LOGOUT completed");
}

#[tokio::test]
async fn molten_serves_statistics() {
    let port = free_port();
    let ctx = start_server(port, "molten", 10).await;

    let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    assert_eq!(read_reply(&mut reader).await, "MOLTEN ready");

    write_half.write_all(b"STATS\r\n").await.unwrap();
    let mut saw_molten_counter = false;
    loop {
        let line = read_reply(&mut reader).await;
        if line == "END" {
            break;
        }
        if line.starts_with("molten.connections.total") {
            saw_molten_counter = true;
        }
    }
    assert!(saw_molten_counter);

    write_half.write_all(b"QUIT\r\n").await.unwrap();
    assert_eq!(read_reply(&mut reader).await, "GOODBYE");

    // Draining flips the status; fresh connections are refused after
    // the greeting and the accept loops wind down.
    ctx.status.set(-1);
}

#[tokio::test]
async fn drained_server_refuses_new_commands() {
    let port = free_port();
    let ctx = start_server(port, "pop", 10).await;

    let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    assert!(read_reply(&mut reader).await.starts_with("+OK"));

    // The command in flight still completes; the next turn is refused.
    ctx.status.set(-1);
    write_half.write_all(b"NOOP\r\n").await.unwrap();
    assert_eq!(read_reply(&mut reader).await, "+OK");
    assert_eq!(read_reply(&mut reader).await, "-ERR service shutting down");

    let mut line = String::new();
    let n = reader.read_line(&mut line).await.unwrap();
    assert_eq!(n, 0);
}
