//! Loopback remctl server for integration tests.

#![allow(dead_code)]

use remctl::testing::{serve_handshake, serve_read_token, serve_write_token, IdentityProvider};
use remctl::{Config, ErrorCode, Stream, Token};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const PRINCIPAL: &str = "host/test.example.org";

type Handler = dyn Fn(&[Vec<u8>]) -> Vec<Token> + Send + Sync;

struct Inner {
    handler: Box<Handler>,
    provider: IdentityProvider,
    /// Answer NOOP with VERSION, like a protocol v2 server
    v2: bool,
    connections: AtomicUsize,
    commands: AtomicUsize,
}

pub struct TestServer {
    port: u16,
    inner: Arc<Inner>,
}

impl TestServer {
    /// Server running [`standard`] commands.
    pub fn start() -> Self {
        Self::with_handler(standard, false)
    }

    /// Server that only speaks protocol v2.
    pub fn start_v2() -> Self {
        Self::with_handler(standard, true)
    }

    pub fn with_handler<F>(handler: F, v2: bool) -> Self
    where
        F: Fn(&[Vec<u8>]) -> Vec<Token> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let inner = Arc::new(Inner {
            handler: Box::new(handler),
            provider: IdentityProvider::new(),
            v2,
            connections: AtomicUsize::new(0),
            commands: AtomicUsize::new(0),
        });

        let accept = Arc::clone(&inner);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                accept.connections.fetch_add(1, Ordering::SeqCst);
                let conn = Arc::clone(&accept);
                thread::spawn(move || {
                    serve(stream, &conn).ok();
                });
            }
        });

        Self { port, inner }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn config(&self) -> Config {
        Config::new("127.0.0.1")
            .with_port(self.port)
            .with_service_principal(PRINCIPAL)
            .with_timeout(Duration::from_secs(5))
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.inner.connections.load(Ordering::SeqCst)
    }

    /// COMMAND tokens received so far, across all connections.
    pub fn commands(&self) -> usize {
        self.inner.commands.load(Ordering::SeqCst)
    }
}

fn serve(mut stream: TcpStream, inner: &Inner) -> remctl::Result<()> {
    serve_handshake(&mut stream, &inner.provider)?;
    while let Some(token) = serve_read_token(&mut stream)? {
        match token {
            Token::Command { keepalive, args } => {
                inner.commands.fetch_add(1, Ordering::SeqCst);
                for reply in (inner.handler)(&args) {
                    serve_write_token(&mut stream, &reply)?;
                }
                if !keepalive {
                    break;
                }
            }
            Token::Noop => {
                let reply = if inner.v2 {
                    Token::Version { highest: 2 }
                } else {
                    Token::Noop
                };
                serve_write_token(&mut stream, &reply)?;
            }
            Token::Quit => break,
            other => {
                let message = format!("unexpected {} token", other.name());
                serve_write_token(&mut stream, &Token::error(ErrorCode::UnexpectedMessage, message))?;
                break;
            }
        }
    }
    Ok(())
}

fn out(data: &str) -> Token {
    Token::output(Stream::Stdout, data.as_bytes())
}

fn err(data: &str) -> Token {
    Token::output(Stream::Stderr, data.as_bytes())
}

fn ok() -> Token {
    Token::Status { exit: 0 }
}

/// Commands understood by the test server.
pub fn standard(args: &[Vec<u8>]) -> Vec<Token> {
    let words: Vec<String> = args
        .iter()
        .map(|a| String::from_utf8_lossy(a).into_owned())
        .collect();
    match words[0].as_str() {
        "echo" => vec![out(&format!("{}\n", words[1..].join(" "))), ok()],
        "mixed" => vec![out("out1\n"), err("err1\n"), out("out2\n"), ok()],
        "fail" => {
            let exit = words.get(1).and_then(|w| w.parse().ok()).unwrap_or(1);
            vec![Token::Status { exit }]
        }
        "denied" => vec![Token::error(ErrorCode::Access, "Access denied")],
        "noop" => vec![ok()],
        "bytes" => vec![Token::output(Stream::Stdout, args[1].clone()), ok()],
        // Stray output after the status
        "extra" => vec![out("done\n"), ok(), out("stale\n")],
        "version" => vec![out("partial"), Token::Version { highest: 2 }],
        // Never answers
        "silent" => vec![],
        _ => vec![Token::error(ErrorCode::UnknownCommand, "Unknown command")],
    }
}
