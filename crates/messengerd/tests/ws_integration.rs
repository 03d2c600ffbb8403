//! End-to-end tests over a real TCP listener: WebSocket negotiation, the
//! plain-HTTP fallback, and the full register/login/chat/logout protocol.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use libmessenger::{ChatStore, Registry};
use messengerd::config::ServerConfig;
use messengerd::server::{self, AppState};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Bind port 0 and run the server in-process. Returns the address and a
/// handle to the (in-memory) store for persistence assertions.
async fn start_server() -> Result<(String, ChatStore)> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("failed to bind test listener")?;
    let addr = listener.local_addr()?;
    let store = ChatStore::open(None)?;
    let config = ServerConfig::default();
    let state = Arc::new(AppState::new(
        Arc::new(Registry::new()),
        store.clone(),
        &config,
    ));
    tokio::spawn(async move {
        let _ = server::serve(listener, state).await;
    });
    Ok((addr.to_string(), store))
}

async fn connect(addr: &str) -> Result<WsClient> {
    let (ws, _) = connect_async(format!("ws://{addr}/"))
        .await
        .context("websocket handshake failed")?;
    Ok(ws)
}

async fn send(ws: &mut WsClient, line: &str) -> Result<()> {
    ws.send(Message::text(line)).await?;
    Ok(())
}

async fn recv_text(ws: &mut WsClient) -> Result<String> {
    loop {
        let msg = timeout(READ_TIMEOUT, ws.next())
            .await
            .context("timed out waiting for frame")?
            .context("connection closed")??;
        match msg {
            Message::Text(text) => return Ok(text.as_str().to_string()),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => bail!("unexpected frame: {other:?}"),
        }
    }
}

/// Wait until the server closes the connection.
async fn expect_close(ws: &mut WsClient) -> Result<()> {
    loop {
        match timeout(READ_TIMEOUT, ws.next())
            .await
            .context("timed out waiting for close")?
        {
            None => return Ok(()),
            Some(Ok(Message::Close(_))) => return Ok(()),
            Some(Ok(_)) => continue,
            Some(Err(_)) => return Ok(()),
        }
    }
}

#[tokio::test]
async fn plain_http_request_gets_404_with_server_header() -> Result<()> {
    let (addr, _store) = start_server().await?;

    let mut stream = TcpStream::connect(&addr).await?;
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n")
        .await?;

    let mut raw = Vec::new();
    timeout(READ_TIMEOUT, stream.read_to_end(&mut raw)).await??;
    let response = String::from_utf8_lossy(&raw).to_lowercase();

    assert!(response.starts_with("http/1.1 404"), "got: {response}");
    assert!(response.contains("server: messengerd/"), "got: {response}");
    Ok(())
}

#[tokio::test]
async fn chat_before_login_is_rejected() -> Result<()> {
    let (addr, _store) = start_server().await?;
    let mut ws = connect(&addr).await?;

    send(&mut ws, "hello?").await?;
    assert_eq!(recv_text(&mut ws).await?, "System: Please login first");

    // The session keeps reading after the rejection.
    send(&mut ws, "still here").await?;
    assert_eq!(recv_text(&mut ws).await?, "System: Please login first");
    Ok(())
}

#[tokio::test]
async fn malformed_register_gets_inline_reply() -> Result<()> {
    let (addr, _store) = start_server().await?;
    let mut ws = connect(&addr).await?;

    send(&mut ws, "register:onlylogin").await?;
    assert_eq!(
        recv_text(&mut ws).await?,
        "System: Invalid registration format"
    );
    Ok(())
}

#[tokio::test]
async fn two_sessions_broadcast_and_persist() -> Result<()> {
    let (addr, store) = start_server().await?;

    let mut a = connect(&addr).await?;
    send(&mut a, "register:a:p").await?;
    assert_eq!(recv_text(&mut a).await?, "System: Registration successful");
    send(&mut a, "login:a:p").await?;
    assert_eq!(recv_text(&mut a).await?, "System: Login successful");
    assert_eq!(recv_text(&mut a).await?, "System: a joined the chat");

    let mut b = connect(&addr).await?;
    send(&mut b, "register:b:p").await?;
    assert_eq!(recv_text(&mut b).await?, "System: Registration successful");
    send(&mut b, "login:b:p").await?;
    assert_eq!(recv_text(&mut b).await?, "System: Login successful");
    assert_eq!(recv_text(&mut b).await?, "System: b joined the chat");
    // The existing member sees the join too.
    assert_eq!(recv_text(&mut a).await?, "System: b joined the chat");

    // Unshaped line: fanned out to both, never persisted.
    send(&mut a, "hello everyone").await?;
    assert_eq!(recv_text(&mut a).await?, "hello everyone");
    assert_eq!(recv_text(&mut b).await?, "hello everyone");
    assert!(store.recent_messages(10).await?.is_empty());

    // Shaped line: fanned out and persisted.
    send(&mut a, "a: hi b").await?;
    assert_eq!(recv_text(&mut a).await?, "a: hi b");
    assert_eq!(recv_text(&mut b).await?, "a: hi b");
    let messages = store.recent_messages(10).await?;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].user, "a");
    assert_eq!(messages[0].content, "hi b");
    Ok(())
}

#[tokio::test]
async fn duplicate_login_name_registration_conflicts() -> Result<()> {
    let (addr, _store) = start_server().await?;
    let mut ws = connect(&addr).await?;

    send(&mut ws, "register:alice:first").await?;
    assert_eq!(recv_text(&mut ws).await?, "System: Registration successful");
    send(&mut ws, "register:alice:second").await?;
    assert_eq!(
        recv_text(&mut ws).await?,
        "System: Registration failed - login already exists"
    );
    Ok(())
}

#[tokio::test]
async fn logout_flow_closes_connection_and_stops_broadcasts() -> Result<()> {
    let (addr, _store) = start_server().await?;

    let mut alice = connect(&addr).await?;
    send(&mut alice, "register:alice:pw").await?;
    recv_text(&mut alice).await?;
    send(&mut alice, "login:alice:pw").await?;
    assert_eq!(recv_text(&mut alice).await?, "System: Login successful");
    assert_eq!(recv_text(&mut alice).await?, "System: alice joined the chat");

    let mut bob = connect(&addr).await?;
    send(&mut bob, "register:bob:pw").await?;
    recv_text(&mut bob).await?;
    send(&mut bob, "login:bob:pw").await?;
    recv_text(&mut bob).await?;
    recv_text(&mut bob).await?;
    recv_text(&mut alice).await?; // bob's join notice

    // Logging out someone else's login is rejected and changes nothing.
    send(&mut alice, "logout:bob").await?;
    assert_eq!(
        recv_text(&mut alice).await?,
        "System: Logout failed - invalid user"
    );

    send(&mut alice, "logout:alice").await?;
    assert_eq!(recv_text(&mut alice).await?, "System: alice left the chat");
    assert_eq!(recv_text(&mut alice).await?, "System: Logout successful");
    expect_close(&mut alice).await?;

    // Bob saw the departure and still receives traffic; Alice is gone.
    assert_eq!(recv_text(&mut bob).await?, "System: alice left the chat");
    send(&mut bob, "anyone here?").await?;
    assert_eq!(recv_text(&mut bob).await?, "anyone here?");
    Ok(())
}
