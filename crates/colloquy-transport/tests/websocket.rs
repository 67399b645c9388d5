//! Integration tests for the WebSocket transport.
//!
//! These spin up a real listener and a real client to verify that frames
//! flow in both directions and that a blocked reader does not stall sends.

#[cfg(feature = "websocket")]
mod websocket {
    use std::sync::Arc;
    use std::time::Duration;

    use colloquy_transport::{
        Connection, Incoming, Transport, WebSocketConnection, WebSocketTransport,
    };
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    type ClientWs = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn accept_one(transport: &mut WebSocketTransport) -> WebSocketConnection {
        let incoming = transport.accept().await.expect("should accept");
        incoming.upgrade().await.expect("should upgrade")
    }

    async fn connect_client(addr: &str) -> ClientWs {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .expect("client should connect");
        ws
    }

    #[tokio::test]
    async fn test_websocket_accept_and_send_receive() {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("bound address").to_string();

        let server_handle =
            tokio::spawn(async move { accept_one(&mut transport).await });

        let mut client_ws = connect_client(&addr).await;
        let server_conn = server_handle.await.expect("task should complete");
        assert!(server_conn.id().into_inner() > 0);

        server_conn
            .send(br#"{"type":"heartbeat_ack"}"#)
            .await
            .expect("send should succeed");
        let msg = client_ws.next().await.unwrap().unwrap();
        assert!(msg.is_text(), "valid UTF-8 goes out as a text frame");
        assert_eq!(msg.into_data().as_ref(), br#"{"type":"heartbeat_ack"}"#);

        client_ws
            .send(Message::Text(r#"{"type":"heartbeat"}"#.into()))
            .await
            .unwrap();
        let received = server_conn
            .recv()
            .await
            .expect("recv should succeed")
            .expect("should have data");
        assert_eq!(received, br#"{"type":"heartbeat"}"#);

        server_conn.close().await.expect("close should succeed");
    }

    #[tokio::test]
    async fn test_websocket_recv_returns_none_on_client_close() {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().unwrap().to_string();

        let server_handle =
            tokio::spawn(async move { accept_one(&mut transport).await });
        let mut client_ws = connect_client(&addr).await;
        let server_conn = server_handle.await.unwrap();

        client_ws.send(Message::Close(None)).await.unwrap();

        let result = server_conn.recv().await.expect("recv should not error");
        assert!(result.is_none(), "should return None on client close");
    }

    #[tokio::test]
    async fn test_websocket_send_while_reader_is_parked() {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().unwrap().to_string();

        let server_handle =
            tokio::spawn(async move { accept_one(&mut transport).await });
        let mut client_ws = connect_client(&addr).await;
        let server_conn = Arc::new(server_handle.await.unwrap());

        // Park a reader on the connection; the client never sends anything.
        let reader = Arc::clone(&server_conn);
        let parked = tokio::spawn(async move { reader.recv().await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        tokio::time::timeout(Duration::from_secs(1), server_conn.send(b"live"))
            .await
            .expect("send must not wait for the reader")
            .expect("send should succeed");

        let msg = client_ws.next().await.unwrap().unwrap();
        assert_eq!(msg.into_data().as_ref(), b"live");
        parked.abort();
    }

    #[tokio::test]
    async fn test_websocket_accept_does_not_wait_for_handshake() {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().unwrap().to_string();

        // A peer that connects but never sends the upgrade request.
        let _silent = tokio::net::TcpStream::connect(&addr).await.unwrap();
        let stalled = tokio::time::timeout(Duration::from_secs(1), transport.accept())
            .await
            .expect("accept must not wait on the peer")
            .expect("should accept");
        let pending = tokio::spawn(stalled.upgrade());

        let server_handle = tokio::spawn(async move { accept_one(&mut transport).await });
        let _client_ws = tokio::time::timeout(Duration::from_secs(2), connect_client(&addr))
            .await
            .expect("second client must not queue behind the silent one");
        let server_conn = server_handle.await.unwrap();
        assert!(server_conn.id().into_inner() > 0);
        assert!(!pending.is_finished());
        pending.abort();
    }
}
