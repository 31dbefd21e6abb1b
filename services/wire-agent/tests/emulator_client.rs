//! Integration test for the emulator control client over TCP.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use wirelab_wire_agent::emulator::{ControlProtocolError, EmulatorClient, EmulatorControl};

#[tokio::test]
async fn test_client_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        let mut seen = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            let reply = if line.starts_with("vm start") {
                "206 VM 'r1' is already running\r\n"
            } else {
                "100-ok\r\n100 OK\r\n"
            };
            write.write_all(reply.as_bytes()).await.unwrap();
            seen.push(line);
        }
        seen
    });

    let client = EmulatorClient::connect("127.0.0.1", port, Duration::from_secs(2))
        .await
        .unwrap();
    client.create_device("r1", 1, "c7200").await.unwrap();
    let err = client.start_device("r1").await.unwrap_err();
    assert!(matches!(err, ControlProtocolError::Rejected { code: 206, .. }));
    client.delete_device("r1").await.unwrap();
    drop(client);

    assert_eq!(
        server.await.unwrap(),
        vec!["vm create r1 1 c7200", "vm start r1", "vm delete r1"]
    );
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = EmulatorClient::connect("127.0.0.1", port, Duration::from_secs(2))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ControlProtocolError::Io(_)), "got: {err}");
}
