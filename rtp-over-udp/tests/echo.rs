//! End-to-end tests of the upper-casing echo service over loopback UDP.

use std::time::Duration;

use rtp_over_udp::{
    client, server,
    socket::Socket,
    timer::TimerConfig,
    Config, StreamReceiver, StreamSender,
};

async fn loopback() -> Socket {
    Socket::bind("127.0.0.1:0".parse().unwrap())
        .await
        .expect("bind loopback socket")
}

fn config(window: u32) -> Config {
    Config {
        timers: TimerConfig {
            poll_interval: Duration::from_millis(50),
            close_deadline: Duration::from_millis(500),
            ..TimerConfig::default()
        },
        ..Config::with_window(window)
    }
}

#[tokio::test]
async fn client_gets_uppercased_reply() {
    let listener_sock = loopback().await;
    let server_addr = listener_sock.local_addr;
    let mut listener = StreamReceiver::from_socket(listener_sock, config(4)).unwrap();

    let server_task = tokio::spawn(async move {
        server::serve_one(&mut listener, loopback().await, &config(4)).await
    });

    let message = "the quick brown fox ".repeat(200);
    let reply = tokio::time::timeout(
        Duration::from_secs(10),
        client::exchange(loopback().await, server_addr, message.as_bytes(), &config(4)),
    )
    .await
    .expect("exchange timed out")
    .expect("exchange failed");

    assert_eq!(reply, message.to_ascii_uppercase().as_bytes());
    server_task.await.unwrap().expect("server failed");
}

#[tokio::test]
async fn large_stream_over_loopback() {
    let rx_sock = loopback().await;
    let rx_addr = rx_sock.local_addr;
    let mut rx = StreamReceiver::from_socket(rx_sock, config(16)).unwrap();
    let receiver = tokio::spawn(async move { rx.recv().await });

    let data: Vec<u8> = (0..200_000u32).map(|i| (i % 253) as u8).collect();
    let mut tx = StreamSender::from_socket(loopback().await, config(16)).unwrap();
    tx.connect(rx_addr).await.unwrap();
    tx.send(&data).await.unwrap();
    tx.close().await.unwrap();

    let (got, _) = tokio::time::timeout(Duration::from_secs(10), receiver)
        .await
        .expect("receiver timed out")
        .unwrap()
        .unwrap();
    assert_eq!(got.len(), data.len());
    assert_eq!(got, data);
}
