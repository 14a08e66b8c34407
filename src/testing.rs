//! Helpers shared by socket-level tests

use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

/// Poll `cond` until it holds, panicking after five seconds
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Read exactly `len` bytes, panicking after five seconds
pub async fn read_exact(socket: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(Duration::from_secs(5), socket.read_exact(&mut buf))
        .await
        .expect("data arrived in time")
        .expect("socket readable");
    buf
}

/// Drain `socket` until the peer closes it; returns the number of bytes drained
pub async fn read_until_closed(socket: &mut TcpStream) -> usize {
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0;
    loop {
        let read = tokio::time::timeout(Duration::from_secs(5), socket.read(&mut buf))
            .await
            .expect("peer closed in time");
        match read {
            Ok(0) | Err(_) => return total,
            Ok(n) => total += n,
        }
    }
}

/// Assert that nothing arrives on `socket` for `wait`
pub async fn assert_silent(socket: &mut TcpStream, wait: Duration) {
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(wait, socket.read(&mut buf)).await;
    assert!(read.is_err(), "unexpected data or close: {:?}", read);
}
