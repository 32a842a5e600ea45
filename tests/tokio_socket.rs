use crate::util::*;
use color_eyre::eyre::ensure;
use jsoncomm::{tokio::Socket as AsyncSocket, Socket};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{fs::File, os::fd::AsFd, time::Duration};
use tokio::{task, time::timeout};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Request {
    op: String,
    seq: u32,
}

#[tokio::test]
async fn echo_server() -> TestResult {
    let fx = Fixture::new()?;
    let Fixture { server, path, dir: _dir } = fx;
    let server = AsyncSocket::new(server)?;
    ensure!(server.get_ref().is_nonblocking()?, "registration must switch to nonblocking mode");

    let client = AsyncSocket::new(Socket::new_client(path.as_path())?)?;
    let serve = task::spawn(async move {
        for _ in 0..3 {
            let msg = server.recv().await?;
            let fds: Vec<_> = (0..msg.fds.len())
                .map(|i| msg.fds.borrow(i))
                .collect::<Result<_, _>>()?;
            server.send_to(&msg.payload, &msg.sender, &fds).await?;
        }
        Ok::<_, jsoncomm::Error>(server.into_inner())
    });

    let file = file_with("async")?;
    for seq in 0..3 {
        let request = Request { op: "echo".to_owned(), seq };
        client.send(&request, &[file.as_fd()]).await?;
        let mut reply = timeout(Duration::from_secs(5), client.recv_as::<Request>()).await??;
        ensure_eq!(reply.payload, request);
        ensure_eq!(read_all(&mut File::from(reply.fds.steal(0)?))?, "async");
    }

    let server = serve.await??;
    ensure!(!server.is_closed(), "unregistering must not close the socket");
    Ok(())
}

#[tokio::test]
async fn waits_for_readiness() -> TestResult {
    testinit();
    let (a, b) = Socket::new_pair()?;
    let b = AsyncSocket::new(b)?;
    let pending = timeout(Duration::from_millis(50), b.recv()).await;
    ensure!(pending.is_err(), "recv completed without a message");

    a.send(&json!({"late": true}), &[])?;
    let msg = timeout(Duration::from_secs(5), b.recv()).await??;
    ensure_eq!(msg.payload, json!({"late": true}));
    Ok(())
}
