//{
fn main() -> jsoncomm::Result<()> {
    //}
    use {jsoncomm::Socket, serde_json::json};

    // Two sockets which already know about each other. A server bound to a
    // path works the same way, except that it replies to the sender of each
    // request explicitly with send_to.
    let (ping, pong) = Socket::new_pair()?;

    ping.send(&json!({"op": "ping", "seq": 1}), &[])?;

    let request = pong.recv()?;
    assert_eq!(request.payload["op"], "ping");
    pong.send(&json!({"op": "pong", "seq": request.payload["seq"]}), &[])?;

    let reply = ping.recv()?;
    println!("Peer answered: {}", reply.payload);
    //{
    Ok(())
} //}
