//{
fn main() -> Result<(), Box<dyn std::error::Error>> {
    //}
    use {
        jsoncomm::Socket,
        serde_json::json,
        std::{
            fs::File,
            io::{prelude::*, SeekFrom},
            os::fd::AsFd,
        },
    };

    let (sender, receiver) = Socket::new_pair()?;

    let mut file = tempfile::tempfile()?;
    file.write_all(b"shared through the socket")?;
    // The receiver gets its own descriptor for the same open file, which is
    // why the sender can close its copy right after sending.
    sender.send(&json!({"file": 0}), &[file.as_fd()])?;
    drop(file);

    let mut message = receiver.recv()?;
    let index = message.payload["file"].as_u64().ok_or("no index")? as usize;
    // Stealing takes the descriptor out of the set, which would otherwise
    // close it when dropped.
    let mut file = File::from(message.fds.steal(index)?);

    let mut contents = String::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_string(&mut contents)?;
    println!("Received file contents: {contents}");
    //{
    Ok(())
} //}
