//! Newline-delimited JSON over TCP.
//!
//! One reader and one writer thread per observer. The reader decodes client
//! messages and hands them to the server; the writer drains the observer's
//! outbox onto the socket. Either side ending closes the connection.

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use arena_server::ArenaServer;
use arena_stream::{ClientMessage, Connection};

/// Accept observers on `listener` until the process exits.
pub fn spawn_acceptor(listener: TcpListener, server: Arc<ArenaServer>) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    thread::Builder::new()
        .name("arena-accept".into())
        .spawn(move || {
            tracing::info!(%addr, "accepting observers");
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        if let Err(err) = serve_observer(stream, Arc::clone(&server)) {
                            tracing::warn!(%err, "could not start observer");
                        }
                    }
                    Err(err) => tracing::warn!(%err, "accept failed"),
                }
            }
        })
        .context("spawning accept thread")?;
    Ok(())
}

fn serve_observer(stream: TcpStream, server: Arc<ArenaServer>) -> anyhow::Result<()> {
    let peer = stream.peer_addr()?;
    stream.set_nodelay(true)?;
    let write_half = stream.try_clone()?;

    let conn = server.connect();
    let id = conn.id;
    tracing::info!(%id, %peer, "observer connected");

    thread::Builder::new()
        .name(format!("arena-tx-{id}"))
        .spawn(move || write_loop(write_half, conn))
        .context("spawning writer thread")?;

    thread::Builder::new()
        .name(format!("arena-rx-{id}"))
        .spawn(move || {
            let reader = BufReader::new(&stream);
            for line in reader.lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        tracing::debug!(%id, %err, "read failed");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match ClientMessage::decode(&line) {
                    Ok(msg) => server.handle_message(id, msg),
                    Err(err) => tracing::debug!(%id, %err, "dropping malformed message"),
                }
            }
            server.disconnect(id);
            let _ = stream.shutdown(Shutdown::Both);
            tracing::info!(%id, %peer, "observer disconnected");
        })
        .context("spawning reader thread")?;
    Ok(())
}

/// Runs until the registry drops the observer or the socket fails.
fn write_loop(stream: TcpStream, conn: Connection) {
    let id = conn.id;
    let mut out = BufWriter::new(&stream);
    for msg in conn.outbox.iter() {
        let line = match msg.encode() {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(%id, %err, kind = msg.kind(), "could not encode message");
                continue;
            }
        };
        let sent = writeln!(out, "{line}").and_then(|()| {
            if conn.outbox.is_empty() {
                out.flush()
            } else {
                Ok(())
            }
        });
        if let Err(err) = sent {
            tracing::debug!(%id, %err, "write failed");
            break;
        }
    }
    let _ = stream.shutdown(Shutdown::Both);
}
