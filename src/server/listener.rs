//! Listener and Connection Abstractions
//!
//! The server core never binds sockets itself. It is handed something that
//! implements [`Listener`] and only ever accepts from it and closes it.
//! TCP and (on unix) Unix-domain sockets are supported out of the box.

use std::future::Future;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{tcp, TcpListener, TcpStream};
use tracing::warn;

/// An accepted, bidirectional byte stream.
pub trait Connection: Send + 'static {
    /// Read half, owned by the session's read/dispatch task.
    type Reader: AsyncRead + Unpin + Send + 'static;
    /// Write half, owned by the session's flush task.
    type Writer: AsyncWrite + Unpin + Send + 'static;

    /// Splits the connection into independently owned halves.
    ///
    /// The connection is closed once both halves are dropped.
    fn into_split(self) -> (Self::Reader, Self::Writer);
}

/// A pre-bound source of connections.
pub trait Listener: Send + Sync + 'static {
    type Conn: Connection;

    /// Waits for the next connection and returns it with its peer address.
    fn accept(&self) -> impl Future<Output = io::Result<(Self::Conn, String)>> + Send;

    /// The address the listener is bound to, for logging.
    fn local_addr(&self) -> io::Result<String>;

    /// Closes the listener.
    fn close(self) -> io::Result<()>
    where
        Self: Sized,
    {
        drop(self);
        Ok(())
    }
}

impl Connection for TcpStream {
    type Reader = tcp::OwnedReadHalf;
    type Writer = tcp::OwnedWriteHalf;

    fn into_split(self) -> (Self::Reader, Self::Writer) {
        TcpStream::into_split(self)
    }
}

impl Listener for TcpListener {
    type Conn = TcpStream;

    fn accept(&self) -> impl Future<Output = io::Result<(Self::Conn, String)>> + Send {
        async move {
            let (stream, addr) = TcpListener::accept(self).await?;
            // Replies are batched already, don't let Nagle delay them further.
            // The option is a tuning knob; a peer that is already gone will
            // surface on its first read.
            if let Err(e) = stream.set_nodelay(true) {
                warn!(client = %addr, error = %e, "Failed to set TCP_NODELAY");
            }
            Ok((stream, addr.to_string()))
        }
    }

    fn local_addr(&self) -> io::Result<String> {
        TcpListener::local_addr(self).map(|addr| addr.to_string())
    }
}

#[cfg(unix)]
mod unix {
    use super::*;
    use tokio::net::{unix, UnixListener, UnixStream};

    impl Connection for UnixStream {
        type Reader = unix::OwnedReadHalf;
        type Writer = unix::OwnedWriteHalf;

        fn into_split(self) -> (Self::Reader, Self::Writer) {
            UnixStream::into_split(self)
        }
    }

    impl Listener for UnixListener {
        type Conn = UnixStream;

        fn accept(&self) -> impl Future<Output = io::Result<(Self::Conn, String)>> + Send {
            async move {
                let (stream, addr) = UnixListener::accept(self).await?;
                let peer = match addr.as_pathname() {
                    Some(path) => path.display().to_string(),
                    None => "unix:unnamed".to_string(),
                };
                Ok((stream, peer))
            }
        }

        fn local_addr(&self) -> io::Result<String> {
            let addr = UnixListener::local_addr(self)?;
            Ok(match addr.as_pathname() {
                Some(path) => path.display().to_string(),
                None => "unix:unnamed".to_string(),
            })
        }

        fn close(self) -> io::Result<()> {
            // The socket file outlives the descriptor; remove it so the
            // path can be bound again.
            let path = UnixListener::local_addr(&self)?
                .as_pathname()
                .map(|p| p.to_path_buf());
            drop(self);
            match path {
                Some(path) => match std::fs::remove_file(path) {
                    Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
                    _ => Ok(()),
                },
                None => Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_tcp_accept_and_split() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = Listener::local_addr(&listener).unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"ping").await.unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            buf
        });

        let (conn, peer) = Listener::accept(&listener).await.unwrap();
        assert!(peer.starts_with("127.0.0.1:"));
        assert!(conn.nodelay().unwrap());

        let (mut reader, mut writer) = Connection::into_split(conn);
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        writer.write_all(b"pong").await.unwrap();

        assert_eq!(&client.await.unwrap(), b"pong");
        Listener::close(listener).unwrap();
    }

    #[tokio::test]
    async fn test_accept_survives_peer_gone_before_accept() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = Listener::local_addr(&listener).unwrap();

        drop(TcpStream::connect(addr.as_str()).await.unwrap());
        let (conn, _) = Listener::accept(&listener).await.unwrap();
        let (mut reader, _writer) = Connection::into_split(conn);
        let mut rest = Vec::new();
        assert_eq!(reader.read_to_end(&mut rest).await.unwrap(), 0);

        // The listener keeps accepting
        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        Listener::accept(&listener).await.unwrap();
        client.await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_close_removes_socket_file() {
        use tokio::net::UnixListener;

        let path = std::env::temp_dir().join(format!("sider-listener-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let listener = UnixListener::bind(&path).unwrap();
        assert_eq!(
            Listener::local_addr(&listener).unwrap(),
            path.display().to_string()
        );
        assert!(path.exists());

        Listener::close(listener).unwrap();
        assert!(!path.exists());
    }
}
