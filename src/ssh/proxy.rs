use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::backend::BackendStream;
use crate::error::{Error, Result};

const CHUNK_SIZE: usize = 32 * 1024;
const FLUSH_PKT: &[u8] = b"0000";

/// Client to backend. A read that yields exactly a flush packet is skipped
/// when `drop_bare_flush` is set. The backend's stdin is closed on EOF.
pub async fn copy_upstream<R, W>(mut client: R, mut backend: W, drop_bare_flush: bool) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = client.read(&mut buf).await.map_err(Error::Io)?;
        if n == 0 {
            break;
        }
        let chunk = &buf[..n];
        if drop_bare_flush && chunk == FLUSH_PKT {
            debug!("Dropping bare flush packet");
            continue;
        }
        backend.write_all(chunk).await.map_err(Error::Io)?;
        backend.flush().await.map_err(Error::Io)?;
        total += n as u64;
    }
    backend.shutdown().await.map_err(Error::Io)?;
    Ok(total)
}

/// Backend to client, until the backend closes its stdout.
pub async fn copy_downstream<R, W>(mut backend: R, mut client: W) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let total = tokio::io::copy(&mut backend, &mut client)
        .await
        .map_err(Error::Io)?;
    client.flush().await.map_err(Error::Io)?;
    Ok(total)
}

/// Pumps both directions and returns the backend's exit status.
///
/// Pushes wait for both copiers. Fetches finish as soon as the backend
/// output is drained, since the client may keep its side open.
pub async fn proxy<R, W>(
    stream: BackendStream,
    client_in: R,
    client_out: W,
    wait_for_upstream: bool,
    drop_bare_flush: bool,
) -> Result<i32>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let BackendStream {
        stdin,
        stdout,
        completion,
    } = stream;

    let upstream = copy_upstream(client_in, stdin, drop_bare_flush);
    let downstream = copy_downstream(stdout, client_out);

    if wait_for_upstream {
        tokio::try_join!(upstream, downstream)?;
    } else {
        tokio::pin!(upstream);
        tokio::pin!(downstream);
        let mut upstream_done = false;
        loop {
            tokio::select! {
                result = &mut upstream, if !upstream_done => {
                    result?;
                    upstream_done = true;
                }
                result = &mut downstream => {
                    result?;
                    break;
                }
            }
        }
    }

    completion.await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_upstream_drops_only_exact_flush() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            tx.write_all(b"0000").await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            tx.write_all(b"0009done\n").await.unwrap();
        });

        let mut out = Vec::new();
        copy_upstream(rx, &mut out, true).await.unwrap();
        writer.await.unwrap();
        assert_eq!(out, b"0009done\n");
    }

    #[tokio::test]
    async fn test_upstream_keeps_flush_when_not_dropping() {
        let mut out = Vec::new();
        copy_upstream(Cursor::new(b"0000".to_vec()), &mut out, false)
            .await
            .unwrap();
        assert_eq!(out, b"0000");
    }

    #[tokio::test]
    async fn test_fetch_finishes_without_client_eof() {
        // Client input that never ends.
        let (_client_tx, client_rx) = tokio::io::duplex(64);
        let (backend_in, _backend_in_rx) = tokio::io::duplex(64);

        let stream = BackendStream {
            stdin: Box::pin(backend_in),
            stdout: Box::pin(Cursor::new(b"pack-data".to_vec())),
            completion: Box::pin(async { Ok::<_, Error>(0) }),
        };

        let mut out = Vec::new();
        let code = proxy(stream, client_rx, &mut out, false, false).await.unwrap();
        assert_eq!(code, 0);
        assert_eq!(out, b"pack-data");
    }
}
