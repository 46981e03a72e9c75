use tokio::net::{TcpListener, ToSocketAddrs};

use crate::{ConnectionContext, handle_connection};

/// Binds `addr` and serves connections forever.
///
/// # Errors
///
/// * If the address cannot be bound
pub async fn run(addr: impl ToSocketAddrs) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;

    log::info!(
        "SQL REPL server listening on {}",
        listener.local_addr()?.port()
    );

    serve(listener).await;

    Ok(())
}

/// Accepts connections from `listener` forever, running each one on its own
/// task. Accept errors are logged and do not stop the loop.
pub async fn serve(listener: TcpListener) {
    let mut next_id = 0_u64;

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                log::error!("Failed to accept connection: {e:?}");
                continue;
            }
        };

        next_id += 1;
        let ctx = ConnectionContext::new(next_id, Some(peer));
        log::debug!("{ctx} accepted connection");

        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("{ctx} failed to set TCP_NODELAY: {e:?}");
        }

        tokio::spawn(async move {
            match handle_connection(stream, ctx).await {
                Ok(()) => log::debug!("{ctx} connection closed"),
                Err(e) => log::debug!("{ctx} connection closed: {e}"),
            }
        });
    }
}
