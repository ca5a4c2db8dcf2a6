//! TCP server with deferred startup.
//!
//! `new()` allocates shared state, `start()` binds the listener, and
//! `serve()` accepts until shutdown. Each connection carries exactly one
//! request: read the RSA ciphertext, process it on the blocking pool,
//! write the encrypted response, close.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use super::channel::{process_packet, PacketHandler};
use super::config::NetworkConfig;
use super::shutdown::ShutdownController;

/// State shared by every connection task.
struct ConnectionContext {
    handler: Arc<dyn PacketHandler>,
    private_key: RsaPrivateKey,
    read_timeout: Duration,
    shutdown: Arc<ShutdownController>,
    fatal: OnceLock<String>,
}

/// Owns the listener and the connection lifecycle.
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    context: Arc<ConnectionContext>,
}

impl NetworkModule {
    /// Creates the module without binding any port.
    #[must_use]
    pub fn new(
        config: NetworkConfig,
        handler: Arc<dyn PacketHandler>,
        private_key: RsaPrivateKey,
    ) -> Self {
        let context = Arc::new(ConnectionContext {
            handler,
            private_key,
            read_timeout: config.read_timeout,
            shutdown: Arc::new(ShutdownController::new()),
            fatal: OnceLock::new(),
        });
        Self {
            config,
            listener: None,
            context,
        }
    }

    /// Shared shutdown controller, usable before and during `serve()`.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.context.shutdown)
    }

    /// Binds the listener. Returns the bound port, which differs from the
    /// configured one when that is 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let listener = TcpListener::bind(self.config.bind_address()).await?;
        let port = listener.local_addr()?.port();
        info!(host = %self.config.host, port, "TCP listener bound");
        self.listener = Some(listener);
        Ok(port)
    }

    /// Accepts connections until `shutdown` resolves or the controller is
    /// triggered, then waits for open connections to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called, or after draining if a
    /// connection hit a fatal error (the database failed to open).
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let Some(listener) = self.listener else {
            anyhow::bail!("start() must be called before serve()");
        };
        let context = self.context;
        let controller = Arc::clone(&context.shutdown);
        let mut stop = controller.shutdown_receiver();
        tokio::pin!(shutdown);

        controller.set_ready();
        info!("accepting connections");
        loop {
            if *stop.borrow_and_update() {
                break;
            }
            tokio::select! {
                () = &mut shutdown => break,
                _ = stop.changed() => {}
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let guard = controller.in_flight_guard();
                        let context = Arc::clone(&context);
                        tokio::spawn(async move {
                            handle_connection(stream, peer, &context).await;
                            drop(guard);
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
            }
        }
        drop(listener);

        controller.trigger_shutdown();
        let in_flight = controller.in_flight_count();
        if in_flight > 0 {
            info!(in_flight, "draining connections");
        }
        if controller.wait_for_drain(self.config.drain_timeout).await {
            info!("all connections drained");
        } else {
            warn!("drain timeout expired with connections still open");
        }

        match context.fatal.get() {
            Some(reason) => Err(anyhow::anyhow!("server stopped: {reason}")),
            None => Ok(()),
        }
    }
}

async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, context: &Arc<ConnectionContext>) {
    let capacity = context.private_key.size();
    let request = match read_request(&mut stream, capacity, context.read_timeout).await {
        Ok(request) => request,
        Err(e) => {
            debug!(%peer, error = %e, "request read failed");
            return;
        }
    };

    let worker = Arc::clone(context);
    let outcome = tokio::task::spawn_blocking(move || {
        process_packet(&worker.private_key, worker.handler.as_ref(), &request)
    })
    .await;

    match outcome {
        Ok(Ok(response)) => {
            if let Err(e) = stream.write_all(&response).await {
                debug!(%peer, error = %e, "response write failed");
            }
        }
        Ok(Err(e)) if e.is_fatal() => {
            error!(%peer, error = %e, "fatal session error, shutting down");
            let _ = context.fatal.set(e.to_string());
            context.shutdown.trigger_shutdown();
        }
        Ok(Err(e)) => warn!(%peer, error = %e, "request rejected"),
        Err(e) => error!(%peer, error = %e, "request task failed"),
    }
    let _ = stream.shutdown().await;
}

/// Reads until `capacity` bytes arrive or the client half-closes.
async fn read_request(
    stream: &mut TcpStream,
    capacity: usize,
    timeout: Duration,
) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; capacity];
    let mut filled = 0;
    let read = async {
        while filled < capacity {
            let n = stream.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok::<(), io::Error>(())
    };
    tokio::time::timeout(timeout, read)
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "request read timed out"))??;
    if filled == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "empty request"));
    }
    buf.truncate(filled);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;
    use tsvault_core::crypto::aes_cbc_decrypt;
    use tsvault_core::IV_LEN;

    use super::*;
    use crate::db::DbError;
    use crate::network::channel::{ChannelError, Envelope, SESSION_KEY_LEN};
    use crate::network::shutdown::HealthState;
    use crate::testing::rsa_key;

    struct Echo;

    impl PacketHandler for Echo {
        fn handle(&self, _key: &[u8; SESSION_KEY_LEN], body: &[u8]) -> Result<Vec<u8>, ChannelError> {
            Ok(body.to_vec())
        }
    }

    struct Broken;

    impl PacketHandler for Broken {
        fn handle(&self, _key: &[u8; SESSION_KEY_LEN], _body: &[u8]) -> Result<Vec<u8>, ChannelError> {
            Err(ChannelError::DbInit(DbError::UnknownAccount(0)))
        }
    }

    fn local_config() -> NetworkConfig {
        NetworkConfig {
            host: "127.0.0.1".to_string(),
            read_timeout: Duration::from_secs(2),
            drain_timeout: Duration::from_secs(2),
            ..NetworkConfig::default()
        }
    }

    fn module(handler: Arc<dyn PacketHandler>) -> NetworkModule {
        NetworkModule::new(local_config(), handler, rsa_key().clone())
    }

    async fn round_trip(port: u16, envelope: &Envelope) -> Vec<u8> {
        let ciphertext = envelope.seal(&rsa_key().to_public_key()).unwrap();
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(&ciphertext).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        response
    }

    #[test]
    fn new_creates_module_without_binding() {
        let module = module(Arc::new(Echo));
        assert!(module.listener.is_none());
        assert!(Arc::ptr_eq(
            &module.shutdown_controller(),
            &module.shutdown_controller()
        ));
    }

    #[tokio::test]
    async fn start_binds_to_os_assigned_port() {
        let mut module = module(Arc::new(Echo));
        let port = module.start().await.unwrap();
        assert!(port > 0);
        assert!(module.listener.is_some());
    }

    #[tokio::test]
    async fn serve_without_start_is_an_error() {
        let result = module(Arc::new(Echo)).serve(std::future::pending()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn stop_before_serve_returns_immediately() {
        let mut module = module(Arc::new(Echo));
        module.start().await.unwrap();
        module.shutdown_controller().trigger_shutdown();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            module.serve(std::future::pending()),
        )
        .await
        .expect("serve ignored the earlier stop");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn echo_round_trip_then_graceful_stop() {
        let mut module = module(Arc::new(Echo));
        let port = module.start().await.unwrap();
        let controller = module.shutdown_controller();
        let (tx, rx) = oneshot::channel::<()>();
        let server = tokio::spawn(module.serve(async {
            let _ = rx.await;
        }));

        let envelope = Envelope {
            session_key: [1u8; SESSION_KEY_LEN],
            iv: [2u8; IV_LEN],
            body: b"hello".to_vec(),
        };
        let response = round_trip(port, &envelope).await;
        let plain = aes_cbc_decrypt(&envelope.session_key, &envelope.iv, &response).unwrap();
        assert_eq!(plain, b"hello");

        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert_eq!(controller.health_state(), HealthState::Stopped);
    }

    #[tokio::test]
    async fn garbage_request_gets_no_response() {
        let mut module = module(Arc::new(Echo));
        let port = module.start().await.unwrap();
        let controller = module.shutdown_controller();
        let server = tokio::spawn(module.serve(std::future::pending()));

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(&[7u8; 256]).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        assert!(response.is_empty());

        controller.trigger_shutdown();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn fatal_handler_error_stops_server() {
        let mut module = module(Arc::new(Broken));
        let port = module.start().await.unwrap();
        let server = tokio::spawn(module.serve(std::future::pending()));

        let envelope = Envelope {
            session_key: [1u8; SESSION_KEY_LEN],
            iv: [2u8; IV_LEN],
            body: vec![0],
        };
        assert!(round_trip(port, &envelope).await.is_empty());
        let result = server.await.unwrap();
        assert!(result.is_err());
    }
}
