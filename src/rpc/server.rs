//! The per-general RPC endpoint: an accept loop on a background thread, one
//! handler thread per inbound connection.

use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use log::{debug, warn};

use super::{read_frame, write_frame, RpcError};
use crate::protocol::{Reply, Request};

/// A request handler attached to an [`RpcServer`].
///
/// Handlers may run concurrently; implementations guard their own state.
pub trait RpcObject: Send + Sync + 'static {
    fn handle_rpc(&self, request: Request) -> Result<Reply, RpcError>;
}

/// Long-lived endpoint serving [`Request`] frames until `running` is cleared.
///
/// Once `running` goes false the accept loop stops taking new connections on
/// its next wakeup; connections already accepted drain their replies. Callers
/// shutting the server down poke the listener with a throwaway connection so
/// the loop notices immediately.
pub struct RpcServer {
    handler: Arc<dyn RpcObject>,
    running: Arc<AtomicBool>,
    listener: Option<TcpListener>,
}

impl RpcServer {
    pub fn new(handler: Arc<dyn RpcObject>, running: Arc<AtomicBool>) -> RpcServer {
        RpcServer {
            handler,
            running,
            listener: None,
        }
    }

    pub fn bind<A: ToSocketAddrs>(&mut self, addr: A) -> Result<(), RpcError> {
        self.listener = Some(TcpListener::bind(addr)?);
        Ok(())
    }

    /// Moves the bound listener onto a background accept thread.
    pub fn serve(&mut self) -> Result<(), RpcError> {
        let listener = self.listener.take().ok_or(RpcError::NotBound)?;
        let handler = self.handler.clone();
        let running = self.running.clone();
        thread::spawn(move || accept_loop(listener, handler, running));
        Ok(())
    }
}

fn accept_loop(listener: TcpListener, handler: Arc<dyn RpcObject>, running: Arc<AtomicBool>) {
    for stream in listener.incoming() {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        match stream {
            Ok(stream) => {
                let handler = handler.clone();
                thread::spawn(move || {
                    if let Err(err) = serve_connection(handler.as_ref(), stream) {
                        debug!("dropping connection: {}", err);
                    }
                });
            }
            Err(err) => warn!("accept failed: {}", err),
        }
    }
    debug!("accept loop on {:?} exited", listener.local_addr());
}

fn serve_connection(handler: &dyn RpcObject, mut stream: TcpStream) -> Result<(), RpcError> {
    let request: Request = read_frame(&mut stream)?;
    let reply = handler.handle_rpc(request)?;
    write_frame(&mut stream, &reply)
}
