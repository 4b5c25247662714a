//! Local HTTP listener receiving the authorization code redirect

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::constants::{CALLBACK_ERROR_HTML, CALLBACK_SUCCESS_HTML};
use crate::error::{Error, Result};

/// Query parameters delivered to the redirect URI
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    fn from_query(mut query: HashMap<String, String>) -> Self {
        Self {
            code: query.remove("code"),
            state: query.remove("state"),
            error: query.remove("error"),
            error_description: query.remove("error_description"),
        }
    }

    const fn is_relevant(&self) -> bool {
        self.code.is_some() || self.error.is_some()
    }
}

type SenderSlot = Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>;

/// Running callback listener.
///
/// The server task stops when [`CallbackListener::shutdown`] is awaited or the
/// listener is dropped, whichever comes first.
pub struct CallbackListener {
    local_addr: SocketAddr,
    receiver: Option<oneshot::Receiver<CallbackParams>>,
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for CallbackListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackListener")
            .field("local_addr", &self.local_addr)
            .field("stopped", &self.stop.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl CallbackListener {
    /// Bind the first address that accepts a listener
    pub async fn bind(addresses: &[SocketAddr]) -> Result<Self> {
        let mut failures = Vec::new();
        for addr in addresses {
            match TcpListener::bind(addr).await {
                Ok(listener) => return Self::serve(listener),
                Err(e) => {
                    tracing::debug!(address = %addr, error = %e, "Callback address unavailable");
                    failures.push(format!("{addr}: {e}"));
                }
            }
        }
        Err(Error::InvalidOption(format!(
            "could not bind any listen address ({})",
            failures.join("; ")
        )))
    }

    fn serve(listener: TcpListener) -> Result<Self> {
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::InvalidOption(format!("callback listener address: {e}")))?;

        let (sender, receiver) = oneshot::channel();
        let slot: SenderSlot = Arc::new(Mutex::new(Some(sender)));
        let router = Router::new()
            .route("/", get(handle_callback))
            .with_state(slot);

        let stop = CancellationToken::new();
        let shutdown = stop.clone().cancelled_owned();
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::warn!(error = %e, "Callback listener failed");
            }
        });

        tracing::debug!(address = %local_addr, "Callback listener started");
        Ok(Self {
            local_addr,
            receiver: Some(receiver),
            stop,
            task: Some(task),
        })
    }

    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the first redirect carrying a code or an error
    pub async fn wait(&mut self) -> Result<CallbackParams> {
        let receiver = self
            .receiver
            .take()
            .ok_or_else(|| Error::provider(None, "callback already consumed"))?;
        receiver
            .await
            .map_err(|_| Error::provider(None, "callback listener stopped"))
    }

    /// Stop the server and wait for it to finish
    pub async fn shutdown(mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::debug!(error = %e, "Callback listener task ended abnormally");
        }
        tracing::debug!(address = %self.local_addr, "Callback listener stopped");
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn handle_callback(
    State(slot): State<SenderSlot>,
    Query(query): Query<HashMap<String, String>>,
) -> Html<&'static str> {
    let params = CallbackParams::from_query(query);
    if !params.is_relevant() {
        return Html(CALLBACK_ERROR_HTML);
    }

    let page = if params.error.is_some() {
        CALLBACK_ERROR_HTML
    } else {
        CALLBACK_SUCCESS_HTML
    };

    if let Some(sender) = slot.lock().take() {
        let _ = sender.send(params);
    }
    Html(page)
}
