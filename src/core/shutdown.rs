use tokio::signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShutdownReason {
    Interrupt,
    Terminate,
}

impl ShutdownReason {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Interrupt => "interrupt",
            Self::Terminate => "terminate",
        }
    }
}

/// Resolves once the process is asked to stop. A handler that cannot be
/// installed never fires instead of stopping the session early.
pub(crate) async fn shutdown_signal() -> ShutdownReason {
    let interrupt = async {
        match signal::ctrl_c().await {
            Ok(()) => ShutdownReason::Interrupt,
            Err(err) => {
                tracing::error!(error = %err, "Failed to install Ctrl+C handler");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                ShutdownReason::Terminate
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<ShutdownReason>();

    let reason = tokio::select! {
        reason = interrupt => reason,
        reason = terminate => reason,
    };
    tracing::info!(reason = reason.as_str(), "Shutdown signal received");
    reason
}
