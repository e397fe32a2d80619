pub mod core;
pub mod schemas;
pub mod services;
pub mod session;
pub mod shell;
pub mod transport;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use crate::core::{config::Settings, telemetry, time::SystemClock};
use crate::session::{render_text, ExamSession};
use crate::shell::CrashBarrier;
use crate::transport::{ChannelSocket, HttpExamApi};

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let exam_id = settings.exam_id()?.to_string();
    let api = Arc::new(HttpExamApi::from_settings(settings.api())?);
    let session = ExamSession::new(
        exam_id.clone(),
        api,
        Arc::new(read_only_socket(&exam_id)),
        Arc::new(SystemClock),
        settings.session(),
    );

    tracing::info!(
        exam_id = %exam_id,
        base_url = %settings.api().base_url,
        environment = %settings.runtime().environment.as_str(),
        "Exam session starting"
    );
    if let Err(err) = session.load().await {
        tracing::error!(error = %err, "Initial exam load failed");
    }

    let shutdown = core::shutdown::shutdown_signal();
    tokio::pin!(shutdown);
    let mut redraw = tokio::time::interval(settings.session().tick_interval);

    loop {
        tokio::select! {
            reason = &mut shutdown => {
                tracing::info!(reason = reason.as_str(), "Stopping exam session");
                break;
            }
            _ = redraw.tick() => {
                let view = session.view().await;
                let screen = CrashBarrier::render(|| render_text(&view));
                let crashed = screen.is_fallback();
                println!("{}", screen.into_text());
                if crashed || view.phase.is_terminal() {
                    break;
                }
            }
        }
    }

    session.teardown().await;
    if let Some(snapshot) = core::metrics::render() {
        tracing::debug!(metrics = %snapshot, "Session metrics");
    }

    Ok(())
}

/// No live event channel is attached to the bridge, so the session stays offline.
fn read_only_socket(exam_id: &str) -> ChannelSocket {
    let (socket, _bridge) = ChannelSocket::new(false);
    tracing::warn!(
        exam_id = %exam_id,
        "No live event channel attached; session is read-only (start and submit are disabled)"
    );
    socket
}
