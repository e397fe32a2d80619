use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};

use serde::Serialize;
use tokio::task::JoinHandle;

const FALLBACK_MESSAGE: &str = "Something went wrong while displaying the exam.";
const RELOAD_ACTION: &str = "Reload";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FallbackScreen {
    pub message: String,
    pub action: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    Screen(String),
    Fallback(FallbackScreen),
}

impl Rendered {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }

    pub fn into_text(self) -> String {
        match self {
            Self::Screen(text) => text,
            Self::Fallback(screen) => format!("{}\n[{}]\n", screen.message, screen.action),
        }
    }
}

/// Contains panics from rendering and from background session work so that a
/// fault shows a reload prompt instead of taking the process down.
pub struct CrashBarrier;

impl CrashBarrier {
    pub fn render<F>(draw: F) -> Rendered
    where
        F: FnOnce() -> String,
    {
        match panic::catch_unwind(AssertUnwindSafe(draw)) {
            Ok(text) => Rendered::Screen(text),
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                metrics::counter!("exam_crash_barrier_catches_total").increment(1);
                tracing::error!(reason = %reason, "Rendering failed, showing reload screen");
                Rendered::Fallback(FallbackScreen {
                    message: FALLBACK_MESSAGE.to_string(),
                    action: RELOAD_ACTION,
                })
            }
        }
    }

    /// Awaits a spawned task and logs it if it panicked.
    pub async fn watch(label: &'static str, handle: JoinHandle<()>) {
        match handle.await {
            Ok(()) => {}
            Err(err) if err.is_panic() => {
                let reason = panic_message(err.into_panic().as_ref());
                metrics::counter!("exam_crash_barrier_catches_total").increment(1);
                tracing::error!(task = label, reason = %reason, "Session task panicked");
            }
            Err(_) => tracing::debug!(task = label, "Session task cancelled"),
        }
    }
}

/// Spawns session work behind the crash barrier. The returned handle finishes
/// once the work itself has finished.
pub(crate) fn spawn_contained<F>(label: &'static str, work: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(work);
    tokio::spawn(CrashBarrier::watch(label, handle))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
