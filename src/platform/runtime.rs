use std::future::Future;
use std::time::Duration;

#[cfg(not(target_arch = "wasm32"))]
use once_cell::sync::Lazy;
#[cfg(not(target_arch = "wasm32"))]
use tokio::runtime::{Builder, Handle, Runtime};

// Serves callers with no ambient runtime, such as synchronous drop paths.
#[cfg(not(target_arch = "wasm32"))]
static FALLBACK: Lazy<Runtime> = Lazy::new(|| {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build fallback tokio runtime")
});

/// Spawns a fire-and-forget background task on the browser event loop.
#[cfg(target_arch = "wasm32")]
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + 'static,
{
    wasm_bindgen_futures::spawn_local(future);
}

/// Spawns a fire-and-forget background task.
///
/// Uses the ambient tokio runtime when one is present and the lazily-built
/// fallback runtime otherwise.
#[cfg(not(target_arch = "wasm32"))]
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
        }
        Err(_) => {
            FALLBACK.spawn(future);
        }
    }
}

/// Waits out `duration` on the platform timer. Zero durations complete
/// without yielding.
pub async fn sleep(duration: Duration) {
    if duration.is_zero() {
        return;
    }

    #[cfg(target_arch = "wasm32")]
    gloo_timers::future::sleep(duration).await;
    #[cfg(not(target_arch = "wasm32"))]
    tokio::time::sleep(duration).await;
}
