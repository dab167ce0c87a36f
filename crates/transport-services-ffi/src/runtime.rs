//! The shared tokio runtime behind blocking entry points.

use std::future::Future;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use transport_services::{EstablishmentEngine, EstablishmentError};

const TARGET: &str = "transport_services_ffi";

struct Shared {
    runtime: Runtime,
    engine: Option<EstablishmentEngine>,
}

static SHARED: Mutex<Option<Shared>> = parking_lot::const_mutex(None);

/// Start the runtime if it is not running yet.
pub(crate) fn ensure() -> std::io::Result<Handle> {
    let mut shared = SHARED.lock();
    if let Some(shared) = shared.as_ref() {
        return Ok(shared.runtime.handle().clone());
    }

    let runtime = Builder::new_multi_thread()
        .thread_name("taps-runtime")
        .enable_all()
        .build()?;
    tracing::debug!(target: TARGET, "Started runtime");
    let handle = runtime.handle().clone();
    *shared = Some(Shared {
        runtime,
        engine: None,
    });
    Ok(handle)
}

/// Drive `future` to completion on the shared runtime.
pub(crate) fn block_on<F: Future>(future: F) -> std::io::Result<F::Output> {
    let handle = ensure()?;
    Ok(handle.block_on(future))
}

/// The establishment engine used by `taps_connection_initiate`.
///
/// Built inside `handle`'s runtime on first use and cached until shutdown.
pub(crate) fn engine(handle: &Handle) -> Result<EstablishmentEngine, EstablishmentError> {
    let mut shared = SHARED.lock();
    if let Some(engine) = shared.as_ref().and_then(|shared| shared.engine.clone()) {
        return Ok(engine);
    }

    let engine = {
        let _entered = handle.enter();
        EstablishmentEngine::system()?
    };
    // After a concurrent shutdown the engine is used once and not cached.
    if let Some(shared) = shared.as_mut() {
        shared.engine = Some(engine.clone());
    }
    Ok(engine)
}

/// Stop the runtime without waiting for outstanding tasks.
pub(crate) fn shutdown() {
    let shared = SHARED.lock().take();
    if let Some(shared) = shared {
        drop(shared.engine);
        shared.runtime.shutdown_background();
        tracing::debug!(target: TARGET, "Runtime shut down");
    }
}
