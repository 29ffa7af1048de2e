//! Process-wide activation entry points.
//!
//! The host calls [`activate`] once when the extension starts and
//! [`deactivate`] when it unloads. The telemetry session lives from the start
//! of activation until deactivation.

use std::sync::Arc;

use parking_lot::{const_mutex, Mutex};

use crate::activation::Orchestrator;
use crate::error::ActivationError;
use crate::telemetry::{Telemetry, TelemetryError};

/// The orchestrator owning this process, with its telemetry session.
struct Session {
    orchestrator: Orchestrator,
    telemetry: Arc<dyn Telemetry>,
}

static SESSION: Mutex<Option<Session>> = const_mutex(None);

/// Activate `orchestrator` for this process.
///
/// If an orchestrator is already active (or activating), that one is
/// returned and `orchestrator` is left untouched. A failed activation clears
/// the process state so the host may try again, unless a later activation
/// has already taken its place.
pub async fn activate(orchestrator: Orchestrator) -> Result<Orchestrator, ActivationError> {
    {
        let mut session = SESSION.lock();
        if let Some(existing) = session.as_ref() {
            tracing::debug!("extension already activated");
            return Ok(existing.orchestrator.clone());
        }
        *session = Some(Session {
            orchestrator: orchestrator.clone(),
            telemetry: orchestrator.telemetry(),
        });
    }

    if let Err(e) = orchestrator.activate().await {
        let mut session = SESSION.lock();
        if session
            .as_ref()
            .is_some_and(|s| s.orchestrator.ptr_eq(&orchestrator))
        {
            session.take();
        } else {
            tracing::debug!("superseded activation failed, keeping the current session");
        }
        return Err(e);
    }

    Ok(orchestrator)
}

/// Tear down the process state, awaiting telemetry shutdown.
///
/// An activation still in progress is shut down and will fail.
pub async fn deactivate() -> Result<(), TelemetryError> {
    let session = SESSION.lock().take();
    let Some(Session {
        orchestrator,
        telemetry,
    }) = session
    else {
        tracing::debug!("extension not activated, nothing to tear down");
        return Ok(());
    };

    orchestrator.shutdown();
    telemetry.shutdown().await?;

    tracing::info!("extension deactivated");
    Ok(())
}

/// The orchestrator activated for this process, if any.
pub fn current() -> Option<Orchestrator> {
    SESSION.lock().as_ref().map(|s| s.orchestrator.clone())
}
