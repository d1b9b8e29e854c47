//! Rollout Orchestrator
//!
//! The cycle state machine: sign + login, register, check for a pending
//! rollout, resolve the image's content identifier, apply it, report the
//! result, restart. One well-named step per remote call, one dispatch
//! function, no retries inside a cycle. A failed step aborts and the
//! next periodic trigger starts over from scratch.
//!
//! Known inconsistency window: if apply succeeds but the success report
//! does not reach the backend, the device restarts into the new firmware
//! while the backend still sees the rollout as outstanding. Apply is
//! at-least-once, reporting is best-effort.

use crate::agent::backend::{Backend, ContentLocator, SessionToken};
use crate::agent::config::DeviceIdentity;
use crate::agent::signer::{self, Clock};
use crate::agent::updater::{UpdateOutcome, Updater};
use std::fmt;
use tracing::{debug, error, info, warn};

/// Terminal status of one orchestration pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Connectivity probe reported the network down; nothing attempted.
    NetworkUnavailable,
    AuthFailed,
    RegistrationFailed,
    RolloutQueryFailed,
    /// No rollout pending. The normal steady state, not an error.
    NoRollout,
    CidMissing,
    UpdateFailed,
    UpdateNotNeeded,
    /// Image applied, success reported, restart triggered.
    UpdateApplied,
    /// Image applied but the backend was not told. See module docs.
    ReportFailed,
}

impl CycleOutcome {
    /// Whether this outcome is an abort (something went wrong) rather
    /// than a completed or benignly short-circuited cycle.
    pub fn is_abort(&self) -> bool {
        !matches!(
            self,
            Self::NoRollout | Self::UpdateNotNeeded | Self::UpdateApplied
        )
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NetworkUnavailable => "network_unavailable",
            Self::AuthFailed => "auth_failed",
            Self::RegistrationFailed => "registration_failed",
            Self::RolloutQueryFailed => "rollout_query_failed",
            Self::NoRollout => "no_rollout",
            Self::CidMissing => "cid_missing",
            Self::UpdateFailed => "update_failed",
            Self::UpdateNotNeeded => "update_not_needed",
            Self::UpdateApplied => "update_applied",
            Self::ReportFailed => "report_failed",
        };
        f.write_str(label)
    }
}

/// State that survives across cycles. Everything else (token, offer,
/// locator) lives and dies inside one cycle.
#[derive(Debug, Default, Clone)]
pub struct CycleContext {
    /// Set after the first successful registration; later cycles skip
    /// the register call.
    pub registered: bool,
}

impl CycleContext {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Reachability probe consulted once at cycle start. Network
/// provisioning itself is outside this crate; deployments that cannot
/// probe use [`AlwaysOnline`] and let the login step discover outages.
pub trait Connectivity {
    fn is_connected(&self) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn is_connected(&self) -> bool {
        true
    }
}

/// Restart primitive invoked after a reported update. The process does
/// not survive it in production.
pub trait Restarter {
    fn restart(&self);
}

/// Exits the process and relies on the service supervisor to relaunch
/// it on the new firmware.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRestarter;

impl Restarter for ProcessRestarter {
    fn restart(&self) {
        info!("restarting to apply update");
        std::process::exit(0);
    }
}

/// One step of the cycle, carrying exactly the per-cycle state the next
/// remote call needs.
enum Step {
    Authenticating,
    Registering {
        token: SessionToken,
    },
    CheckingRollout {
        token: SessionToken,
    },
    ResolvingCid {
        token: SessionToken,
        firmware_id: String,
        rollout_id: String,
    },
    Applying {
        token: SessionToken,
        rollout_id: String,
        locator: ContentLocator,
    },
    ReportingSuccess {
        token: SessionToken,
        rollout_id: String,
    },
    Restarting,
    Done(CycleOutcome),
}

/// Sequences Signer, Backend and Updater calls for one device.
pub struct Orchestrator<'a> {
    backend: &'a dyn Backend,
    updater: &'a dyn Updater,
    clock: &'a dyn Clock,
    connectivity: &'a dyn Connectivity,
    restarter: &'a dyn Restarter,
    device: &'a DeviceIdentity,
    firmware_version: &'a str,
}

impl<'a> Orchestrator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: &'a dyn Backend,
        updater: &'a dyn Updater,
        clock: &'a dyn Clock,
        connectivity: &'a dyn Connectivity,
        restarter: &'a dyn Restarter,
        device: &'a DeviceIdentity,
        firmware_version: &'a str,
    ) -> Self {
        Self {
            backend,
            updater,
            clock,
            connectivity,
            restarter,
            device,
            firmware_version,
        }
    }

    /// Run one full cycle to a terminal outcome. Not reentrant; callers
    /// must let each cycle finish before starting the next.
    pub fn run_cycle(&self, ctx: &mut CycleContext) -> CycleOutcome {
        if !self.connectivity.is_connected() {
            warn!("network unavailable, skipping cycle");
            return CycleOutcome::NetworkUnavailable;
        }

        let mut step = Step::Authenticating;
        loop {
            step = self.advance(step, ctx);
            if let Step::Done(outcome) = step {
                info!(%outcome, "cycle finished");
                return outcome;
            }
        }
    }

    /// Single dispatch function: performs the remote call for `step` and
    /// returns the next step, threading tokens and identifiers along.
    fn advance(&self, step: Step, ctx: &mut CycleContext) -> Step {
        match step {
            Step::Authenticating => {
                let timestamp = self.clock.unix_timestamp();
                let signature =
                    signer::sign(&self.device.customer_key, &self.device.device_key, timestamp);
                match self
                    .backend
                    .login(&self.device.device_key, &signature, timestamp)
                {
                    Ok(token) => {
                        info!("login ok");
                        Step::Registering { token }
                    }
                    Err(e) => {
                        error!("login failed: {}", e);
                        Step::Done(CycleOutcome::AuthFailed)
                    }
                }
            }

            Step::Registering { token } => {
                if ctx.registered {
                    debug!("device already registered, skipping");
                    return Step::CheckingRollout { token };
                }
                match self
                    .backend
                    .register(&token, &self.device.mac, self.firmware_version)
                {
                    Ok(()) => {
                        ctx.registered = true;
                        info!("device registered");
                        Step::CheckingRollout { token }
                    }
                    Err(e) => {
                        error!("device registration failed: {}", e);
                        Step::Done(CycleOutcome::RegistrationFailed)
                    }
                }
            }

            Step::CheckingRollout { token } => {
                let offer = match self.backend.check_rollout(
                    &token,
                    &self.device.mac,
                    self.firmware_version,
                ) {
                    Ok(offer) => offer,
                    Err(e) => {
                        error!("rollout query failed: {}", e);
                        return Step::Done(CycleOutcome::RolloutQueryFailed);
                    }
                };
                let Some(rollout_id) = offer.rollout_id else {
                    info!("no rollout pending");
                    return Step::Done(CycleOutcome::NoRollout);
                };
                let Some(firmware_id) = offer.firmware_id else {
                    error!(%rollout_id, "rollout offer missing firmware_id");
                    return Step::Done(CycleOutcome::RolloutQueryFailed);
                };
                info!(%rollout_id, %firmware_id, "rollout pending");
                Step::ResolvingCid {
                    token,
                    firmware_id,
                    rollout_id,
                }
            }

            Step::ResolvingCid {
                token,
                firmware_id,
                rollout_id,
            } => {
                let locator = match self.backend.resolve_cid(&token, &firmware_id) {
                    Ok(locator) => locator,
                    Err(e) => {
                        error!(%firmware_id, "CID resolution failed: {}", e);
                        return Step::Done(CycleOutcome::CidMissing);
                    }
                };
                if locator.cid.is_empty() {
                    warn!(%firmware_id, "ledger returned an empty CID");
                    return Step::Done(CycleOutcome::CidMissing);
                }
                info!(cid = %locator.cid, "CID resolved");
                Step::Applying {
                    token,
                    rollout_id,
                    locator,
                }
            }

            Step::Applying {
                token,
                rollout_id,
                locator,
            } => match self.updater.apply(&token, &locator) {
                UpdateOutcome::Applied => {
                    info!("firmware image applied");
                    Step::ReportingSuccess { token, rollout_id }
                }
                UpdateOutcome::NotNeeded => {
                    info!("platform reports update not needed");
                    Step::Done(CycleOutcome::UpdateNotNeeded)
                }
                UpdateOutcome::Failed { reason } => {
                    error!("update failed: {}", reason);
                    Step::Done(CycleOutcome::UpdateFailed)
                }
            },

            Step::ReportingSuccess { token, rollout_id } => {
                match self.backend.report_success(
                    &token,
                    &self.device.mac,
                    self.firmware_version,
                    &rollout_id,
                ) {
                    Ok(()) => Step::Restarting,
                    Err(e) => {
                        // The update is already applied. The backend will
                        // keep offering the rollout until a later cycle's
                        // apply comes back NotNeeded.
                        error!(%rollout_id, "rollout success report failed: {}", e);
                        Step::Done(CycleOutcome::ReportFailed)
                    }
                }
            }

            Step::Restarting => {
                self.restarter.restart();
                Step::Done(CycleOutcome::UpdateApplied)
            }

            done @ Step::Done(_) => done,
        }
    }
}
