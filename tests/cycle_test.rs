//! End-to-end rollout cycle scenarios against scripted collaborators.

use ota_agent::agent::backend::{
    Backend, BackendError, ContentLocator, RolloutOffer, SessionToken,
};
use ota_agent::agent::config::DeviceIdentity;
use ota_agent::agent::orchestrator::{AlwaysOnline, CycleContext, CycleOutcome, Restarter};
use ota_agent::agent::signer::Clock;
use ota_agent::agent::updater::{UpdateOutcome, Updater};
use ota_agent::Orchestrator;
use std::cell::{Cell, RefCell};

struct FixedClock(u64);

impl Clock for FixedClock {
    fn unix_timestamp(&self) -> u64 {
        self.0
    }
}

#[derive(Default)]
struct CountingRestarter {
    restarts: Cell<u32>,
}

impl Restarter for CountingRestarter {
    fn restart(&self) {
        self.restarts.set(self.restarts.get() + 1);
    }
}

/// A scripted backend: fixed responses, every call recorded in order.
struct ScriptedBackend {
    rollout: RolloutOffer,
    cid: String,
    calls: RefCell<Vec<&'static str>>,
}

impl ScriptedBackend {
    fn new(rollout_id: Option<&str>, cid: &str) -> Self {
        Self {
            rollout: RolloutOffer {
                firmware_id: Some("fw-42".to_string()),
                rollout_id: rollout_id.map(|s| s.to_string()),
            },
            cid: cid.to_string(),
            calls: RefCell::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.borrow().clone()
    }
}

impl Backend for ScriptedBackend {
    fn login(
        &self,
        device_key: &str,
        device_signature: &str,
        timestamp: u64,
    ) -> Result<SessionToken, BackendError> {
        self.calls.borrow_mut().push("login");
        // The orchestrator must send the reproducible signed request.
        assert_eq!(device_key, "device-key-1");
        assert_eq!(timestamp, 1_700_000_000);
        assert_eq!(
            device_signature,
            "925e67af763a4f7c9b0838304c2cc685d462f9fd9cb9861ee73cc3951aacfa5c"
        );
        Ok(SessionToken::new("session-token".to_string()))
    }

    fn register(&self, token: &SessionToken, _: &str, _: &str) -> Result<(), BackendError> {
        self.calls.borrow_mut().push("register");
        assert_eq!(token.as_str(), "session-token");
        Ok(())
    }

    fn check_rollout(
        &self,
        _: &SessionToken,
        mac: &str,
        firmware_version: &str,
    ) -> Result<RolloutOffer, BackendError> {
        self.calls.borrow_mut().push("check_rollout");
        assert_eq!(mac, "AA:BB:CC:DD:EE:FF");
        assert_eq!(firmware_version, "1.0.0");
        Ok(self.rollout.clone())
    }

    fn resolve_cid(
        &self,
        _: &SessionToken,
        firmware_id: &str,
    ) -> Result<ContentLocator, BackendError> {
        self.calls.borrow_mut().push("resolve_cid");
        assert_eq!(firmware_id, "fw-42");
        Ok(ContentLocator {
            cid: self.cid.clone(),
        })
    }

    fn report_success(
        &self,
        _: &SessionToken,
        _: &str,
        _: &str,
        rollout_id: &str,
    ) -> Result<(), BackendError> {
        self.calls.borrow_mut().push("report_success");
        assert_eq!(rollout_id, "r-7");
        Ok(())
    }
}

struct ScriptedUpdater {
    outcome: UpdateOutcome,
    applies: Cell<u32>,
}

impl ScriptedUpdater {
    fn returning(outcome: UpdateOutcome) -> Self {
        Self {
            outcome,
            applies: Cell::new(0),
        }
    }
}

impl Updater for ScriptedUpdater {
    fn apply(&self, _: &SessionToken, locator: &ContentLocator) -> UpdateOutcome {
        self.applies.set(self.applies.get() + 1);
        assert_eq!(locator.cid, "QmFirmware");
        self.outcome.clone()
    }
}

fn device() -> DeviceIdentity {
    DeviceIdentity {
        device_key: "device-key-1".to_string(),
        customer_key: "customer-secret".to_string(),
        mac: "AA:BB:CC:DD:EE:FF".to_string(),
    }
}

fn run_cycle(
    backend: &ScriptedBackend,
    updater: &ScriptedUpdater,
    restarter: &CountingRestarter,
    ctx: &mut CycleContext,
) -> CycleOutcome {
    let clock = FixedClock(1_700_000_000);
    let connectivity = AlwaysOnline;
    let device = device();
    let orchestrator = Orchestrator::new(
        backend,
        updater,
        &clock,
        &connectivity,
        restarter,
        &device,
        "1.0.0",
    );
    orchestrator.run_cycle(ctx)
}

// Scenario A: everything succeeds end to end.
#[test]
fn full_rollout_applies_update_and_restarts_once() {
    let backend = ScriptedBackend::new(Some("r-7"), "QmFirmware");
    let updater = ScriptedUpdater::returning(UpdateOutcome::Applied);
    let restarter = CountingRestarter::default();
    let mut ctx = CycleContext::new();

    let outcome = run_cycle(&backend, &updater, &restarter, &mut ctx);

    assert_eq!(outcome, CycleOutcome::UpdateApplied);
    assert_eq!(
        backend.calls(),
        vec![
            "login",
            "register",
            "check_rollout",
            "resolve_cid",
            "report_success"
        ]
    );
    assert_eq!(updater.applies.get(), 1);
    assert_eq!(restarter.restarts.get(), 1);
}

// Scenario B: no rollout pending; the cycle short-circuits with zero
// extraneous calls.
#[test]
fn null_rollout_short_circuits_cycle() {
    let backend = ScriptedBackend::new(None, "QmFirmware");
    let updater = ScriptedUpdater::returning(UpdateOutcome::Applied);
    let restarter = CountingRestarter::default();
    let mut ctx = CycleContext::new();

    let outcome = run_cycle(&backend, &updater, &restarter, &mut ctx);

    assert_eq!(outcome, CycleOutcome::NoRollout);
    assert!(!outcome.is_abort());
    assert_eq!(backend.calls(), vec!["login", "register", "check_rollout"]);
    assert_eq!(updater.applies.get(), 0);
    assert_eq!(restarter.restarts.get(), 0);
}

// Scenario C: the ledger answers 200 but with an empty CID.
#[test]
fn empty_cid_aborts_before_updater() {
    let backend = ScriptedBackend::new(Some("r-7"), "");
    let updater = ScriptedUpdater::returning(UpdateOutcome::Applied);
    let restarter = CountingRestarter::default();
    let mut ctx = CycleContext::new();

    let outcome = run_cycle(&backend, &updater, &restarter, &mut ctx);

    assert_eq!(outcome, CycleOutcome::CidMissing);
    assert_eq!(
        backend.calls(),
        vec!["login", "register", "check_rollout", "resolve_cid"]
    );
    assert_eq!(updater.applies.get(), 0);
}

// Scenario D: the platform decides nothing needs flashing.
#[test]
fn update_not_needed_skips_report() {
    let backend = ScriptedBackend::new(Some("r-7"), "QmFirmware");
    let updater = ScriptedUpdater::returning(UpdateOutcome::NotNeeded);
    let restarter = CountingRestarter::default();
    let mut ctx = CycleContext::new();

    let outcome = run_cycle(&backend, &updater, &restarter, &mut ctx);

    assert_eq!(outcome, CycleOutcome::UpdateNotNeeded);
    assert_eq!(updater.applies.get(), 1);
    assert!(!backend.calls().contains(&"report_success"));
    assert_eq!(restarter.restarts.get(), 0);
}

// The registered flag carries across cycles; nothing else does.
#[test]
fn register_runs_once_per_process_lifetime() {
    let updater = ScriptedUpdater::returning(UpdateOutcome::Applied);
    let restarter = CountingRestarter::default();
    let mut ctx = CycleContext::new();

    let first = ScriptedBackend::new(None, "QmFirmware");
    run_cycle(&first, &updater, &restarter, &mut ctx);
    assert!(first.calls().contains(&"register"));

    let second = ScriptedBackend::new(None, "QmFirmware");
    run_cycle(&second, &updater, &restarter, &mut ctx);
    assert_eq!(second.calls(), vec!["login", "check_rollout"]);
}
