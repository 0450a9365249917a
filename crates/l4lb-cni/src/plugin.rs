//! Attach and detach sequencing.
//!
//! ADD fails closed: the first failing stage aborts the attach. Stages that
//! already completed are then undone best-effort, newest first, before the
//! original error is returned.
//!
//! DEL fails open: every cleanup step runs whatever happened to the others
//! and only a failing delegate makes the detach fail, since the delegate
//! owns the container's primary network.

use l4lb_net::Topology;
use tracing::{debug, info, instrument, warn};

use crate::anycast::AnycastNetwork;
use crate::checkpoint::CheckpointStore;
use crate::config::NetworkConfig;
use crate::delegate::{DelegateConfig, DelegateResult};
use crate::error::{CniError, Result, Stage};
use crate::request::AttachRequest;

/// Result of one best-effort detach step.
#[derive(Debug)]
pub enum Outcome {
    /// The step removed something.
    Done,
    /// There was nothing to remove, or the step does not apply.
    Skipped,
    /// The step failed; the detach carried on.
    Degraded(CniError),
}

impl Outcome {
    /// Whether the step failed.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }
}

/// What a detach did, step by step.
#[derive(Debug, Default)]
pub struct DetachReport {
    steps: Vec<(Stage, Outcome)>,
}

impl DetachReport {
    fn record(&mut self, stage: Stage, outcome: Outcome) {
        if let Outcome::Degraded(e) = &outcome {
            warn!(%stage, error = %e, "detach step failed, continuing");
        }
        self.steps.push((stage, outcome));
    }

    /// Steps in the order they ran.
    #[must_use]
    pub fn steps(&self) -> &[(Stage, Outcome)] {
        &self.steps
    }

    /// Outcome of `stage`, if it ran.
    #[must_use]
    pub fn outcome(&self, stage: Stage) -> Option<&Outcome> {
        self.steps
            .iter()
            .find_map(|(s, outcome)| (*s == stage).then_some(outcome))
    }

    /// Whether any step failed.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.steps.iter().any(|(_, outcome)| outcome.is_degraded())
    }
}

/// Everything ADD and CHECK need, resolved before any side effect.
struct Plan<'a, T> {
    conf: NetworkConfig,
    delegate: DelegateConfig,
    anycast: Option<AnycastNetwork<'a, T>>,
    checkpoint: Option<CheckpointStore>,
}

/// The CNI plugin.
#[derive(Debug, Default)]
pub struct Plugin<T> {
    topology: T,
}

impl<T: Topology> Plugin<T> {
    /// Creates a plugin operating on `topology`.
    pub const fn new(topology: T) -> Self {
        Self { topology }
    }

    /// The topology this plugin operates on.
    pub const fn topology(&self) -> &T {
        &self.topology
    }

    /// Attaches the container and returns the delegate's result unchanged.
    ///
    /// # Errors
    ///
    /// Returns the first failing stage, after undoing the completed ones.
    #[instrument(skip_all, fields(container_id = %request.container_id))]
    pub fn attach(&self, request: &AttachRequest) -> Result<DelegateResult> {
        let plan = self.plan(request).map_err(|e| e.at(Stage::ParseConfig))?;
        plan.conf
            .ensure_attachable()
            .map_err(|e| e.at(Stage::ParseConfig))?;

        debug!(
            network = %plan.conf.name,
            delegate = plan.delegate.plugin(),
            anycast = plan.anycast.is_some(),
            checkpoint = plan.checkpoint.is_some(),
            "attaching"
        );

        self.topology
            .enable_forwarding()
            .map_err(|e| CniError::from(e).at(Stage::EnableForwarding))?;

        let result = plan
            .delegate
            .invoke_add(request)
            .map_err(|e| e.at(Stage::DelegateAdd))?;

        if let Some(anycast) = &plan.anycast {
            if let Err(e) = anycast.install(request, plan.conf.effective_mtu()) {
                Self::compensate(request, &plan, true);
                return Err(e);
            }
        }

        if let Some(store) = &plan.checkpoint {
            if let Err(e) = store.register(&request.container_id, request.netns()) {
                Self::compensate(request, &plan, plan.anycast.is_some());
                return Err(e.at(Stage::Checkpoint));
            }
        }

        info!(network = %plan.conf.name, "container attached");
        Ok(result)
    }

    /// Detaches the container, tolerating anything a partial or missing
    /// attach left behind.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be parsed or the
    /// delegate fails.
    #[instrument(skip_all, fields(container_id = %request.container_id))]
    pub fn detach(&self, request: &AttachRequest) -> Result<DetachReport> {
        let conf = NetworkConfig::parse(&request.config).map_err(|e| e.at(Stage::ParseConfig))?;
        // Resolved now, reported after the cleanup has run.
        let delegate = DelegateConfig::from_network(&conf);
        let mut report = DetachReport::default();

        if conf.anycast_enabled() {
            match AnycastNetwork::new(&self.topology) {
                Ok(anycast) => {
                    for (stage, outcome) in anycast.remove(request) {
                        report.record(stage, outcome);
                    }
                }
                Err(e) => report.record(Stage::IpamRelease, Outcome::Degraded(e)),
            }
        }

        // Runs even when registration is disabled, so toggling it off
        // cannot leak a record.
        let unregister = CheckpointStore::from_config(&conf.checkpoint)
            .and_then(|store| store.unregister(&request.container_id));
        let outcome = match unregister {
            Ok(true) => Outcome::Done,
            Ok(false) => Outcome::Skipped,
            Err(e) => Outcome::Degraded(e),
        };
        report.record(Stage::CheckpointRemove, outcome);

        delegate
            .map_err(|e| e.at(Stage::ParseConfig))?
            .invoke_del(request)
            .map_err(|e| e.at(Stage::DelegateDel))?;
        report.record(Stage::DelegateDel, Outcome::Done);

        info!(degraded = report.is_degraded(), "container detached");
        Ok(report)
    }

    /// Verifies the container is still attached as configured.
    ///
    /// # Errors
    ///
    /// Returns the first check that fails.
    #[instrument(skip_all, fields(container_id = %request.container_id))]
    pub fn check(&self, request: &AttachRequest) -> Result<()> {
        let plan = self.plan(request).map_err(|e| e.at(Stage::ParseConfig))?;
        if !plan.conf.supports_check() {
            return Err(CniError::IncompatibleVersion(format!(
                "{} does not support CHECK",
                plan.conf.cni_version
            ))
            .at(Stage::ParseConfig));
        }

        plan.delegate
            .invoke_check(request)
            .map_err(|e| e.at(Stage::DelegateCheck))?;

        if let Some(anycast) = &plan.anycast {
            anycast
                .check(request)
                .map_err(|e| e.at(Stage::AnycastCheck))?;
        }

        if let Some(store) = &plan.checkpoint {
            match store.lookup(&request.container_id) {
                Ok(Some(netns)) if netns == request.netns() => {}
                Ok(found) => {
                    return Err(CniError::Checkpoint(format!(
                        "expected {} registered for {}, found {found:?}",
                        request.netns().display(),
                        request.container_id
                    ))
                    .at(Stage::CheckpointCheck));
                }
                Err(e) => return Err(e.at(Stage::CheckpointCheck)),
            }
        }

        debug!("container check passed");
        Ok(())
    }

    fn plan(&self, request: &AttachRequest) -> Result<Plan<'_, T>> {
        let conf = NetworkConfig::parse(&request.config)?;
        let delegate = DelegateConfig::from_network(&conf)?;

        let anycast = if conf.anycast_enabled() {
            Some(AnycastNetwork::new(&self.topology)?)
        } else {
            None
        };

        let checkpoint = if conf.checkpoint_enabled() {
            let store = CheckpointStore::from_config(&conf.checkpoint)?;
            store.record_path(&request.container_id)?;
            Some(store)
        } else {
            None
        };

        Ok(Plan {
            conf,
            delegate,
            anycast,
            checkpoint,
        })
    }

    /// Undoes an attach that failed after the delegate attached.
    fn compensate(request: &AttachRequest, plan: &Plan<'_, T>, anycast_started: bool) {
        warn!("attach failed, undoing completed stages");
        let mut report = DetachReport::default();

        if anycast_started {
            if let Some(anycast) = &plan.anycast {
                for (stage, outcome) in anycast.remove(request) {
                    report.record(stage, outcome);
                }
            }
        }

        let outcome = match plan.delegate.invoke_del(request) {
            Ok(()) => Outcome::Done,
            Err(e) => Outcome::Degraded(e),
        };
        report.record(Stage::DelegateDel, outcome);
    }
}
