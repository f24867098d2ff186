//! Device capability cache with coalesced asynchronous probes.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use relay_core::DeliveryError;
use tokio::sync::oneshot;

/// A device-side precondition a component may depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityRequirement {
    /// The device currently has network reachability.
    NetworkReachable,
    /// The advertising identifier is available.
    AdvertisingId,
    /// The user granted the notification permission.
    NotificationPermission,
}

impl CapabilityRequirement {
    /// Requirements whose absence reflects a user decision rather than a
    /// transient device condition.
    pub const USER_DEPENDENT: [CapabilityRequirement; 2] = [
        CapabilityRequirement::AdvertisingId,
        CapabilityRequirement::NotificationPermission,
    ];
}

impl fmt::Display for CapabilityRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NetworkReachable => "network-reachable",
            Self::AdvertisingId => "advertising-id",
            Self::NotificationPermission => "notification-permission",
        };
        f.write_str(name)
    }
}

/// Host-provided probe for one capability at a time.
#[async_trait]
pub trait CapabilityFetcher: Send + Sync {
    async fn fetch(&self, requirement: CapabilityRequirement) -> Result<bool, DeliveryError>;
}

#[derive(Default)]
struct ResolverState {
    statuses: HashMap<CapabilityRequirement, bool>,
    waiters: HashMap<CapabilityRequirement, Vec<oneshot::Sender<bool>>>,
    in_flight: HashSet<CapabilityRequirement>,
}

/// Caches capability probes and coalesces concurrent queries.
///
/// At most one fetch per requirement is in flight; every caller that asks
/// while a probe runs waits on the same answer. Answers are cached until
/// [`DeviceCapabilityResolver::refresh`] drops them, typically when the
/// host reports a foreground transition. A failed probe resolves to
/// unavailable rather than surfacing the error to callers.
#[derive(Clone)]
pub struct DeviceCapabilityResolver {
    fetcher: Arc<dyn CapabilityFetcher>,
    state: Arc<Mutex<ResolverState>>,
}

impl DeviceCapabilityResolver {
    pub fn new(fetcher: Arc<dyn CapabilityFetcher>) -> Self {
        Self {
            fetcher,
            state: Arc::new(Mutex::new(ResolverState::default())),
        }
    }

    /// Availability of one requirement, probing the device if unknown.
    pub async fn status(&self, requirement: CapabilityRequirement) -> bool {
        let rx = {
            let mut state = self.lock();
            if let Some(&status) = state.statuses.get(&requirement) {
                return status;
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.entry(requirement).or_default().push(tx);
            if state.in_flight.insert(requirement) {
                self.spawn_fetch(requirement);
            }
            rx
        };

        rx.await.unwrap_or(false)
    }

    /// Availability of several requirements, keyed by requirement.
    pub async fn statuses(
        &self,
        requirements: &[CapabilityRequirement],
    ) -> HashMap<CapabilityRequirement, bool> {
        let mut out = HashMap::with_capacity(requirements.len());
        for &requirement in requirements {
            out.insert(requirement, self.status(requirement).await);
        }
        out
    }

    /// User-dependent requirements known to be denied.
    ///
    /// Only cached answers count; a requirement that was never probed is
    /// not reported as missing.
    pub fn missing_permissions(&self) -> Vec<CapabilityRequirement> {
        let state = self.lock();
        CapabilityRequirement::USER_DEPENDENT
            .into_iter()
            .filter(|requirement| state.statuses.get(requirement) == Some(&false))
            .collect()
    }

    /// Drop the cached answer so the next query probes the device again.
    pub fn refresh(&self, requirement: CapabilityRequirement) {
        self.lock().statuses.remove(&requirement);
    }

    fn spawn_fetch(&self, requirement: CapabilityRequirement) {
        let fetcher = self.fetcher.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            let status = match fetcher.fetch(requirement).await {
                Ok(status) => status,
                Err(err) => {
                    tracing::warn!(%requirement, error = %err, "capability probe failed");
                    false
                }
            };

            let waiters = {
                let mut state = match state.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                state.statuses.insert(requirement, status);
                state.in_flight.remove(&requirement);
                state.waiters.remove(&requirement).unwrap_or_default()
            };
            for waiter in waiters {
                let _ = waiter.send(status);
            }
        });
    }

    fn lock(&self) -> MutexGuard<'_, ResolverState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
