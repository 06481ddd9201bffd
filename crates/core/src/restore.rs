use serde::Serialize;
use tracing::{error, info};

use crate::Teamserver;

/// Outcome of a startup restore. Skipped entries are logged, never fatal.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RestoreReport {
    pub listeners_restored: usize,
    pub agents_restored: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

impl RestoreReport {
    fn skip(&mut self, message: String) {
        self.skipped += 1;
        self.errors.push(message);
    }
}

/// Rehydrates persisted listeners, then agents.
///
/// Listeners go first: an agent's plugin may look up the listener it calls
/// back through while restoring.
pub async fn restore(core: &Teamserver) -> RestoreReport {
    let mut report = RestoreReport::default();

    match core.store.listener_list().await {
        Ok(rows) => {
            for row in rows {
                let name = row.name.clone();
                match core.listeners.restore(row).await {
                    Ok(listener) => {
                        info!(
                            listener = %listener.name,
                            protocol = %listener.protocol,
                            status = %listener.status,
                            "♻️ Listener restored"
                        );
                        report.listeners_restored += 1;
                    }
                    Err(e) => {
                        error!(listener = %name, error = %e, "❌ Failed to restore listener, skipping");
                        report.skip(format!("listener {}: {}", name, e));
                    }
                }
            }
        }
        Err(e) => {
            error!(error = %e, "❌ Failed to read persisted listeners");
            report.errors.push(format!("listener list: {:#}", e));
        }
    }

    match core.store.agent_list().await {
        Ok(rows) => {
            for row in rows {
                let uuid = row.uuid.clone();
                let agent_type = row.agent_type.clone();
                match core.agents.restore(row).await {
                    Ok(()) => {
                        info!(uuid = %uuid, agent_type = %agent_type, "♻️ Agent restored");
                        report.agents_restored += 1;
                    }
                    Err(e) => {
                        error!(uuid = %uuid, error = %e, "❌ Failed to restore agent, skipping");
                        report.skip(format!("agent {}: {}", uuid, e));
                    }
                }
            }
        }
        Err(e) => {
            error!(error = %e, "❌ Failed to read persisted agents");
            report.errors.push(format!("agent list: {:#}", e));
        }
    }

    report
}
