//! Privilege phases of a provisioning run.

use crate::state::Identity;
use artbox_shared::{ArtboxError, ArtboxResult};
use serde::{Deserialize, Serialize};

/// Execution context of the pipeline.
///
/// Runs start `Privileged`. Creating the runtime identity moves the run to
/// `Unprivileged` and there is no way back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Privileged,
    Unprivileged(Identity),
}

impl Phase {
    pub fn is_privileged(&self) -> bool {
        matches!(self, Phase::Privileged)
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Phase::Privileged => None,
            Phase::Unprivileged(identity) => Some(identity),
        }
    }

    pub(crate) fn drop_to(&mut self, identity: Identity) -> ArtboxResult<()> {
        if let Phase::Unprivileged(current) = self {
            return Err(ArtboxError::Identity(format!(
                "privilege already dropped to {} (uid {})",
                current.user, current.uid
            )));
        }
        *self = Phase::Unprivileged(identity);
        Ok(())
    }
}
