use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;

use crate::scaler::target_scaler::{
    ScalerError, ScalerState, TargetScaler, TargetScalerContext, TargetScalerResult,
};

/// Identifies one trigger's scaling state
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ScalerKey {
    pub topic: String,
    pub consumer_group: String,
    pub function_id: String,
}

impl ScalerKey {
    pub fn new(
        topic: impl Into<String>,
        consumer_group: impl Into<String>,
        function_id: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            consumer_group: consumer_group.into(),
            function_id: function_id.into(),
        }
    }
}

/// Owns the `ScalerState` of every trigger served by this process
#[derive(Debug, Default)]
pub struct ScalerRegistry {
    states: DashMap<ScalerKey, ScalerState>,
}

impl ScalerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one target scaler evaluation against the state stored for its key.
    /// Blocks on broker calls when the provider's metrics are stale.
    pub fn evaluate(
        &self,
        scaler: &TargetScaler,
        context: &TargetScalerContext,
    ) -> Result<TargetScalerResult, ScalerError> {
        let now = Utc::now();
        // fetched before taking the entry so the map shard is not held during broker calls
        let metrics = scaler.validate_and_get_metrics(now);

        let mut state = self.states.entry(scaler.key().clone()).or_default();
        scaler.evaluate(&mut state, context, &metrics, now)
    }

    pub fn state(&self, key: &ScalerKey) -> Option<ScalerState> {
        self.states.get(key).map(|state| *state)
    }

    pub fn remove(&self, key: &ScalerKey) -> Option<ScalerState> {
        self.states.remove(key).map(|(_, state)| state)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
