//! Engine counters and their tracing hook.

use serde::Serialize;
use tracing::debug;

use strata_schema::ApplyStats;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub events_accepted: u64,
    pub events_rejected: u64,
    pub events_looped_back: u64,
    pub queries_activated: u64,
    pub fieldsets_registered: u64,
    pub fieldsets_rebound: u64,
    pub types_retired: u64,
}

impl EngineStats {
    /// Fold in the schema layer's running totals.
    pub fn with_schema(mut self, schema: ApplyStats) -> Self {
        self.fieldsets_registered = schema.registered;
        self.fieldsets_rebound = schema.rebound;
        self.types_retired = schema.retired;
        self
    }

    pub fn emit(&self, event: &str) {
        debug!(
            event,
            accepted = self.events_accepted,
            rejected = self.events_rejected,
            looped_back = self.events_looped_back,
            activated = self.queries_activated,
            registered = self.fieldsets_registered,
            rebound = self.fieldsets_rebound,
            retired = self.types_retired,
            "engine stats"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_totals_replace_not_add() {
        let stats = EngineStats {
            events_accepted: 3,
            fieldsets_registered: 99,
            ..Default::default()
        }
        .with_schema(ApplyStats {
            registered: 2,
            rebound: 1,
            retired: 1,
        });
        assert_eq!(stats.events_accepted, 3);
        assert_eq!(stats.fieldsets_registered, 2);
        assert_eq!(stats.types_retired, 1);
    }
}
