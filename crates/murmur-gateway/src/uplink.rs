//! Uplink seam
//!
//! The real transport (HTTP POST to the telemetry server over the station
//! uplink) is an external collaborator. The bridge only needs a bounded,
//! synchronous push attempt; anything slower than the tick budget belongs
//! behind this trait.

use murmur_core::MurmurResult;

use crate::TelemetryRecord;

/// One bounded push attempt toward the external telemetry endpoint.
pub trait TelemetryUplink {
    fn push(&mut self, record: &TelemetryRecord) -> MurmurResult<()>;
}

impl<T: TelemetryUplink + ?Sized> TelemetryUplink for Box<T> {
    fn push(&mut self, record: &TelemetryRecord) -> MurmurResult<()> {
        (**self).push(record)
    }
}

/// Scriptable uplink double for tests: pops one scripted outcome per push
/// and logs every record it accepted.
#[derive(Default)]
pub struct ScriptedUplink {
    outcomes: std::collections::VecDeque<MurmurResult<()>>,
    /// Outcome used once the script runs dry
    default_ok: bool,
    pub delivered: Vec<TelemetryRecord>,
    pub attempts: u64,
}

impl ScriptedUplink {
    /// An uplink that accepts everything.
    pub fn up() -> Self {
        ScriptedUplink {
            default_ok: true,
            ..Default::default()
        }
    }

    /// An uplink that rejects everything.
    pub fn down() -> Self {
        ScriptedUplink {
            default_ok: false,
            ..Default::default()
        }
    }

    /// Queue one scripted outcome ahead of the default.
    pub fn script(&mut self, outcome: MurmurResult<()>) -> &mut Self {
        self.outcomes.push_back(outcome);
        self
    }
}

impl TelemetryUplink for ScriptedUplink {
    fn push(&mut self, record: &TelemetryRecord) -> MurmurResult<()> {
        self.attempts += 1;
        let outcome = self.outcomes.pop_front().unwrap_or(if self.default_ok {
            Ok(())
        } else {
            Err(murmur_core::MurmurError::UplinkUnavailable(
                "scripted down".into(),
            ))
        });
        if outcome.is_ok() {
            self.delivered.push(record.clone());
        }
        outcome
    }
}
