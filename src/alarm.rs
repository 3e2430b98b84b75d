use crate::monitor::Monitor;
use crate::parsers::AlarmDecl;
use crate::ConfigError;

/// Stopping conditions over observables. Checked at observation ticks;
/// a tripped alarm stops the run cleanly after reports are finalized.
pub struct Alarm {
    alarms: Vec<AlarmDecl>,
}

impl Alarm {
    /// Validates the `%stp:` declarations against the monitor's
    /// observables.
    pub fn new(decls: &[AlarmDecl], monitor: &Monitor) -> Result<Alarm, ConfigError> {
        for decl in decls {
            if !monitor.has_observable(&decl.name) {
                return Err(ConfigError::Observable {
                    name: decl.name.clone(),
                    msg: "stopping condition names an unknown observable".into(),
                });
            }
        }
        Ok(Alarm {
            alarms: decls.to_vec(),
        })
    }

    /// Returns the first stopping condition whose most recent observation
    /// exceeds its threshold.
    pub fn trigger(&self, monitor: &Monitor) -> Option<&AlarmDecl> {
        self.alarms.iter().find(|decl| {
            monitor
                .last_value(&decl.name, decl.index)
                .is_some_and(|value| value as f64 > decl.threshold)
        })
    }
}
