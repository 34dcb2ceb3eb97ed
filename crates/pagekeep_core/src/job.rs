/// Lifecycle of one archive job for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobPhase {
    #[default]
    Idle,
    Capturing,
    PersistingSuccess,
    PersistingFailure,
}

impl JobPhase {
    pub fn is_active(self) -> bool {
        self != JobPhase::Idle
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    Started,
    Captured,
    CaptureFailed,
    Persisted,
}

/// Pure transition function; events that do not apply leave the phase unchanged.
pub fn advance(phase: JobPhase, event: JobEvent) -> JobPhase {
    match (phase, event) {
        (JobPhase::Idle, JobEvent::Started) => JobPhase::Capturing,
        (JobPhase::Capturing, JobEvent::Captured) => JobPhase::PersistingSuccess,
        (JobPhase::Capturing, JobEvent::CaptureFailed) => JobPhase::PersistingFailure,
        (JobPhase::PersistingSuccess | JobPhase::PersistingFailure, JobEvent::Persisted) => {
            JobPhase::Idle
        }
        (phase, _) => phase,
    }
}
